//! PathCast CLI: simulate, back-test, optimize, train and cache management commands.
//!
//! Commands:
//! - `simulate`: forward-simulate from a cut (historical) or from now (realtime)
//! - `backtest`: run the weekly full-history back-test and print its score
//! - `optimize`: search for the best enabled model set
//! - `train`: register model definitions and train every untrained node
//! - `models list|enable|disable|remove`: inspect and edit the model forest
//! - `cache status|clear`: inspect or clear the back-test result cache

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pathcast_core::data::{BarFeed, Persistence};
use pathcast_core::domain::{ModelId, Resolution};
use pathcast_core::features::FeatureDescriptor;
use pathcast_core::model::{train_untrained, ModelKind, ModelNode, ModelRegistry};
use pathcast_core::store::checks::{verify_realtime_alignment, verify_timezone};
use pathcast_core::store::{MultiResolutionStore, StoreKind};
use pathcast_runner::simulation::datetime_of;
use pathcast_runner::{
    perform_simulation, BacktestEvaluator, CombinationEvaluator, CombinationSearch, ResultCache,
    RunConfig, SimulationTable, StdoutProgress,
};

#[derive(Parser)]
#[command(
    name = "pathcast",
    about = "PathCast CLI: ensemble forward simulation of FX price paths"
)]
struct Cli {
    /// Path to a TOML run config. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the config's data directory.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Overrides the config's output directory.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Overrides the config's model directory.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward-simulate with the enabled models.
    Simulate {
        /// Cut date (YYYY-MM-DD). Required for historical stores; realtime runs start after
        /// the newest bar.
        #[arg(long)]
        start: Option<String>,

        /// Hours to simulate. Defaults to the config's `simulation.hours`.
        #[arg(long)]
        hours: Option<usize>,

        /// Current price to report when the realtime feed cannot provide one.
        #[arg(long)]
        price: Option<f64>,
    },
    /// Run the weekly full-history back-test and print its score.
    Backtest {
        /// Cache name of the run. The empty name is the search baseline.
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Search for the best enabled model set.
    Optimize,
    /// Register model definitions and train every untrained node.
    Train {
        /// Definition file: `<id>;<kind>;<resolution>;<horizon>` then `{`, descriptors, `}`.
        #[arg(long)]
        definitions: Option<PathBuf>,
    },
    /// Model forest commands.
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Result cache commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum ModelsAction {
    /// List every node with its precision and enabled state.
    List,
    /// Add a trained root to the enabled set.
    Enable { id: ModelId },
    /// Drop a model from the enabled set.
    Disable { id: ModelId },
    /// Delete a model and its subtree.
    Remove { id: ModelId },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached back-test runs for the current config.
    Status,
    /// Delete every cached back-test run for the current config.
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Simulate { start, hours, price } => run_simulate(&config, start, hours, price),
        Commands::Backtest { name } => run_backtest(&config, &name),
        Commands::Optimize => run_optimize(&config),
        Commands::Train { definitions } => run_train(&config, definitions.as_deref()),
        Commands::Models { action } => run_models(&config, action),
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&config),
            CacheAction::Clear => run_cache_clear(&config),
        },
    }
}

fn load_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(dir) = &cli.model_dir {
        config.model_dir = dir.clone();
    }
    Ok(config)
}

struct Session {
    persistence: Arc<dyn Persistence>,
    store: MultiResolutionStore,
    registry: ModelRegistry,
}

fn open_session(config: &RunConfig) -> Result<Session> {
    let persistence = config.persistence();
    let store = config.open_store(persistence.clone())?;
    let registry = ModelRegistry::open(&config.model_dir)
        .with_context(|| format!("Failed to open models in {}", config.model_dir.display()))?;
    Ok(Session {
        persistence,
        store,
        registry,
    })
}

fn enabled_ids(persistence: &dyn Persistence) -> Result<Vec<ModelId>> {
    let ids: Vec<ModelId> = persistence.enabled_models()?.into_iter().collect();
    if ids.is_empty() {
        bail!("no model is enabled; use `pathcast models enable <ID>`");
    }
    Ok(ids)
}

fn parse_date(text: &str) -> Result<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{text}', expected YYYY-MM-DD"))?;
    Ok(date.and_time(chrono::NaiveTime::MIN))
}

fn run_simulate(
    config: &RunConfig,
    start: Option<String>,
    hours: Option<usize>,
    price: Option<f64>,
) -> Result<()> {
    let session = open_session(config)?;
    let ids = enabled_ids(session.persistence.as_ref())?;
    let hours = hours.unwrap_or(config.simulation.hours);
    let realtime = session.store.kind() == StoreKind::Realtime;

    let start = match start.as_deref() {
        Some(text) => parse_date(text)?,
        None if realtime => {
            let bars = session.store.bars(Resolution::TRAINING)?;
            let Some(last) = bars.last() else {
                bail!("the realtime feed returned no hourly bars");
            };
            datetime_of(last.end + 1).context("newest realtime bar is out of range")?
        }
        None => bail!("--start is required for a {} store", session.store.kind().label()),
    };

    let current_price = if realtime {
        check_realtime(config, &session)?;
        Some(fetch_current_price(&session.store, price)?)
    } else {
        None
    };

    let table = perform_simulation(
        &session.store,
        &session.registry,
        &ids,
        start,
        hours,
        config.simulation.output_resolution,
    );
    session
        .persistence
        .write_table(&table.to_table()?)
        .with_context(|| format!("Failed to save {}", table.name))?;

    print_simulation(&table, current_price);
    Ok(())
}

fn check_realtime(config: &RunConfig, session: &Session) -> Result<()> {
    let historical = config.open_historical_store(session.persistence.clone());
    let report = verify_realtime_alignment(&historical, &session.store)?;
    println!(
        "Realtime alignment: {:.6} mean abs daily close difference over {} days",
        report.mean_abs_diff, report.samples
    );
    let drift = verify_timezone(&session.store)?;
    println!("Timezone check: {drift:.6} mean abs daily close difference");
    Ok(())
}

/// The feed's latest price, or the manual fallback when the fetch fails.
fn fetch_current_price(store: &MultiResolutionStore, manual: Option<f64>) -> Result<f64> {
    let fetched = match store.feed() {
        Some(feed) => feed.fetch_current_price(),
        None => bail!("store has no feed to ask for the current price"),
    };
    match (fetched, manual) {
        (Ok(p), _) => Ok(p),
        (Err(e), Some(p)) => {
            eprintln!("WARNING: current price unavailable ({e}), using --price {p}");
            Ok(p)
        }
        (Err(e), None) => {
            Err(e).context("current price unavailable; pass --price to enter it manually")
        }
    }
}

fn print_simulation(table: &SimulationTable, current_price: Option<f64>) {
    println!();
    println!("=== {} ===", table.name);
    if table.is_empty() {
        println!("No rows were simulated.");
        return;
    }
    println!("{:<20} {:>12} {:>12}", "End Time", "Real", "Simulated");
    println!("{}", "-".repeat(46));
    for row in &table.rows {
        let time = datetime_of(row.end_time)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| row.end_time.to_string());
        let real = row
            .real_price
            .map(|p| format!("{p:.5}"))
            .unwrap_or_else(|| "-".into());
        println!("{time:<20} {real:>12} {:>12.5}", row.simulated_price);
    }
    if let Some(price) = current_price {
        println!();
        println!("Current price:      {price:.5}");
    }
    if let Some(outlook) = &table.outlook {
        println!("Next 24h median:    {:.5}", outlook.next_day_median);
        println!("Simulated high:     {:.5}", outlook.high);
        println!("Simulated low:      {:.5}", outlook.low);
    }
    println!();
}

fn open_cache(config: &RunConfig) -> Result<ResultCache> {
    ResultCache::new(&config.output_dir, &config.run_id()?)
}

/// Cached back-tests are keyed by configuration only, so they go stale with the model set.
fn invalidate_cache(config: &RunConfig) -> Result<()> {
    let removed = open_cache(config)?.clear()?;
    if removed > 0 {
        println!("Cleared {removed} cached back-test(s)");
    }
    Ok(())
}

fn run_backtest(config: &RunConfig, name: &str) -> Result<()> {
    let session = open_session(config)?;
    let ids = enabled_ids(session.persistence.as_ref())?;
    let mut evaluator = BacktestEvaluator::new(
        &session.store,
        &session.registry,
        config.backtest.clone(),
        open_cache(config)?,
    );
    let score = evaluator.evaluate(&ids, name)?;

    println!();
    println!("=== Back-test {} to {} ===", config.backtest.start, config.backtest.end);
    println!("Models:     {}", join_ids(&ids));
    println!("Precision:  {:.4}", score.precision);
    println!("{score}");
    Ok(())
}

fn run_optimize(config: &RunConfig) -> Result<()> {
    let session = open_session(config)?;
    let mut evaluator = BacktestEvaluator::new(
        &session.store,
        &session.registry,
        config.backtest.clone(),
        open_cache(config)?,
    );
    let outcome = CombinationSearch::new(&session.registry, session.persistence.as_ref())
        .run(&mut evaluator, &mut StdoutProgress)?;

    println!();
    println!("Search finished after {} accepted move(s).", outcome.accepted.len());
    for change in &outcome.accepted {
        println!("  {change}");
    }
    println!("Enabled models: {}", join_ids(&outcome.enabled));
    println!("{}", outcome.score);
    Ok(())
}

fn run_train(config: &RunConfig, definitions: Option<&Path>) -> Result<()> {
    let mut session = open_session(config)?;
    if let Some(path) = definitions {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        for node in parse_definitions(&text)? {
            if session.registry.contains(node.id) {
                println!("Model {} already registered, skipping definition", node.id);
                continue;
            }
            session.registry.register(node)?;
        }
        session.registry.save()?;
    }

    let reports = train_untrained(&mut session.registry, &session.store, &config.training)?;
    if reports.is_empty() {
        println!("Every model is already trained.");
    } else {
        invalidate_cache(config)?;
    }
    for report in &reports {
        println!(
            "Model {}: {} rows, precision {:.2}%{}",
            report.id,
            report.rows,
            report.precision * 100.0,
            if report.children.is_empty() {
                String::new()
            } else {
                format!(", children {}", join_ids(&report.children))
            }
        );
    }
    Ok(())
}

fn run_models(config: &RunConfig, action: ModelsAction) -> Result<()> {
    let persistence = config.persistence();
    let mut registry = ModelRegistry::open(&config.model_dir)?;

    match action {
        ModelsAction::List => {
            let enabled = persistence.enabled_models()?;
            if registry.is_empty() {
                println!("No models in {}", config.model_dir.display());
                return Ok(());
            }
            println!(
                "{:<6} {:<16} {:<5} {:>7} {:>10} {:<8} {:<7}",
                "ID", "Kind", "Res", "Horizon", "Precision", "Parent", "Enabled"
            );
            println!("{}", "-".repeat(66));
            for node in registry.nodes() {
                let precision = node
                    .precision()
                    .map(|p| format!("{:.2}%", p * 100.0))
                    .unwrap_or_else(|_| "untrained".into());
                let parent = node.parent.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "{:<6} {:<16} {:<5} {:>7} {:>10} {:<8} {:<7}",
                    node.id,
                    node.kind.name(),
                    node.resolution.name(),
                    node.horizon,
                    precision,
                    parent,
                    if enabled.contains(&node.id) { "yes" } else { "" }
                );
            }
        }
        ModelsAction::Enable { id } => {
            let node = registry.node(id)?;
            if !node.is_root() {
                bail!("model {id} is a child; only roots can be enabled");
            }
            if !node.is_trained() {
                bail!("model {id} is not trained yet");
            }
            persistence.enable_model(id)?;
            invalidate_cache(config)?;
            println!("Enabled model {id}");
        }
        ModelsAction::Disable { id } => {
            persistence.disable_model(id)?;
            invalidate_cache(config)?;
            println!("Disabled model {id}");
        }
        ModelsAction::Remove { id } => {
            let removed = registry.remove(id)?;
            for gone in &removed {
                persistence.disable_model(*gone)?;
            }
            registry.save()?;
            invalidate_cache(config)?;
            println!("Removed model(s) {}", join_ids(&removed));
        }
    }
    Ok(())
}

fn run_cache_status(config: &RunConfig) -> Result<()> {
    let cache = open_cache(config)?;
    let entries = cache.entries()?;
    println!("Cache: {}", cache.dir().display());
    if entries.is_empty() {
        println!("Cache is empty.");
        return Ok(());
    }
    println!("Runs: {}", entries.len());
    for name in &entries {
        println!("  {name}");
    }
    Ok(())
}

fn run_cache_clear(config: &RunConfig) -> Result<()> {
    let cache = open_cache(config)?;
    let removed = cache.clear()?;
    println!("Removed {removed} file(s) from {}", cache.dir().display());
    Ok(())
}

fn join_ids(ids: &[ModelId]) -> String {
    ids.iter().map(ModelId::to_string).collect::<Vec<_>>().join(", ")
}

/// Parse root definitions: a `<id>;<kind>;<resolution>;<horizon>` header, then `{`, one
/// feature descriptor per line, and `}`. Blank lines and `#` comments are ignored.
fn parse_definitions(text: &str) -> Result<Vec<ModelNode>> {
    let mut nodes = Vec::new();
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

    while let Some((line_no, header)) = lines.next() {
        let fields: Vec<&str> = header.split(';').map(str::trim).collect();
        let [id, kind, resolution, horizon] = fields[..] else {
            bail!("line {line_no}: expected `<id>;<kind>;<resolution>;<horizon>`, got '{header}'");
        };
        let id: ModelId = id.parse().with_context(|| format!("line {line_no}"))?;
        let kind: ModelKind = kind.parse().with_context(|| format!("line {line_no}"))?;
        let resolution: Resolution =
            resolution.parse().with_context(|| format!("line {line_no}"))?;
        let horizon: usize = horizon
            .parse()
            .with_context(|| format!("line {line_no}: bad horizon '{horizon}'"))?;

        match lines.next() {
            Some((_, "{")) => {}
            Some((n, other)) => bail!("line {n}: expected '{{', got '{other}'"),
            None => bail!("model {id}: missing '{{'"),
        }
        let mut features: Vec<FeatureDescriptor> = Vec::new();
        loop {
            match lines.next() {
                Some((_, "}")) => break,
                Some((n, descriptor)) => features.push(
                    descriptor
                        .parse()
                        .with_context(|| format!("line {n}: model {id}"))?,
                ),
                None => bail!("model {id}: missing '}}'"),
            }
        }
        if features.is_empty() {
            bail!("model {id} has no features");
        }
        nodes.push(ModelNode::root(id, kind, resolution, horizon, features));
    }
    Ok(nodes)
}

//! Back-test result cache: aggregated rows as `;`-separated CSV, one directory per run id.
//!
//! Layout:
//! - `{output_dir}/{run_id}/{Kind}Simulation_{name}.csv`
//! - Corrupt files are renamed to `{filename}.quarantined` and treated as misses

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use pathcast_core::store::StoreKind;

use crate::backtest::BacktestRow;
use crate::config::RunId;

const EXTENSION: &str = "csv";

/// Cache of aggregated back-test rows for one run configuration.
///
/// Entries are keyed by store kind and combination name; the baseline combination has the
/// empty name.
#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
}

impl ResultCache {
    /// Opens the cache for `run_id`, creating its directory.
    pub fn new(output_dir: impl AsRef<Path>, run_id: &RunId) -> Result<Self> {
        let dir = output_dir.as_ref().join(run_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: StoreKind, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}Simulation_{name}.{EXTENSION}", kind.label()))
    }

    pub fn contains(&self, kind: StoreKind, name: &str) -> bool {
        self.path_for(kind, name).is_file()
    }

    /// Cached rows, or `None` when absent or unreadable.
    pub fn get(&self, kind: StoreKind, name: &str) -> Result<Option<Vec<BacktestRow>>> {
        let path = self.path_for(kind, name);
        if !path.exists() {
            return Ok(None);
        }
        match read_rows(&path) {
            Ok(rows) => Ok(Some(rows)),
            Err(e) => {
                let quarantine = path.with_extension(format!("{EXTENSION}.quarantined"));
                eprintln!(
                    "WARNING: quarantining corrupt cache file {}: {e:#}",
                    path.display()
                );
                fs::rename(&path, &quarantine)
                    .with_context(|| format!("Failed to quarantine {}", path.display()))?;
                Ok(None)
            }
        }
    }

    pub fn put(&self, kind: StoreKind, name: &str, rows: &[BacktestRow]) -> Result<()> {
        let path = self.path_for(kind, name);
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_path(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to flush {}", path.display()))?;
        Ok(())
    }

    /// Names of every cached entry, sorted.
    pub fn entries(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir).context("Failed to list cache directory")? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some(EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Removes every entry, quarantined files included. Returns how many files went.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).context("Failed to list cache directory")? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn read_rows(path: &Path) -> Result<Vec<BacktestRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<BacktestRow>, _>>()
        .context("Failed to parse cached rows")
}

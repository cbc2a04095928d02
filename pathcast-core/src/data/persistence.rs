//! Persistence: bar files, result tables and the enabled model set.
//!
//! Layout under the persistence root:
//! - `bars/{name}.dat`: binary bar sequences (see [`super::codec`])
//! - `tables/{name}.parquet` + `tables/{name}.meta.json`: tabular rows with a hash sidecar
//! - `enabled_models.json`: ids of the models taking part in simulations
//!
//! Writes are atomic (write to `.tmp`, rename into place). Files that fail to decode are
//! renamed to `.quarantined` and reported as absent.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use super::codec::{decode_bars, encode_bars};
use super::provider::DataError;
use crate::domain::{Bar, ModelId};

/// Named rows of `f64` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<f64>) -> Result<(), DataError> {
        if row.len() != self.columns.len() {
            return Err(DataError::ValidationError(format!(
                "table {} has {} columns, row has {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, by name.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let at = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| r[at]).collect())
    }

    fn content_hash(&self) -> Result<String, DataError> {
        let bytes = serde_json::to_vec(&(&self.columns, &self.rows))
            .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// Storage boundary used by the store, the model registry and the shells.
pub trait Persistence: Send + Sync {
    /// Bars saved under `name`, or `None` if nothing usable is stored.
    fn load_bars(&self, name: &str) -> Result<Option<Vec<Bar>>, DataError>;

    fn save_bars(&self, name: &str, bars: &[Bar]) -> Result<(), DataError>;

    fn read_table(&self, name: &str) -> Result<Option<Table>, DataError>;

    fn write_table(&self, table: &Table) -> Result<(), DataError>;

    fn enabled_models(&self) -> Result<BTreeSet<ModelId>, DataError>;

    fn enable_model(&self, id: ModelId) -> Result<(), DataError>;

    fn disable_model(&self, id: ModelId) -> Result<(), DataError>;
}

/// Sidecar written next to each table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub data_hash: String,
    pub written_at: chrono::NaiveDateTime,
}

/// Directory-backed persistence.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    root: PathBuf,
}

impl FilePersistence {
    /// No I/O happens until the first read or write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bars_path(&self, name: &str) -> PathBuf {
        self.root.join("bars").join(format!("{name}.dat"))
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.root.join("tables").join(format!("{name}.parquet"))
    }

    fn table_meta_path(&self, name: &str) -> PathBuf {
        self.root.join("tables").join(format!("{name}.meta.json"))
    }

    fn enabled_path(&self) -> PathBuf {
        self.root.join("enabled_models.json")
    }

    fn write_enabled(&self, ids: &BTreeSet<ModelId>) -> Result<(), DataError> {
        let json = serde_json::to_vec_pretty(ids)
            .map_err(|e| DataError::CacheError(format!("enabled set serialization: {e}")))?;
        write_atomic(&self.enabled_path(), &json)
    }
}

impl Persistence for FilePersistence {
    fn load_bars(&self, name: &str) -> Result<Option<Vec<Bar>>, DataError> {
        let path = self.bars_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        match decode_bars(&bytes) {
            Ok(bars) => Ok(Some(bars)),
            Err(e) => {
                quarantine(&path, &e);
                Ok(None)
            }
        }
    }

    fn save_bars(&self, name: &str, bars: &[Bar]) -> Result<(), DataError> {
        write_atomic(&self.bars_path(name), &encode_bars(bars)?)
    }

    fn read_table(&self, name: &str) -> Result<Option<Table>, DataError> {
        let path = self.table_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let loaded = read_parquet_table(name, &path).and_then(|table| {
            let meta_text = fs::read_to_string(self.table_meta_path(name))?;
            let meta: TableMeta = serde_json::from_str(&meta_text)
                .map_err(|e| DataError::CacheError(format!("table meta: {e}")))?;
            if meta.data_hash != table.content_hash()? {
                return Err(DataError::ValidationError(format!(
                    "table {name} does not match its recorded hash"
                )));
            }
            Ok(table)
        });
        match loaded {
            Ok(table) => Ok(Some(table)),
            Err(e) => {
                quarantine(&path, &e);
                Ok(None)
            }
        }
    }

    fn write_table(&self, table: &Table) -> Result<(), DataError> {
        let path = self.table_path(&table.name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("parquet.tmp");
        write_parquet(&table_to_dataframe(table)?, &tmp)?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            DataError::CacheError(format!("atomic rename failed: {e}"))
        })?;

        let meta = TableMeta {
            name: table.name.clone(),
            columns: table.columns.clone(),
            row_count: table.len(),
            data_hash: table.content_hash()?,
            written_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        write_atomic(&self.table_meta_path(&table.name), &meta_json)
    }

    fn enabled_models(&self) -> Result<BTreeSet<ModelId>, DataError> {
        let path = self.enabled_path();
        if !path.exists() {
            return Ok(BTreeSet::new());
        }
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| DataError::CacheError(format!("{}: {e}", path.display())))
    }

    fn enable_model(&self, id: ModelId) -> Result<(), DataError> {
        let mut ids = self.enabled_models()?;
        if ids.insert(id) {
            self.write_enabled(&ids)?;
        }
        Ok(())
    }

    fn disable_model(&self, id: ModelId) -> Result<(), DataError> {
        let mut ids = self.enabled_models()?;
        if ids.remove(&id) {
            self.write_enabled(&ids)?;
        }
        Ok(())
    }
}

/// In-process persistence for tests and throwaway stores.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    bars: Mutex<HashMap<String, Vec<Bar>>>,
    tables: Mutex<HashMap<String, Table>>,
    enabled: Mutex<BTreeSet<ModelId>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

fn guard<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, DataError> {
    mutex
        .lock()
        .map_err(|_| DataError::CacheError("in-memory persistence lock poisoned".into()))
}

impl Persistence for MemoryPersistence {
    fn load_bars(&self, name: &str) -> Result<Option<Vec<Bar>>, DataError> {
        Ok(guard(&self.bars)?.get(name).cloned())
    }

    fn save_bars(&self, name: &str, bars: &[Bar]) -> Result<(), DataError> {
        guard(&self.bars)?.insert(name.to_string(), bars.to_vec());
        Ok(())
    }

    fn read_table(&self, name: &str) -> Result<Option<Table>, DataError> {
        Ok(guard(&self.tables)?.get(name).cloned())
    }

    fn write_table(&self, table: &Table) -> Result<(), DataError> {
        guard(&self.tables)?.insert(table.name.clone(), table.clone());
        Ok(())
    }

    fn enabled_models(&self) -> Result<BTreeSet<ModelId>, DataError> {
        Ok(guard(&self.enabled)?.clone())
    }

    fn enable_model(&self, id: ModelId) -> Result<(), DataError> {
        guard(&self.enabled)?.insert(id);
        Ok(())
    }

    fn disable_model(&self, id: ModelId) -> Result<(), DataError> {
        guard(&self.enabled)?.remove(&id);
        Ok(())
    }
}

// ── File helpers ─────────────────────────────────────────────────────

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DataError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        DataError::CacheError(format!("atomic rename failed: {e}"))
    })
}

fn quarantine(path: &Path, reason: &DataError) {
    let mut target = path.as_os_str().to_owned();
    target.push(".quarantined");
    eprintln!(
        "WARNING: quarantining corrupt file {}: {reason}",
        path.display()
    );
    let _ = fs::rename(path, PathBuf::from(target));
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn table_to_dataframe(table: &Table) -> Result<DataFrame, DataError> {
    let columns = table
        .columns
        .iter()
        .enumerate()
        .map(|(at, name)| {
            let values: Vec<f64> = table.rows.iter().map(|r| r[at]).collect();
            Column::new(name.as_str().into(), values)
        })
        .collect::<Vec<_>>();
    DataFrame::new(columns)
        .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet_table(name: &str, path: &Path) -> Result<Table, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    let columns: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|c| c.to_string())
        .collect();
    let mut series = Vec::with_capacity(columns.len());
    for col_name in &columns {
        let ca = df
            .column(col_name)
            .and_then(|c| c.f64().cloned())
            .map_err(|e| DataError::ParquetError(format!("column {col_name}: {e}")))?;
        series.push(ca);
    }

    let rows = (0..df.height())
        .map(|i| {
            series
                .iter()
                .map(|ca| {
                    ca.get(i).ok_or_else(|| {
                        DataError::ValidationError(format!("null value at row {i}"))
                    })
                })
                .collect::<Result<Vec<f64>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Table {
        name: name.to_string(),
        columns,
        rows,
    })
}

//! Historical raw feed: one CSV file of minute bars per year.
//!
//! Rows are `timestamp,open,high,low,close` (or `;`-separated). Timestamps are
//! `yyyyMMdd HHmmss` in the feed's local time; `hour_offset` shifts them to UTC.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};

use super::provider::{retain_ascending, BarFeed, DataError};
use crate::domain::{Bar, Price, Resolution, Timestamp};

pub const DEFAULT_HOUR_OFFSET: i64 = 6;

const MS_PER_HOUR: i64 = 3_600_000;

#[derive(Debug, Clone)]
pub struct CsvFeed {
    dir: PathBuf,
    first_year: i32,
    last_year: i32,
    hour_offset: i64,
}

impl CsvFeed {
    pub fn new(dir: impl Into<PathBuf>, first_year: i32, last_year: i32) -> Self {
        Self {
            dir: dir.into(),
            first_year,
            last_year,
            hour_offset: DEFAULT_HOUR_OFFSET,
        }
    }

    pub fn with_hour_offset(mut self, hours: i64) -> Self {
        self.hour_offset = hours;
        self
    }

    fn year_path(&self, year: i32) -> PathBuf {
        self.dir.join(format!("{year}.csv"))
    }

    fn read_year(&self, path: &Path) -> Result<Vec<Bar>, DataError> {
        let text = fs::read_to_string(path)?;
        Ok(parse_bars(&text, Resolution::FINEST, self.hour_offset))
    }
}

impl BarFeed for CsvFeed {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self, resolution: Resolution) -> Result<Vec<Bar>, DataError> {
        if resolution != Resolution::FINEST {
            return Err(DataError::Unsupported {
                source_name: self.name().to_string(),
                resolution,
            });
        }
        let mut bars = Vec::new();
        for year in self.first_year..=self.last_year {
            let path = self.year_path(year);
            if !path.exists() {
                eprintln!("WARNING: missing feed file {}", path.display());
                continue;
            }
            bars.extend(self.read_year(&path)?);
        }
        Ok(retain_ascending(self.name(), bars))
    }

    fn fetch_current_price(&self) -> Result<f64, DataError> {
        let bars = self.fetch(Resolution::FINEST)?;
        bars.last()
            .map(|b| f64::from(b.close))
            .ok_or_else(|| DataError::ValidationError("feed holds no bars".into()))
    }
}

/// Parse feed rows in file order. Malformed rows are reported and skipped.
pub fn parse_bars(text: &str, resolution: Resolution, hour_offset: i64) -> Vec<Bar> {
    let delimiter = text
        .lines()
        .find(|l| !l.trim().is_empty() && !is_header(l))
        .map_or(b',', |l| if l.contains(',') { b',' } else { b';' });

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut bars = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                eprintln!("WARNING: skipping unreadable feed row {}: {e}", line + 1);
                continue;
            }
        };
        if record.get(0).is_some_and(is_header) {
            continue;
        }
        match parse_record(&record, resolution, hour_offset) {
            Ok(bar) => bars.push(bar),
            Err(e) => eprintln!("WARNING: skipping feed row {}: {e}", line + 1),
        }
    }
    bars
}

fn is_header(field: &str) -> bool {
    field.trim_start().starts_with("timestamp")
}

fn parse_record(
    record: &csv::StringRecord,
    resolution: Resolution,
    hour_offset: i64,
) -> Result<Bar, String> {
    let field = |at: usize| record.get(at).ok_or_else(|| format!("missing column {at}"));
    let price = |at: usize| -> Result<Price, String> {
        let raw = field(at)?;
        raw.parse::<Price>()
            .map_err(|e| format!("bad price '{raw}': {e}"))
    };

    let time = parse_timestamp(field(0)?)? + hour_offset * MS_PER_HOUR;
    let start = resolution.align(time);
    let end = start + resolution.duration_ms() - 1;
    let (open, high, low, close) = (price(1)?, price(2)?, price(3)?, price(4)?);
    Bar::from_ohlc(start, end, open, close, high, low).map_err(|e| e.to_string())
}

/// `yyyyMMdd HHmmss`, or ISO-like `yyyy-MM-dd[ HH:mm:ss]` when separators are present.
pub fn parse_timestamp(raw: &str) -> Result<Timestamp, String> {
    let raw = raw.trim();
    let parsed = if raw.contains(':') || raw.contains('-') {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .or_else(|_| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
            })
    } else {
        NaiveDateTime::parse_from_str(raw, "%Y%m%d %H%M%S")
    };
    parsed
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|e| format!("bad timestamp '{raw}': {e}"))
}

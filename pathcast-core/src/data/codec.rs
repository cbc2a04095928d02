//! Binary bar file layout.
//!
//! `count: i32` followed by `count` fixed-width records
//! `{start: u64, end: u64, open, close, high, low, median: f32}`, little-endian, no padding.

use super::provider::DataError;
use crate::domain::Bar;

const HEADER_LEN: usize = 4;
pub const RECORD_LEN: usize = 8 + 8 + 5 * 4;

pub fn encode_bars(bars: &[Bar]) -> Result<Vec<u8>, DataError> {
    let count = i32::try_from(bars.len()).map_err(|_| {
        DataError::ValidationError(format!("{} bars exceed the file format limit", bars.len()))
    })?;
    let mut out = Vec::with_capacity(HEADER_LEN + bars.len() * RECORD_LEN);
    out.extend_from_slice(&count.to_le_bytes());
    for b in bars {
        // Timestamps are stored as their two's-complement bit pattern.
        out.extend_from_slice(&(b.start as u64).to_le_bytes());
        out.extend_from_slice(&(b.end as u64).to_le_bytes());
        for price in [b.open, b.close, b.high, b.low, b.median] {
            out.extend_from_slice(&price.to_le_bytes());
        }
    }
    Ok(out)
}

pub fn decode_bars(bytes: &[u8]) -> Result<Vec<Bar>, DataError> {
    let header: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| DataError::ValidationError("bar file shorter than its header".into()))?;
    let count = i32::from_le_bytes(header);
    let count = usize::try_from(count)
        .map_err(|_| DataError::ValidationError(format!("negative bar count {count}")))?;

    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(RECORD_LEN)
        .ok_or_else(|| DataError::ValidationError(format!("bar count {count} overflows")))?;
    if body.len() != expected {
        return Err(DataError::ValidationError(format!(
            "bar file holds {} bytes of records, expected {expected} for {count} bars",
            body.len()
        )));
    }

    body.chunks_exact(RECORD_LEN)
        .enumerate()
        .map(|(i, rec)| decode_record(rec).map_err(|e| {
            DataError::ValidationError(format!("record {i}: {e}"))
        }))
        .collect()
}

fn decode_record(rec: &[u8]) -> Result<Bar, String> {
    let u64_at = |at: usize| -> Result<u64, String> {
        rec.get(at..at + 8)
            .and_then(|s| s.try_into().ok())
            .map(u64::from_le_bytes)
            .ok_or_else(|| format!("truncated at byte {at}"))
    };
    let f32_at = |at: usize| -> Result<f32, String> {
        rec.get(at..at + 4)
            .and_then(|s| s.try_into().ok())
            .map(f32::from_le_bytes)
            .ok_or_else(|| format!("truncated at byte {at}"))
    };
    Bar::new(
        u64_at(0)? as i64,
        u64_at(8)? as i64,
        f32_at(16)?,
        f32_at(20)?,
        f32_at(24)?,
        f32_at(28)?,
        f32_at(32)?,
    )
    .map_err(|e| e.to_string())
}

//! Consistency checks between stores, run by the shell before trusting realtime data.

use super::MultiResolutionStore;
use crate::domain::{Resolution, Timestamp, MS_PER_DAY};
use crate::error::CoreError;
use crate::series::{consolidate, floor};

/// 2012-01-01 23:59:59 UTC.
pub const ALIGNMENT_START: Timestamp = 1_325_462_399_000;
pub const ALIGNMENT_DAYS: i64 = 5 * 365;
/// Mean absolute daily close difference tolerated between the two sources.
pub const ALIGNMENT_THRESHOLD: f64 = 0.000403;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentReport {
    pub mean_abs_diff: f64,
    pub samples: usize,
}

impl AlignmentReport {
    pub fn is_aligned(&self) -> bool {
        self.mean_abs_diff <= ALIGNMENT_THRESHOLD
    }
}

/// Compare daily closes of the historical and realtime stores day by day.
pub fn verify_realtime_alignment(
    historical: &MultiResolutionStore,
    realtime: &MultiResolutionStore,
) -> Result<AlignmentReport, CoreError> {
    verify_alignment_over(historical, realtime, ALIGNMENT_START, ALIGNMENT_DAYS)
}

pub fn verify_alignment_over(
    historical: &MultiResolutionStore,
    realtime: &MultiResolutionStore,
    start: Timestamp,
    days: i64,
) -> Result<AlignmentReport, CoreError> {
    let hist = historical.bars(Resolution::D1)?;
    let live = realtime.bars(Resolution::D1)?;

    let mut total = 0.0;
    let mut samples = 0usize;
    for day in 0..days {
        let t = start + day * MS_PER_DAY;
        let (Ok(h), Ok(r)) = (floor(&hist, t), floor(&live, t)) else {
            continue;
        };
        if !hist[h].contains(t) || !live[r].contains(t) {
            continue;
        }
        total += (f64::from(hist[h].close) - f64::from(live[r].close)).abs();
        samples += 1;
    }

    let report = AlignmentReport {
        mean_abs_diff: if samples == 0 { 0.0 } else { total / samples as f64 },
        samples,
    };
    if !report.is_aligned() {
        eprintln!(
            "WARNING: realtime daily closes drift from history by {:.6} on average ({} days)",
            report.mean_abs_diff, report.samples
        );
    }
    Ok(report)
}

/// Mean absolute close difference between the stored 1d slot and the 1h slot consolidated
/// to days. A wrong hour offset in the raw feed shows up as a large value.
pub fn verify_timezone(store: &MultiResolutionStore) -> Result<f64, CoreError> {
    let hourly = store.bars(Resolution::H1)?;
    let daily = store.bars(Resolution::D1)?;
    if hourly.is_empty() || daily.is_empty() {
        return Ok(0.0);
    }
    let rebuilt = consolidate(&hourly, Resolution::D1.periods_per_day())?;

    let mut total = 0.0;
    let mut samples = 0usize;
    for bar in &rebuilt {
        let Ok(i) = floor(&daily, bar.start) else {
            continue;
        };
        if daily[i].start != bar.start {
            continue;
        }
        total += (f64::from(daily[i].close) - f64::from(bar.close)).abs();
        samples += 1;
    }
    Ok(if samples == 0 { 0.0 } else { total / samples as f64 })
}

//! Consolidation: fold sorted finer bars into windows of `MS_PER_DAY / periods_per_day`.
//!
//! Windows are anchored at midnight (UTC) of the first bar's day. A bar belongs to the
//! window its `end` falls into. A window is emitted lazily, when the first bar ending past
//! its boundary shows up; windows that no bar ends in are skipped without a trace. The
//! trailing window is only emitted once its last bar reaches the window boundary, so a
//! partially filled window never becomes a bar.

use crate::domain::{Bar, MS_PER_DAY};
use crate::error::CoreError;

pub fn consolidate(bars: &[Bar], periods_per_day: u32) -> Result<Vec<Bar>, CoreError> {
    if periods_per_day == 0 {
        return Err(CoreError::invalid_argument(
            "periods per day must be positive",
        ));
    }
    let first = bars
        .first()
        .ok_or_else(|| CoreError::invalid_argument("cannot consolidate an empty bar sequence"))?;

    let width = MS_PER_DAY / i64::from(periods_per_day);
    if width <= 0 {
        return Err(CoreError::invalid_argument(format!(
            "{periods_per_day} periods per day is finer than one millisecond"
        )));
    }

    let mut window_start = first.start - first.start.rem_euclid(MS_PER_DAY);
    let mut out = Vec::with_capacity(bars.len() / 2 + 1);
    let mut run_start = 0usize;

    for (i, bar) in bars.iter().enumerate() {
        let window_end = window_start + width;
        if bar.end < window_end {
            continue;
        }
        if i > run_start {
            out.push(Bar::consolidate(&bars[run_start..i])?);
        }
        run_start = i;
        // Skip straight to the window holding this bar's end; empty windows in between vanish.
        window_start += (bar.end - window_start) / width * width;
    }

    if let Some(last) = bars.last() {
        if last.end + 1 >= window_start + width {
            out.push(Bar::consolidate(&bars[run_start..])?);
        }
    }

    Ok(out)
}

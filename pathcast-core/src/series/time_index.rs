//! Time index: map a timestamp to the bar whose interval holds it.

use crate::domain::{Bar, Resolution, Timestamp};
use crate::error::CoreError;

/// Index of the latest bar with `start <= time`.
///
/// Bars are contiguous, so this is the bar containing `time` (or the last bar when `time`
/// lies past the end of the sequence). Fails with `NotFound` before the first bar.
pub fn floor(bars: &[Bar], time: Timestamp) -> Result<usize, CoreError> {
    let after = bars.partition_point(|b| b.start <= time);
    after.checked_sub(1).ok_or_else(|| {
        CoreError::not_found(format!("no bar starts at or before {time}"))
    })
}

/// [`floor`] with an O(1) fast path: checks `hint` and `hint + 1` before searching.
pub fn floor_from(bars: &[Bar], time: Timestamp, hint: usize) -> Result<usize, CoreError> {
    for j in [hint, hint + 1] {
        if bars.get(j).is_some_and(|b| b.contains(time)) {
            return Ok(j);
        }
    }
    floor(bars, time)
}

/// Remembered bar positions, one per resolution, for a walk where time only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeCursor {
    positions: [usize; Resolution::COUNT],
}

impl TimeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resolution: Resolution) -> usize {
        self.positions[resolution.index()]
    }

    pub fn set(&mut self, resolution: Resolution, index: usize) {
        self.positions[resolution.index()] = index;
    }

    /// Point at the bar just before the one containing `time`, so that only closed bars
    /// are visible. Clamped to the slot; before the first bar the cursor rests at 0.
    pub fn step_before(&mut self, resolution: Resolution, bars: &[Bar], time: Timestamp) -> usize {
        let current = self.get(resolution);
        let index = match floor_from(bars, time, current + 1) {
            Ok(i) => i.saturating_sub(1).min(bars.len().saturating_sub(1)),
            Err(_) => 0,
        };
        self.set(resolution, index);
        index
    }

    /// Point at the bar containing `time` itself, clamped the same way.
    pub fn locate(&mut self, resolution: Resolution, bars: &[Bar], time: Timestamp) -> usize {
        let current = self.get(resolution);
        let index = match floor_from(bars, time, current) {
            Ok(i) => i.min(bars.len().saturating_sub(1)),
            Err(_) => 0,
        };
        self.set(resolution, index);
        index
    }
}

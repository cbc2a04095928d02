//! Numeric building blocks for the feature engine.
//!
//! Everything here works on plain `f64` slices ordered oldest first, so the
//! feature engine decides which bars (and whether the current price) feed in.
//! Empty inputs fail with `InvalidArgument`.

pub mod ema;
pub mod linreg;
pub mod macd;
pub mod rsi;
pub mod stats;

pub use ema::{ema, last_ema};
pub use linreg::LinearFit;
pub use macd::Macd;
pub use rsi::{last_critical_rsi, rsi, rsi_bucket};

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;

//! Indicators and window statistics.
//!
//! Indicators are pure functions: bar history in, numeric series out, one
//! value per bar. No value at bar t may depend on bars after t.

pub mod sma;
pub mod stats;

pub use sma::Sma;

use crate::domain::Bar;

/// Output has one value per input bar; the first `lookback()` are NaN.
pub trait Indicator: Send + Sync {
    /// Label used in logs, e.g. "ma10".
    fn name(&self) -> &str;

    /// Bars of warmup before the first defined value.
    fn lookback(&self) -> usize;

    fn compute(&self, bars: &[Bar]) -> Vec<f64>;
}

/// One bar per close on consecutive calendar days, volume fixed at 1000.
#[cfg(test)]
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let first = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    closes
        .iter()
        .zip(0i64..)
        .map(|(&close, offset)| Bar {
            symbol: "TEST".to_string(),
            date: first + chrono::Duration::days(offset),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1000,
            amount: close * 1000.0,
        })
        .collect()
}

#[cfg(test)]
pub const EPS: f64 = 1e-10;

#[cfg(test)]
pub fn assert_near(actual: f64, expected: f64, tolerance: f64) {
    let diff = (actual - expected).abs();
    assert!(diff < tolerance, "{actual} != {expected} (diff {diff}, tolerance {tolerance})");
}

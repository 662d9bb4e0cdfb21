//! Bar: one trading day for one symbol.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar plus notional turnover (`amount`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub amount: f64,
}

impl Bar {
    /// Any price or the turnover is NaN (a suspended or unfilled row).
    pub fn is_void(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.amount]
            .iter()
            .any(|v| v.is_nan())
    }

    /// Positive prices inside `[low, high]` and non-negative turnover.
    pub fn is_sane(&self) -> bool {
        if self.is_void() || self.low > self.high {
            return false;
        }
        let within = |p: f64| p > 0.0 && self.low <= p && p <= self.high;
        within(self.open) && within(self.close) && self.amount >= 0.0
    }
}

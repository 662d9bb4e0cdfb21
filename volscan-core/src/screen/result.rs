//! Classifier output: accepted matches and typed rejections.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One accepted pattern match with the metrics that justified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenResult {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Date of the most recent bar considered.
    pub as_of: NaiveDate,
    pub quiet_cv: f64,
    pub baseline: f64,
    /// Largest recent basis value divided by the baseline.
    pub peak_ratio: f64,
    pub trend_slope: f64,
    pub rising_days: usize,
    /// First recent bar that reached the breakout threshold.
    pub breakout_date: NaiveDate,
    pub latest_close: f64,
    pub ma_short: Option<f64>,
    pub ma_long: Option<f64>,
}

impl ScreenResult {
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }
}

/// Which statistic came out undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Degenerate {
    QuietDispersion,
    Baseline,
}

/// Why a series was not accepted. Never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    InsufficientData { have: usize, need: usize },
    DegenerateStatistic { which: Degenerate },
    UnstableQuiet { cv: f64, max: f64 },
    NoBreakout { peak_ratio: f64, required: f64 },
    TrendFailed { slope: Option<f64>, rising_days: usize },
    MissingAverages,
    PriceAway {
        close: f64,
        ma_short: Option<f64>,
        ma_long: Option<f64>,
    },
}

impl RejectReason {
    pub fn is_insufficient(&self) -> bool {
        matches!(self, RejectReason::InsufficientData { .. })
    }

    /// Short stable label, used for counting rejections by kind.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::InsufficientData { .. } => "insufficient_data",
            RejectReason::DegenerateStatistic { .. } => "degenerate_statistic",
            RejectReason::UnstableQuiet { .. } => "unstable_quiet",
            RejectReason::NoBreakout { .. } => "no_breakout",
            RejectReason::TrendFailed { .. } => "trend_failed",
            RejectReason::MissingAverages => "missing_averages",
            RejectReason::PriceAway { .. } => "price_away",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientData { have, need } => {
                write!(f, "insufficient data: {have} bars, need {need}")
            }
            RejectReason::DegenerateStatistic { which } => {
                write!(f, "degenerate statistic: {which:?}")
            }
            RejectReason::UnstableQuiet { cv, max } => {
                write!(f, "quiet window cv {cv:.4} > {max}")
            }
            RejectReason::NoBreakout {
                peak_ratio,
                required,
            } => write!(f, "peak ratio {peak_ratio:.3} below {required}"),
            RejectReason::TrendFailed { slope, rising_days } => match slope {
                Some(s) => write!(f, "trend failed: slope {s:.3}, {rising_days} rising days"),
                None => write!(f, "trend failed: slope undefined, {rising_days} rising days"),
            },
            RejectReason::MissingAverages => write!(f, "moving averages undefined at last bar"),
            RejectReason::PriceAway { close, .. } => {
                write!(f, "close {close} away from moving averages")
            }
        }
    }
}

/// Classifier outcome for one series.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept(ScreenResult),
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept(_))
    }

    pub fn accepted(self) -> Option<ScreenResult> {
        match self {
            Verdict::Accept(r) => Some(r),
            Verdict::Reject(_) => None,
        }
    }
}

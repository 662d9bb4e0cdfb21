//! Scan configuration: settings, classifier parameters and named presets.
//!
//! A config is loaded from TOML with two sections:
//!
//! ```toml
//! [scan]
//! workers = 8
//! lookback_days = 120
//!
//! [classifier]
//! quiet_len = 50
//! recent_len = 10
//! trend = { type = "RISING_DAYS", min = 7 }
//! ```
//!
//! Anything left out takes the canonical default.

use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use volscan_core::data::UniverseQuery;
use volscan_core::domain::days_before;
use volscan_core::features::VolumeBasis;
use volscan_core::screen::{BreakoutRule, ClassifierParams, PriceRule, TrendTest};

/// Content hash of a scan configuration.
pub type ConfigHash = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown preset '{0}' (known: {known})", known = PRESET_NAMES.join(", "))]
    UnknownPreset(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How results reach the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SinkMode {
    /// Collect every match, then replace the scan date's rows in one write.
    #[default]
    Batch,
    /// Clear the scan date up front, then append each match as it is found.
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Size of the worker pool.
    pub workers: usize,
    /// Calendar days of history loaded per symbol, ending at the scan date.
    pub lookback_days: u32,
    /// Scan date. `None` means today.
    pub as_of: Option<NaiveDate>,
    /// Skip instruments flagged as not tradable.
    pub tradable_only: bool,
    /// Only symbols with a bar within this many calendar days of the scan date.
    pub active_within_days: Option<u32>,
    pub sink_mode: SinkMode,
    /// Log a progress line every this many finished symbols. 0 disables it.
    pub progress_every: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            lookback_days: 120,
            as_of: None,
            tradable_only: false,
            active_within_days: None,
            sink_mode: SinkMode::Batch,
            progress_every: 100,
        }
    }
}

impl ScanSettings {
    /// The universe query for a scan on `as_of`.
    pub fn universe_query(&self, as_of: NaiveDate) -> UniverseQuery {
        let query = if self.tradable_only {
            UniverseQuery::tradable()
        } else {
            UniverseQuery::all()
        };
        match self.active_within_days {
            Some(days) => query.with_active_since(days_before(as_of, days)),
            None => query,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub scan: ScanSettings,
    pub classifier: ClassifierParams,
}

/// Upper bound on any day-count window (a century of calendar days).
pub const MAX_WINDOW_DAYS: u32 = 36_525;

pub const PRESET_NAMES: &[&str] = &[
    "canonical",
    "turnover_two_day",
    "ten_day_slope",
    "rising_days",
    "screener",
];

impl ScanConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// One of the named parameter sets in [`PRESET_NAMES`].
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        let defaults = ClassifierParams::default();
        let config = match name {
            "canonical" => Self::default(),
            // amount basis, both of the last two days over 3x and rising
            "turnover_two_day" => Self {
                scan: ScanSettings {
                    workers: 10,
                    lookback_days: 25,
                    sink_mode: SinkMode::Streaming,
                    ..ScanSettings::default()
                },
                classifier: ClassifierParams {
                    quiet_len: 15,
                    recent_len: 2,
                    min_bars: 17,
                    cv_max: 0.8,
                    basis: VolumeBasis::Amount,
                    breakout: BreakoutRule::Every,
                    trend: TrendTest::FirstBelowLast,
                    price: PriceRule::Off,
                    ..defaults
                },
            },
            "ten_day_slope" => Self {
                scan: ScanSettings {
                    workers: 8,
                    lookback_days: 150,
                    ..ScanSettings::default()
                },
                classifier: ClassifierParams {
                    quiet_len: 80,
                    min_bars: 90,
                    price: PriceRule::Near {
                        max_deviation: 0.03,
                    },
                    ..defaults
                },
            },
            "rising_days" => Self {
                scan: ScanSettings {
                    lookback_days: 180,
                    ..ScanSettings::default()
                },
                classifier: ClassifierParams {
                    quiet_len: 60,
                    min_bars: 70,
                    cv_max: 0.8,
                    trend: TrendTest::RisingDays { min: 7 },
                    price: PriceRule::Between,
                    ..defaults
                },
            },
            "screener" => Self {
                scan: ScanSettings::default(),
                classifier: ClassifierParams {
                    baseline_len: Some(20),
                    ..defaults
                },
            },
            other => return Err(ConfigError::UnknownPreset(other.to_string())),
        };
        Ok(config)
    }

    /// Reject settings that can never produce a meaningful scan.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scan;
        let c = &self.classifier;
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        if s.workers == 0 {
            return invalid("workers must be at least 1".into());
        }
        if c.quiet_len == 0 || c.recent_len == 0 {
            return invalid(format!(
                "quiet_len and recent_len must be positive (got {} and {})",
                c.quiet_len, c.recent_len
            ));
        }
        if c.min_bars < c.quiet_len + c.recent_len {
            return invalid(format!(
                "min_bars {} is less than quiet_len + recent_len = {}",
                c.min_bars,
                c.quiet_len + c.recent_len
            ));
        }
        if !(c.vol_ratio_min.is_finite() && c.vol_ratio_min > 0.0) {
            return invalid(format!("vol_ratio_min must be positive (got {})", c.vol_ratio_min));
        }
        if !(c.cv_max.is_finite() && c.cv_max >= 0.0) {
            return invalid(format!("cv_max must be non-negative (got {})", c.cv_max));
        }
        if c.ma_short == 0 || c.ma_short >= c.ma_long {
            return invalid(format!(
                "ma_short must be positive and below ma_long (got {} and {})",
                c.ma_short, c.ma_long
            ));
        }
        if c.baseline_len == Some(0) {
            return invalid("baseline_len must be positive when set".into());
        }
        match c.price {
            PriceRule::Near { max_deviation } | PriceRule::NearOrBetween { max_deviation }
                if !(max_deviation.is_finite() && max_deviation >= 0.0) =>
            {
                return invalid(format!("max_deviation must be non-negative (got {max_deviation})"));
            }
            _ => {}
        }
        if s.lookback_days > MAX_WINDOW_DAYS
            || s.active_within_days.is_some_and(|d| d > MAX_WINDOW_DAYS)
        {
            return invalid(format!(
                "lookback_days and active_within_days must not exceed {MAX_WINDOW_DAYS}"
            ));
        }
        // calendar days can never hold more trading days than themselves
        if (s.lookback_days as usize) < c.required_bars() {
            return invalid(format!(
                "lookback_days {} cannot cover {} bars",
                s.lookback_days,
                c.required_bars()
            ));
        }
        Ok(())
    }

    /// Deterministic hash of the full configuration. Two scans with the same
    /// fingerprint ran the same parameters.
    pub fn fingerprint(&self) -> ConfigHash {
        let json = serde_json::to_string(self).unwrap_or_default();
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}

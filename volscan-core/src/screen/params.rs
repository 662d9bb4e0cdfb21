//! Classifier parameters.
//!
//! Every threshold variant of the screen is a value of `ClassifierParams`;
//! there is one classifier, not one per variant.

use serde::{Deserialize, Serialize};

use crate::features::VolumeBasis;

/// How the recent window must clear the breakout threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakoutRule {
    /// The largest recent bar reaches the threshold.
    #[default]
    Peak,
    /// Every recent bar reaches the threshold.
    Every,
}

/// Trend test applied to the recent window's basis values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendTest {
    /// Least-squares slope strictly positive.
    #[default]
    Slope,
    /// At least `min` day-over-day increases.
    RisingDays { min: usize },
    /// First recent value strictly below the last.
    FirstBelowLast,
    /// No day-over-day decrease.
    NonDecreasing,
}

/// Where the last close must sit relative to the two moving averages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceRule {
    /// No price condition.
    Off,
    /// Within `max_deviation` of either MA, or between them.
    NearOrBetween { max_deviation: f64 },
    /// Within `max_deviation` of either MA.
    Near { max_deviation: f64 },
    /// Between the two MAs, inclusive, in either order.
    Between,
}

impl Default for PriceRule {
    fn default() -> Self {
        PriceRule::NearOrBetween {
            max_deviation: 0.03,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    /// Bars in the quiet (consolidation) window.
    pub quiet_len: usize,
    /// Bars in the recent (breakout) window.
    pub recent_len: usize,
    /// Rows required before anything is tested.
    pub min_bars: usize,
    /// Breakout threshold as a multiple of the baseline.
    pub vol_ratio_min: f64,
    /// Upper bound on the quiet window's coefficient of variation.
    pub cv_max: f64,
    /// When set, the baseline is the mean of only the last `baseline_len`
    /// quiet bars; otherwise of the whole quiet window.
    pub baseline_len: Option<usize>,
    pub basis: VolumeBasis,
    pub breakout: BreakoutRule,
    pub trend: TrendTest,
    pub price: PriceRule,
    pub ma_short: usize,
    pub ma_long: usize,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            quiet_len: 50,
            recent_len: 10,
            min_bars: 60,
            vol_ratio_min: 3.0,
            cv_max: 0.5,
            baseline_len: None,
            basis: VolumeBasis::Volume,
            breakout: BreakoutRule::Peak,
            trend: TrendTest::Slope,
            price: PriceRule::default(),
            ma_short: 10,
            ma_long: 20,
        }
    }
}

impl ClassifierParams {
    /// Rows needed for the windows to be populated at all.
    pub fn required_bars(&self) -> usize {
        self.min_bars.max(self.quiet_len + self.recent_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_bars_takes_the_larger_bound() {
        let mut p = ClassifierParams {
            min_bars: 10,
            quiet_len: 17,
            recent_len: 2,
            ..Default::default()
        };
        assert_eq!(p.required_bars(), 19);
        p.min_bars = 60;
        assert_eq!(p.required_bars(), 60);
    }

    #[test]
    fn tagged_rules_from_toml() {
        let p: ClassifierParams = toml::from_str(
            r#"
            quiet_len = 60
            basis = "AMOUNT"
            breakout = "EVERY"
            trend = { type = "RISING_DAYS", min = 7 }
            price = { type = "BETWEEN" }
            "#,
        )
        .unwrap();
        assert_eq!(p.quiet_len, 60);
        assert_eq!(p.recent_len, 10);
        assert_eq!(p.basis, VolumeBasis::Amount);
        assert_eq!(p.breakout, BreakoutRule::Every);
        assert_eq!(p.trend, TrendTest::RisingDays { min: 7 });
        assert_eq!(p.price, PriceRule::Between);
    }
}

//! Feature engine: moving averages of close and volume-window statistics.
//!
//! MAs are precomputed once per series through the `Indicator` trait, so the
//! value at position i only ever sees bars `0..=i`.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Series};
use crate::indicators::{stats, Indicator, Sma};

/// Which per-bar quantity the volume tests run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeBasis {
    /// Shares traded.
    #[default]
    Volume,
    /// Notional turnover.
    Amount,
}

impl VolumeBasis {
    pub fn value(self, bar: &Bar) -> f64 {
        match self {
            VolumeBasis::Volume => bar.volume as f64,
            VolumeBasis::Amount => bar.amount,
        }
    }
}

/// A series plus its per-position moving averages.
#[derive(Debug, Clone)]
pub struct FeatureSeries {
    series: Series,
    short_window: usize,
    long_window: usize,
    ma_short: Vec<f64>,
    ma_long: Vec<f64>,
}

impl FeatureSeries {
    /// Compute features over `series`. Windows below 1 are treated as 1.
    pub fn new(series: Series, short_window: usize, long_window: usize) -> Self {
        let short_window = short_window.max(1);
        let long_window = long_window.max(1);
        let ma_short = Sma::new(short_window).compute(series.bars());
        let ma_long = Sma::new(long_window).compute(series.bars());
        Self {
            series,
            short_window,
            long_window,
            ma_short,
            ma_long,
        }
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn symbol(&self) -> &str {
        self.series.symbol()
    }

    pub fn bars(&self) -> &[Bar] {
        self.series.bars()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn short_window(&self) -> usize {
        self.short_window
    }

    pub fn long_window(&self) -> usize {
        self.long_window
    }

    /// Index of the most recent bar, `None` for an empty series.
    pub fn last_index(&self) -> Option<usize> {
        self.len().checked_sub(1)
    }

    /// MA of close over the short window ending at `i`.
    pub fn ma_short(&self, i: usize) -> Option<f64> {
        defined(&self.ma_short, i)
    }

    /// MA of close over the long window ending at `i`.
    pub fn ma_long(&self, i: usize) -> Option<f64> {
        defined(&self.ma_long, i)
    }

    /// Basis values for `range`, clamped to the series length.
    pub fn basis_values(&self, range: Range<usize>, basis: VolumeBasis) -> Vec<f64> {
        let end = range.end.min(self.len());
        let start = range.start.min(end);
        self.bars()[start..end]
            .iter()
            .map(|b| basis.value(b))
            .collect()
    }

    pub fn mean_basis(&self, range: Range<usize>, basis: VolumeBasis) -> Option<f64> {
        stats::mean(&self.basis_values(range, basis))
    }

    /// Dispersion of the basis over `range`; `None` on a zero mean.
    pub fn coefficient_of_variation(&self, range: Range<usize>, basis: VolumeBasis) -> Option<f64> {
        stats::coefficient_of_variation(&self.basis_values(range, basis))
    }
}

fn defined(values: &[f64], i: usize) -> Option<f64> {
    values.get(i).copied().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_near, bars_from_closes, EPS};

    fn features(closes: &[f64]) -> FeatureSeries {
        let series = Series::new("TEST", bars_from_closes(closes)).unwrap();
        FeatureSeries::new(series, 3, 5)
    }

    #[test]
    fn mas_absent_until_window_full() {
        let fs = features(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(fs.ma_short(1), None);
        assert_near(fs.ma_short(2).unwrap(), 2.0, EPS);
        assert_eq!(fs.ma_long(3), None);
        assert_near(fs.ma_long(4).unwrap(), 3.0, EPS);
        assert_near(fs.ma_long(5).unwrap(), 4.0, EPS);
        assert_eq!(fs.ma_long(99), None);
    }

    #[test]
    fn basis_selects_volume_or_amount() {
        let fs = features(&[10.0, 20.0]);
        assert_eq!(fs.basis_values(0..2, VolumeBasis::Volume), vec![1000.0, 1000.0]);
        assert_eq!(
            fs.basis_values(0..2, VolumeBasis::Amount),
            vec![10_000.0, 20_000.0]
        );
    }

    #[test]
    fn window_stats_over_subrange() {
        let fs = features(&[10.0, 20.0, 30.0]);
        assert_near(
            fs.mean_basis(1..3, VolumeBasis::Amount).unwrap(),
            25_000.0,
            EPS,
        );
        assert_near(
            fs.coefficient_of_variation(0..3, VolumeBasis::Volume).unwrap(),
            0.0,
            EPS,
        );
    }

    #[test]
    fn empty_series_has_no_last_index() {
        let fs = FeatureSeries::new(Series::empty("X"), 10, 20);
        assert_eq!(fs.last_index(), None);
        assert_eq!(fs.mean_basis(0..5, VolumeBasis::Volume), None);
    }
}

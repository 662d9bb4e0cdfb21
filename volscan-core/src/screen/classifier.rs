//! The quiet-then-breakout pattern classifier.
//!
//! Tests run in a fixed order and the first failing test decides the
//! rejection: data length, quiet-window stability, breakout magnitude,
//! recent trend, price position.

use crate::features::FeatureSeries;
use crate::indicators::stats;

use super::params::{BreakoutRule, ClassifierParams, PriceRule, TrendTest};
use super::result::{Degenerate, RejectReason, ScreenResult, Verdict};

#[derive(Debug, Clone, Default)]
pub struct PatternClassifier {
    params: ClassifierParams,
}

impl PatternClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    pub fn classify(&self, fs: &FeatureSeries) -> Verdict {
        match self.evaluate(fs) {
            Ok(result) => Verdict::Accept(result),
            Err(reason) => Verdict::Reject(reason),
        }
    }

    fn evaluate(&self, fs: &FeatureSeries) -> Result<ScreenResult, RejectReason> {
        let p = &self.params;
        let n = fs.len();
        let need = p.required_bars();
        if n < need || n == 0 {
            return Err(RejectReason::InsufficientData { have: n, need });
        }

        let recent = n - p.recent_len..n;
        let quiet = recent.start - p.quiet_len..recent.start;

        // 1. stability of the quiet window
        let quiet_cv = fs
            .coefficient_of_variation(quiet.clone(), p.basis)
            .ok_or(RejectReason::DegenerateStatistic {
                which: Degenerate::QuietDispersion,
            })?;
        if quiet_cv > p.cv_max {
            return Err(RejectReason::UnstableQuiet {
                cv: quiet_cv,
                max: p.cv_max,
            });
        }

        // 2. breakout magnitude
        let baseline_range = match p.baseline_len {
            Some(len) => quiet.end - len.min(p.quiet_len)..quiet.end,
            None => quiet.clone(),
        };
        let baseline = fs
            .mean_basis(baseline_range, p.basis)
            .filter(|m| *m > 0.0)
            .ok_or(RejectReason::DegenerateStatistic {
                which: Degenerate::Baseline,
            })?;

        let recent_values = fs.basis_values(recent.clone(), p.basis);
        let threshold = baseline * p.vol_ratio_min;
        let peak = recent_values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let peak_ratio = peak / baseline;
        let cleared = !recent_values.is_empty()
            && match p.breakout {
                BreakoutRule::Peak => peak >= threshold,
                BreakoutRule::Every => recent_values.iter().all(|v| *v >= threshold),
            };
        if !cleared {
            return Err(RejectReason::NoBreakout {
                peak_ratio,
                required: p.vol_ratio_min,
            });
        }
        let breakout_offset = recent_values
            .iter()
            .position(|v| *v >= threshold)
            .unwrap_or(0);
        let breakout_date = fs.bars()[recent.start + breakout_offset].date;

        // 3. trend over the recent window
        let slope = stats::linear_slope(&recent_values);
        let rising_days = stats::rising_days(&recent_values);
        if !trend_passes(p.trend, &recent_values, slope, rising_days) {
            return Err(RejectReason::TrendFailed { slope, rising_days });
        }

        // 4. price against the moving averages at the last bar
        let last = n - 1;
        let latest = &fs.bars()[last];
        let ma_short = fs.ma_short(last);
        let ma_long = fs.ma_long(last);
        price_passes(p.price, latest.close, ma_short, ma_long)?;

        Ok(ScreenResult {
            symbol: fs.symbol().to_string(),
            name: None,
            as_of: latest.date,
            quiet_cv,
            baseline,
            peak_ratio,
            trend_slope: slope.unwrap_or(0.0),
            rising_days,
            breakout_date,
            latest_close: latest.close,
            ma_short,
            ma_long,
        })
    }
}

fn trend_passes(test: TrendTest, values: &[f64], slope: Option<f64>, rising_days: usize) -> bool {
    match test {
        TrendTest::Slope => slope.is_some_and(|s| s > 0.0),
        TrendTest::RisingDays { min } => rising_days >= min,
        TrendTest::FirstBelowLast => match (values.first(), values.last()) {
            (Some(first), Some(last)) => first < last,
            _ => false,
        },
        TrendTest::NonDecreasing => values.windows(2).all(|w| w[1] >= w[0]),
    }
}

fn deviation(close: f64, ma: Option<f64>) -> Option<f64> {
    ma.filter(|m| *m > 0.0).map(|m| (close - m).abs() / m)
}

fn price_passes(
    rule: PriceRule,
    close: f64,
    ma_short: Option<f64>,
    ma_long: Option<f64>,
) -> Result<(), RejectReason> {
    if rule == PriceRule::Off {
        return Ok(());
    }
    if ma_short.is_none() && ma_long.is_none() {
        return Err(RejectReason::MissingAverages);
    }

    let near = |max: f64| {
        [deviation(close, ma_short), deviation(close, ma_long)]
            .into_iter()
            .flatten()
            .any(|d| d <= max)
    };
    let between = match (ma_short, ma_long) {
        (Some(a), Some(b)) => a.min(b) <= close && close <= a.max(b),
        _ => false,
    };

    let ok = match rule {
        PriceRule::Off => true,
        PriceRule::Near { max_deviation } => near(max_deviation),
        PriceRule::Between => between,
        PriceRule::NearOrBetween { max_deviation } => near(max_deviation) || between,
    };
    if ok {
        Ok(())
    } else {
        Err(RejectReason::PriceAway {
            close,
            ma_short,
            ma_long,
        })
    }
}

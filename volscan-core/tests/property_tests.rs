//! Property tests for the statistics and the classifier.
//!
//! 1. CV is invariant to uniform positive scaling
//! 2. Slope of a linear sequence recovers its coefficient
//! 3. The classifier never panics, whatever the series and window sizes
//! 4. Short series are always rejected as insufficient

use chrono::NaiveDate;
use proptest::prelude::*;
use volscan_core::domain::{Bar, Series};
use volscan_core::features::{FeatureSeries, VolumeBasis};
use volscan_core::indicators::stats;
use volscan_core::screen::{
    BreakoutRule, ClassifierParams, PatternClassifier, PriceRule, RejectReason, TrendTest, Verdict,
};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_volumes(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..1_000_000.0_f64, 2..max_len)
}

fn arb_bars(max_len: usize) -> impl Strategy<Value = Vec<Bar>> {
    prop::collection::vec((0u64..5_000_000, 1.0..200.0_f64), 0..max_len).prop_map(|rows| {
        let base = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        rows.into_iter()
            .enumerate()
            .map(|(i, (volume, close))| Bar {
                symbol: "P".into(),
                date: base + chrono::Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume,
                amount: volume as f64 * close,
            })
            .collect()
    })
}

fn arb_trend() -> impl Strategy<Value = TrendTest> {
    prop_oneof![
        Just(TrendTest::Slope),
        (0usize..10).prop_map(|min| TrendTest::RisingDays { min }),
        Just(TrendTest::FirstBelowLast),
        Just(TrendTest::NonDecreasing),
    ]
}

fn arb_price_rule() -> impl Strategy<Value = PriceRule> {
    prop_oneof![
        Just(PriceRule::Off),
        Just(PriceRule::Between),
        (0.0..0.2_f64).prop_map(|max_deviation| PriceRule::Near { max_deviation }),
        (0.0..0.2_f64).prop_map(|max_deviation| PriceRule::NearOrBetween { max_deviation }),
    ]
}

fn arb_params() -> impl Strategy<Value = ClassifierParams> {
    (
        (0usize..40, 0usize..15, 0usize..80),
        (0.5..6.0_f64, 0.0..2.0_f64),
        prop::option::of(0usize..50),
        any::<bool>(),
        any::<bool>(),
        arb_trend(),
        arb_price_rule(),
    )
        .prop_map(
            |((quiet_len, recent_len, min_bars), (ratio, cv_max), baseline_len, amount, every, trend, price)| {
                ClassifierParams {
                    quiet_len,
                    recent_len,
                    min_bars,
                    vol_ratio_min: ratio,
                    cv_max,
                    baseline_len,
                    basis: if amount { VolumeBasis::Amount } else { VolumeBasis::Volume },
                    breakout: if every { BreakoutRule::Every } else { BreakoutRule::Peak },
                    trend,
                    price,
                    ma_short: 10,
                    ma_long: 20,
                }
            },
        )
}

// ── 1. CV scale invariance ───────────────────────────────────────────

proptest! {
    #[test]
    fn cv_invariant_under_scaling(values in arb_volumes(60), k in 0.001..1000.0_f64) {
        let scaled: Vec<f64> = values.iter().map(|v| v * k).collect();
        let a = stats::coefficient_of_variation(&values).unwrap();
        let b = stats::coefficient_of_variation(&scaled).unwrap();
        prop_assert!((a - b).abs() <= 1e-9 * a.max(1.0), "cv {} vs {}", a, b);
    }
}

// ── 2. Slope recovery ────────────────────────────────────────────────

proptest! {
    #[test]
    fn slope_recovers_linear_coefficient(
        a in -1000.0..1000.0_f64,
        b in -1000.0..1000.0_f64,
        n in 2usize..40,
    ) {
        let ys: Vec<f64> = (0..n).map(|i| a * i as f64 + b).collect();
        let slope = stats::linear_slope(&ys).unwrap();
        prop_assert!((slope - a).abs() < 1e-6 * a.abs().max(1.0));
    }
}

// ── 3./4. Classifier totality ────────────────────────────────────────

proptest! {
    #[test]
    fn classifier_never_panics(bars in arb_bars(120), params in arb_params()) {
        let fs = FeatureSeries::new(Series::new("P", bars).unwrap(), params.ma_short, params.ma_long);
        let verdict = PatternClassifier::new(params).classify(&fs);
        if let Verdict::Accept(r) = verdict {
            prop_assert!(r.peak_ratio.is_finite());
            prop_assert!(r.baseline > 0.0);
        }
    }

    #[test]
    fn short_series_always_insufficient(bars in arb_bars(30)) {
        let params = ClassifierParams::default();
        let n = bars.len();
        let fs = FeatureSeries::new(Series::new("P", bars).unwrap(), 10, 20);
        prop_assert_eq!(
            PatternClassifier::new(params).classify(&fs),
            Verdict::Reject(RejectReason::InsufficientData { have: n, need: 60 })
        );
    }
}

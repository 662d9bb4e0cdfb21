//! Historical volume-spike scan.
//!
//! A spike is a bar whose basis reaches `ratio` times the mean of the
//! `lookback` bars before it, kept only when the mean of the following
//! `post_days` bars stays above that pre-spike mean. Bars without a full
//! pre or post window are skipped.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{days_before, Series};
use crate::features::VolumeBasis;
use crate::indicators::stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeParams {
    pub lookback: usize,
    pub post_days: usize,
    pub ratio: f64,
    pub basis: VolumeBasis,
}

impl Default for SpikeParams {
    fn default() -> Self {
        Self {
            lookback: 10,
            post_days: 5,
            ratio: 3.0,
            basis: VolumeBasis::Amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub symbol: String,
    pub date: NaiveDate,
    pub pre_avg: f64,
    pub spike_value: f64,
    /// `spike_value / pre_avg`.
    pub ratio: f64,
    pub post_avg: f64,
    /// `post_avg / pre_avg`.
    pub post_ratio: f64,
    pub close: f64,
}

/// All spikes in `series`, in date order.
pub fn find_spikes(series: &Series, params: &SpikeParams) -> Vec<SpikeEvent> {
    let bars = series.bars();
    if params.lookback == 0 || params.post_days == 0 {
        return Vec::new();
    }
    let values: Vec<f64> = bars.iter().map(|b| params.basis.value(b)).collect();

    let mut events = Vec::new();
    for i in params.lookback..values.len() {
        if i + params.post_days >= values.len() {
            break;
        }
        let Some(pre_avg) = stats::mean(&values[i - params.lookback..i]).filter(|m| *m > 0.0)
        else {
            continue;
        };
        let spike_value = values[i];
        if spike_value < pre_avg * params.ratio {
            continue;
        }
        let Some(post_avg) = stats::mean(&values[i + 1..=i + params.post_days]) else {
            continue;
        };
        if post_avg <= pre_avg {
            continue;
        }
        events.push(SpikeEvent {
            symbol: series.symbol().to_string(),
            date: bars[i].date,
            pre_avg,
            spike_value,
            ratio: spike_value / pre_avg,
            post_avg,
            post_ratio: post_avg / pre_avg,
            close: bars[i].close,
        });
    }
    events
}

/// Earliest date to load so that spikes on or after `since` still have a
/// full pre-window: two calendar days per lookback bar plus a month of slack
/// for holidays and suspensions.
pub fn history_start(since: NaiveDate, params: &SpikeParams) -> NaiveDate {
    let pad = params.lookback.saturating_mul(2).saturating_add(30);
    days_before(since, u32::try_from(pad).unwrap_or(u32::MAX))
}

/// Spikes dated on or after `since`. `series` may start earlier; those bars
/// only feed pre-windows.
pub fn find_spikes_since(series: &Series, params: &SpikeParams, since: NaiveDate) -> Vec<SpikeEvent> {
    let mut events = find_spikes(series, params);
    events.retain(|e| e.date >= since);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use chrono::Duration;

    fn series_of(volumes: &[u64]) -> Series {
        let base = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let bars = volumes
            .iter()
            .enumerate()
            .map(|(i, &v)| Bar {
                symbol: "SPK".into(),
                date: base + Duration::days(i as i64),
                open: 5.0,
                high: 5.0,
                low: 5.0,
                close: 5.0,
                volume: v,
                amount: v as f64 * 5.0,
            })
            .collect();
        Series::new("SPK", bars).unwrap()
    }

    fn volume_params() -> SpikeParams {
        SpikeParams {
            lookback: 5,
            post_days: 3,
            basis: VolumeBasis::Volume,
            ..Default::default()
        }
    }

    #[test]
    fn sustained_spike_is_found() {
        let s = series_of(&[100, 100, 100, 100, 100, 400, 200, 200, 200, 100]);
        let events = find_spikes(&s, &volume_params());
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.date, s.bars()[5].date);
        assert_eq!(e.pre_avg, 100.0);
        assert_eq!(e.ratio, 4.0);
        assert_eq!(e.post_avg, 200.0);
        assert_eq!(e.post_ratio, 2.0);
    }

    #[test]
    fn fading_spike_is_dropped() {
        let s = series_of(&[100, 100, 100, 100, 100, 400, 50, 50, 50, 100]);
        assert!(find_spikes(&s, &volume_params()).is_empty());
    }

    #[test]
    fn spike_without_full_post_window_is_skipped() {
        let s = series_of(&[100, 100, 100, 100, 100, 100, 100, 400, 500]);
        assert!(find_spikes(&s, &volume_params()).is_empty());
    }

    #[test]
    fn cutoff_keeps_pre_window_history() {
        let volumes = [
            100, 100, 100, 100, 100, 400, 200, 200, 200, 100, 100, 100, 100, 100, 500, 300, 300,
            300,
        ];
        let full = series_of(&volumes);
        let since = full.bars()[5].date;
        let params = volume_params();

        // bars from the cutoff alone lose the first spike's pre-window
        let from_cutoff: Vec<Bar> = full.bars().iter().filter(|b| b.date >= since).cloned().collect();
        let clipped = Series::new("SPK", from_cutoff).unwrap();
        assert_eq!(find_spikes_since(&clipped, &params, since).len(), 1);

        let start = history_start(since, &params);
        assert!(start <= full.bars()[0].date);
        let padded: Vec<Bar> = full.bars().iter().filter(|b| b.date >= start).cloned().collect();
        let padded = Series::new("SPK", padded).unwrap();
        let dates: Vec<NaiveDate> = find_spikes_since(&padded, &params, since)
            .into_iter()
            .map(|e| e.date)
            .collect();
        assert_eq!(dates, vec![full.bars()[5].date, full.bars()[14].date]);

        let later = find_spikes_since(&padded, &params, full.bars()[6].date);
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].date, full.bars()[14].date);
    }

    #[test]
    fn short_series_yields_nothing() {
        assert!(find_spikes(&series_of(&[1, 2, 3]), &SpikeParams::default()).is_empty());
        assert!(find_spikes(&Series::empty("X"), &SpikeParams::default()).is_empty());
    }
}

//! Series loading on top of a worker's `BarReader`.
//!
//! A symbol with no rows in the window yields an empty `Series`. Store
//! failures are returned to the caller, which decides whether they are fatal.

use chrono::NaiveDate;
use tracing::debug;

use volscan_core::data::{BarReader, StoreError};
use volscan_core::domain::{DateRange, Series};

/// Bars for `symbol` from `lookback_days` calendar days before `as_of` up to
/// and including `as_of`.
pub fn load_series(
    reader: &mut dyn BarReader,
    symbol: &str,
    as_of: NaiveDate,
    lookback_days: u32,
) -> Result<Series, StoreError> {
    load_range(reader, symbol, &DateRange::trailing(as_of, lookback_days))
}

/// Bars for `symbol` inside an explicit range.
pub fn load_range(
    reader: &mut dyn BarReader,
    symbol: &str,
    range: &DateRange,
) -> Result<Series, StoreError> {
    let bars = reader.load(symbol, range)?;
    if bars.is_empty() {
        debug!(symbol, start = %range.start, "no bars in window");
        return Ok(Series::empty(symbol));
    }
    Ok(Series::new(symbol, bars)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use volscan_core::data::synthetic::{generate_bars, Shape};
    use volscan_core::data::{BarStore, MemoryStore};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .upsert(&generate_bars("AAA", d(2024, 1, 1), d(2024, 6, 28), Shape::Noise))
            .unwrap();
        store
    }

    #[test]
    fn trailing_window_is_calendar_days() {
        let store = store();
        let mut reader = store.reader().unwrap();
        let s = load_series(reader.as_mut(), "AAA", d(2024, 6, 28), 30).unwrap();
        assert_eq!(s.first_date(), Some(d(2024, 5, 29)));
        assert_eq!(s.last_date(), Some(d(2024, 6, 28)));
        assert!(s.bars().windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn as_of_in_the_past_excludes_later_bars() {
        let store = store();
        let mut reader = store.reader().unwrap();
        let s = load_series(reader.as_mut(), "AAA", d(2024, 3, 15), 120).unwrap();
        assert_eq!(s.last_date(), Some(d(2024, 3, 15)));
        assert_eq!(s.first_date(), Some(d(2024, 1, 1)));
    }

    #[test]
    fn unknown_symbol_is_empty_not_error() {
        let store = store();
        let mut reader = store.reader().unwrap();
        let s = load_series(reader.as_mut(), "ZZZ", d(2024, 6, 28), 120).unwrap();
        assert!(s.is_empty());
        assert_eq!(s.symbol(), "ZZZ");
    }

    #[test]
    fn bounded_range() {
        let store = store();
        let mut reader = store.reader().unwrap();
        let range = DateRange::between(d(2024, 2, 5), d(2024, 2, 9));
        let s = load_range(reader.as_mut(), "AAA", &range).unwrap();
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn access_failure_is_returned() {
        let store = store();
        store.fail_symbol("AAA");
        let mut reader = store.reader().unwrap();
        let err = load_series(reader.as_mut(), "AAA", d(2024, 6, 28), 120).unwrap_err();
        assert!(matches!(err, StoreError::Access { .. }));
    }
}

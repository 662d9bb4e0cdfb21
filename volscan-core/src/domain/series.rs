//! Series: the ordered bar history of a single symbol.

use chrono::NaiveDate;
use thiserror::Error;

use super::Bar;

/// Violations of the series invariants.
#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("bar for '{found}' on {date} does not belong to series '{expected}'")]
    MixedSymbol {
        expected: String,
        found: String,
        date: NaiveDate,
    },

    #[error("dates for '{symbol}' are not strictly increasing: {prev} then {next}")]
    NonIncreasingDate {
        symbol: String,
        prev: NaiveDate,
        next: NaiveDate,
    },
}

/// Bars for one symbol, strictly ascending by date.
///
/// Gaps between dates (weekends, holidays, suspensions) are expected.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    symbol: String,
    bars: Vec<Bar>,
}

impl Series {
    /// An empty series. Symbols without rows load as this, not as an error.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: Vec::new(),
        }
    }

    /// Build a series from bars already in ascending date order.
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self, SeriesError> {
        let symbol = symbol.into();
        check_symbol(&symbol, &bars)?;
        for pair in bars.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(SeriesError::NonIncreasingDate {
                    symbol,
                    prev: pair[0].date,
                    next: pair[1].date,
                });
            }
        }
        Ok(Self { symbol, bars })
    }

    /// Build a series from bars in any order.
    ///
    /// Sorts by date; on duplicate dates the row that appears last wins,
    /// matching upsert semantics of the stores.
    pub fn from_unsorted(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Result<Self, SeriesError> {
        let symbol = symbol.into();
        check_symbol(&symbol, &bars)?;

        // Stable sort keeps input order within a date, so the last duplicate stays last.
        bars.sort_by_key(|b| b.date);
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(prev) if prev.date == bar.date => *prev = bar,
                _ => deduped.push(bar),
            }
        }
        Ok(Self {
            symbol,
            bars: deduped,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }
}

fn check_symbol(symbol: &str, bars: &[Bar]) -> Result<(), SeriesError> {
    match bars.iter().find(|b| b.symbol != symbol) {
        Some(bad) => Err(SeriesError::MixedSymbol {
            expected: symbol.to_string(),
            found: bad.symbol.clone(),
            date: bad.date,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(symbol: &str, day: u32, close: f64) -> Bar {
        Bar {
            symbol: symbol.into(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 1_000,
            amount: close * 1_000.0,
        }
    }

    #[test]
    fn new_accepts_ascending_with_gaps() {
        let s = Series::new("AAA", vec![bar("AAA", 1, 1.0), bar("AAA", 4, 2.0)]).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.last_date(), NaiveDate::from_ymd_opt(2024, 3, 4));
    }

    #[test]
    fn new_rejects_duplicate_dates() {
        let err = Series::new("AAA", vec![bar("AAA", 1, 1.0), bar("AAA", 1, 2.0)]).unwrap_err();
        assert!(matches!(err, SeriesError::NonIncreasingDate { .. }));
    }

    #[test]
    fn new_rejects_mixed_symbols() {
        let err = Series::new("AAA", vec![bar("AAA", 1, 1.0), bar("BBB", 2, 2.0)]).unwrap_err();
        assert!(matches!(err, SeriesError::MixedSymbol { .. }));
    }

    #[test]
    fn from_unsorted_sorts_and_keeps_last_duplicate() {
        let s = Series::from_unsorted(
            "AAA",
            vec![bar("AAA", 5, 5.0), bar("AAA", 2, 2.0), bar("AAA", 5, 7.0)],
        )
        .unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.bars()[0].close, 2.0);
        assert_eq!(s.bars()[1].close, 7.0);
    }

    #[test]
    fn empty_series() {
        let s = Series::empty("AAA");
        assert!(s.is_empty());
        assert_eq!(s.symbol(), "AAA");
        assert!(s.last().is_none());
    }
}

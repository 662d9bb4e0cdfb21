//! Instruments and date ranges used by store queries.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// A member of the symbol universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_tradable")]
    pub tradable: bool,
}

fn default_tradable() -> bool {
    true
}

impl Instrument {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: None,
            tradable: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tradable(mut self, tradable: bool) -> Self {
        self.tradable = tradable;
        self
    }
}

/// `date` minus `days` calendar days, saturating at `NaiveDate::MIN`.
pub fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Inclusive date range; `end = None` means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Everything on or after `start`.
    pub fn since(start: NaiveDate) -> Self {
        Self { start, end: None }
    }

    /// `start..=end`.
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// The `lookback_days` calendar days ending at `as_of` (inclusive both ends).
    pub fn trailing(as_of: NaiveDate, lookback_days: u32) -> Self {
        Self::between(days_before(as_of, lookback_days), as_of)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.map_or(true, |end| date <= end)
    }
}

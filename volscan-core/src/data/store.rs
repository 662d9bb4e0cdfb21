//! Bar store abstraction.
//!
//! A `BarStore` is shared read-only across scan workers. Each worker asks it
//! for its own `BarReader` and keeps that one reader for all of its symbols.
//! Implementations document what a reader holds (a connection, a file
//! handle, nothing).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Bar, DateRange, Instrument, SeriesError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("invalid stored data: {0}")]
    Invalid(String),

    #[error("universe error: {0}")]
    Universe(String),

    #[error("data access failed for {symbol}: {message}")]
    Access { symbol: String, message: String },

    #[error(transparent)]
    Series(#[from] SeriesError),
}

/// Which instruments take part in a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseQuery {
    /// Skip instruments flagged as not tradable.
    #[serde(default)]
    pub tradable_only: bool,
    /// Only instruments with at least one bar on or after this date.
    #[serde(default)]
    pub active_since: Option<NaiveDate>,
}

impl UniverseQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn tradable() -> Self {
        Self {
            tradable_only: true,
            active_since: None,
        }
    }

    pub fn with_active_since(mut self, date: NaiveDate) -> Self {
        self.active_since = Some(date);
        self
    }

    /// Flag filter only; activity needs bar data and is applied by the store.
    pub fn admits(&self, instrument: &Instrument) -> bool {
        !self.tradable_only || instrument.tradable
    }
}

/// Coverage of one symbol in a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolCoverage {
    pub symbol: String,
    pub bar_count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

/// Per-worker read handle.
pub trait BarReader: Send {
    /// Bars for `symbol` inside `range`, ascending by date. An unknown symbol
    /// yields an empty vector, not an error.
    fn load(&mut self, symbol: &str, range: &DateRange) -> Result<Vec<Bar>, StoreError>;
}

pub trait BarStore: Send + Sync {
    /// Short identifier used in logs ("sqlite", "parquet", "memory").
    fn kind(&self) -> &'static str;

    /// Instruments matching `query`, sorted by symbol.
    fn instruments(&self, query: &UniverseQuery) -> Result<Vec<Instrument>, StoreError>;

    /// A fresh reader for one worker.
    fn reader(&self) -> Result<Box<dyn BarReader + '_>, StoreError>;

    /// Insert or replace bars keyed by (symbol, date). Returns rows written.
    fn upsert(&self, bars: &[Bar]) -> Result<usize, StoreError>;

    /// Insert or replace instrument metadata keyed by symbol.
    fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<usize, StoreError>;

    /// Per-symbol coverage, sorted by symbol.
    fn status(&self) -> Result<Vec<SymbolCoverage>, StoreError>;
}

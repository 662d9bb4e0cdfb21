//! CSV bar import.
//!
//! Expected header: `symbol,date,open,high,low,close,volume[,amount]`
//! (`code` is accepted for `symbol`). Volume may be written as a float;
//! a missing amount is derived as `close * volume`. Rows that fail
//! sanity checks are skipped and counted, not fatal.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::store::{BarStore, StoreError};
use crate::domain::Bar;

const BATCH_SIZE: usize = 5_000;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("read {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Deserialize)]
struct CsvBar {
    #[serde(alias = "code")]
    symbol: String,
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    amount: Option<f64>,
}

impl CsvBar {
    /// `None` for a negative or non-finite volume.
    fn into_bar(self) -> Option<Bar> {
        if !self.volume.is_finite() || self.volume < 0.0 {
            return None;
        }
        let volume = self.volume.round() as u64;
        Some(Bar {
            amount: self.amount.unwrap_or(self.close * volume as f64),
            symbol: self.symbol.trim().to_string(),
            date: self.date,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub rows: usize,
    pub imported: usize,
    pub skipped: usize,
    pub symbols: usize,
}

/// Parse bars from CSV, returning the sane ones and the count of skipped rows.
pub fn read_bars<R: Read>(reader: R) -> Result<(Vec<Bar>, usize), ImportError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars = Vec::new();
    let mut skipped = 0;
    for (line, record) in rdr.deserialize::<CsvBar>().enumerate() {
        match record {
            Ok(row) => match row.into_bar() {
                Some(bar) if !bar.symbol.is_empty() && bar.is_sane() => bars.push(bar),
                _ => skipped += 1,
            },
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping unparseable row");
                skipped += 1;
            }
        }
    }
    Ok((bars, skipped))
}

/// Import a CSV file into `store` in batches.
pub fn import_csv(store: &dyn BarStore, path: &Path) -> Result<ImportSummary, ImportError> {
    let file = std::fs::File::open(path).map_err(|source| ImportError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let (bars, skipped) = read_bars(file)?;
    let symbols: BTreeSet<&str> = bars.iter().map(|b| b.symbol.as_str()).collect();

    let mut imported = 0;
    for chunk in bars.chunks(BATCH_SIZE) {
        imported += store.upsert(chunk)?;
    }
    let summary = ImportSummary {
        rows: bars.len() + skipped,
        imported,
        skipped,
        symbols: symbols.len(),
    };
    info!(
        file = %path.display(),
        imported = summary.imported,
        skipped = summary.skipped,
        symbols = summary.symbols,
        "csv import finished"
    );
    Ok(summary)
}

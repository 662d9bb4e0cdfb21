//! In-process bar store.
//!
//! Readers borrow the store and take a shared lock per `load`. Symbols can
//! be marked as failing to exercise per-symbol error isolation.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use super::store::{BarReader, BarStore, StoreError, SymbolCoverage, UniverseQuery};
use crate::domain::{Bar, DateRange, Instrument};

#[derive(Debug, Default)]
pub struct MemoryStore {
    bars: RwLock<BTreeMap<String, BTreeMap<chrono::NaiveDate, Bar>>>,
    instruments: RwLock<BTreeMap<String, Instrument>>,
    failing: RwLock<HashSet<String>>,
    live_readers: AtomicUsize,
    peak_readers: AtomicUsize,
    loads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `load` of `symbol` fails with a data-access error from now on.
    pub fn fail_symbol(&self, symbol: impl Into<String>) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(symbol.into());
        }
    }

    /// Most readers alive at the same time since creation.
    pub fn peak_readers(&self) -> usize {
        self.peak_readers.load(Ordering::SeqCst)
    }

    /// Total `load` calls served.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

fn poisoned() -> StoreError {
    StoreError::Invalid("memory store lock poisoned".into())
}

struct MemoryReader<'a> {
    store: &'a MemoryStore,
}

impl Drop for MemoryReader<'_> {
    fn drop(&mut self) {
        self.store.live_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BarReader for MemoryReader<'_> {
    fn load(&mut self, symbol: &str, range: &DateRange) -> Result<Vec<Bar>, StoreError> {
        self.store.loads.fetch_add(1, Ordering::Relaxed);
        if self.store.failing.read().map_err(|_| poisoned())?.contains(symbol) {
            return Err(StoreError::Access {
                symbol: symbol.to_string(),
                message: "connection reset".into(),
            });
        }
        let bars = self.store.bars.read().map_err(|_| poisoned())?;
        Ok(bars
            .get(symbol)
            .map(|by_date| {
                by_date
                    .values()
                    .filter(|b| range.contains(b.date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl BarStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn instruments(&self, query: &UniverseQuery) -> Result<Vec<Instrument>, StoreError> {
        let bars = self.bars.read().map_err(|_| poisoned())?;
        let known = self.instruments.read().map_err(|_| poisoned())?;

        let mut out: Vec<Instrument> = bars
            .iter()
            .filter(|(_, by_date)| match query.active_since {
                Some(since) => by_date.keys().next_back().is_some_and(|d| *d >= since),
                None => true,
            })
            .map(|(symbol, _)| {
                known
                    .get(symbol)
                    .cloned()
                    .unwrap_or_else(|| Instrument::new(symbol.clone()))
            })
            .filter(|i| query.admits(i))
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    fn reader(&self) -> Result<Box<dyn BarReader + '_>, StoreError> {
        let live = self.live_readers.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_readers.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(MemoryReader { store: self }))
    }

    fn upsert(&self, bars: &[Bar]) -> Result<usize, StoreError> {
        let mut map = self.bars.write().map_err(|_| poisoned())?;
        for bar in bars {
            map.entry(bar.symbol.clone())
                .or_default()
                .insert(bar.date, bar.clone());
        }
        Ok(bars.len())
    }

    fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<usize, StoreError> {
        let mut map = self.instruments.write().map_err(|_| poisoned())?;
        for inst in instruments {
            map.insert(inst.symbol.clone(), inst.clone());
        }
        Ok(instruments.len())
    }

    fn status(&self) -> Result<Vec<SymbolCoverage>, StoreError> {
        let bars = self.bars.read().map_err(|_| poisoned())?;
        Ok(bars
            .iter()
            .map(|(symbol, by_date)| SymbolCoverage {
                symbol: symbol.clone(),
                bar_count: by_date.len(),
                first_date: by_date.keys().next().copied(),
                last_date: by_date.keys().next_back().copied(),
            })
            .collect())
    }
}

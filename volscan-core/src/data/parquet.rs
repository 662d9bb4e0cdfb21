//! Parquet bar store with Hive-style partitioning.
//!
//! Layout: `{root}/symbol={SYMBOL}/{year}.parquet`, a `meta.json` sidecar per
//! symbol, and an optional `{root}/universe.toml` with instrument metadata.
//!
//! - Writes go to `.tmp` and are renamed into place.
//! - Upserts merge with what is on disk; the incoming bar wins on a date clash.
//! - A partition that fails to read or validate fails the whole load for
//!   that symbol; files are never moved or rewritten on the read path.
//! - Readers hold no handle; each `load` opens only the year files that
//!   overlap the requested range.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::{BarReader, BarStore, StoreError, SymbolCoverage, UniverseQuery};
use super::universe::Universe;
use crate::domain::{Bar, DateRange, Instrument};

const UNIVERSE_FILE: &str = "universe.toml";
const EXPECTED_COLUMNS: [&str; 7] = ["date", "open", "high", "low", "close", "volume", "amount"];

/// Metadata sidecar for one stored symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub bar_count: usize,
    pub data_hash: String,
    pub written_at: chrono::NaiveDateTime,
}

pub struct ParquetStore {
    root: PathBuf,
    // serializes read-modify-write cycles of upserts
    write_lock: Mutex<()>,
}

impl ParquetStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.root.join(format!("symbol={symbol}"))
    }

    fn year_path(&self, symbol: &str, year: i32) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{year}.parquet"))
    }

    fn meta_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("meta.json")
    }

    fn universe_path(&self) -> PathBuf {
        self.root.join(UNIVERSE_FILE)
    }

    pub fn meta(&self, symbol: &str) -> Option<PartitionMeta> {
        let content = fs::read_to_string(self.meta_path(symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Symbols with a partition directory, sorted.
    fn stored_symbols(&self) -> Result<Vec<String>, StoreError> {
        let mut symbols = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(sym) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("symbol="))
            {
                symbols.push(sym.to_string());
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    fn universe(&self) -> Result<Universe, StoreError> {
        let path = self.universe_path();
        if path.exists() {
            Universe::from_file(&path)
        } else {
            Ok(Universe::default())
        }
    }

    /// Years with a partition file for `symbol`, ascending.
    fn partition_years(&self, symbol: &str) -> Result<Vec<i32>, StoreError> {
        let dir = self.symbol_dir(symbol);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut years = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            if let Some(year) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i32>().ok())
            {
                years.push(year);
            }
        }
        years.sort_unstable();
        Ok(years)
    }

    /// Read the given year partitions. One unreadable file fails the lot.
    fn read_years(&self, symbol: &str, years: &[i32]) -> Result<Vec<Bar>, StoreError> {
        let mut bars = Vec::new();
        for &year in years {
            let path = self.year_path(symbol, year);
            let part = load_and_validate_parquet(&path, symbol).map_err(|e| {
                warn!(file = %path.display(), error = %e, "unreadable partition");
                StoreError::Access {
                    symbol: symbol.to_string(),
                    message: format!("{}: {e}", path.display()),
                }
            })?;
            bars.extend(part);
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    /// Write one partition file per year present in `bars`.
    fn write_partitions(&self, symbol: &str, bars: &[Bar]) -> Result<(), StoreError> {
        fs::create_dir_all(self.symbol_dir(symbol))?;

        let mut by_year: BTreeMap<i32, Vec<&Bar>> = BTreeMap::new();
        for bar in bars {
            by_year.entry(bar.date.year()).or_default().push(bar);
        }
        for (year, year_bars) in &by_year {
            let mut df = bars_to_dataframe(year_bars)?;
            let path = self.year_path(symbol, *year);
            let tmp_path = path.with_extension("parquet.tmp");
            write_parquet(&mut df, &tmp_path)?;
            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                StoreError::Io(e)
            })?;
        }
        Ok(())
    }

    /// Refresh the sidecar from the symbol's full history.
    fn write_meta(&self, symbol: &str, all: &[Bar]) -> Result<(), StoreError> {
        let (first, last) = match (all.first(), all.last()) {
            (Some(f), Some(l)) => (f.date, l.date),
            _ => return Ok(()),
        };
        let hash_input = serde_json::to_vec(all)
            .map_err(|e| StoreError::Invalid(format!("hash serialization: {e}")))?;
        let meta = PartitionMeta {
            symbol: symbol.to_string(),
            start_date: first,
            end_date: last,
            bar_count: all.len(),
            data_hash: blake3::hash(&hash_input).to_hex().to_string(),
            written_at: chrono::Local::now().naive_local(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Invalid(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(symbol);
        let tmp_meta = meta_path.with_extension("json.tmp");
        fs::write(&tmp_meta, json)?;
        fs::rename(&tmp_meta, &meta_path)?;
        Ok(())
    }
}

struct ParquetBarReader<'a> {
    store: &'a ParquetStore,
}

impl BarReader for ParquetBarReader<'_> {
    fn load(&mut self, symbol: &str, range: &DateRange) -> Result<Vec<Bar>, StoreError> {
        let years: Vec<i32> = self
            .store
            .partition_years(symbol)?
            .into_iter()
            .filter(|y| *y >= range.start.year() && range.end.map_or(true, |e| *y <= e.year()))
            .collect();
        let mut bars = self.store.read_years(symbol, &years)?;
        bars.retain(|b| range.contains(b.date));
        Ok(bars)
    }
}

impl BarStore for ParquetStore {
    fn kind(&self) -> &'static str {
        "parquet"
    }

    fn instruments(&self, query: &UniverseQuery) -> Result<Vec<Instrument>, StoreError> {
        let universe = self.universe()?;
        let mut out = Vec::new();
        for symbol in self.stored_symbols()? {
            if let Some(since) = query.active_since {
                let last = self.meta(&symbol).map(|m| m.end_date);
                if !last.is_some_and(|d| d >= since) {
                    continue;
                }
            }
            let inst = universe
                .get(&symbol)
                .cloned()
                .unwrap_or_else(|| Instrument::new(symbol.clone()));
            if query.admits(&inst) {
                out.push(inst);
            }
        }
        Ok(out)
    }

    fn reader(&self) -> Result<Box<dyn BarReader + '_>, StoreError> {
        Ok(Box::new(ParquetBarReader { store: self }))
    }

    fn upsert(&self, bars: &[Bar]) -> Result<usize, StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Invalid("parquet write lock poisoned".into()))?;

        let mut incoming: BTreeMap<&str, Vec<&Bar>> = BTreeMap::new();
        for bar in bars {
            incoming.entry(bar.symbol.as_str()).or_default().push(bar);
        }

        for (symbol, new_bars) in incoming {
            let touched: BTreeSet<i32> = new_bars.iter().map(|b| b.date.year()).collect();
            let existing_years: Vec<i32> = self
                .partition_years(symbol)?
                .into_iter()
                .filter(|y| touched.contains(y))
                .collect();

            let mut merged: BTreeMap<NaiveDate, Bar> = self
                .read_years(symbol, &existing_years)?
                .into_iter()
                .map(|b| (b.date, b))
                .collect();
            for bar in new_bars {
                merged.insert(bar.date, bar.clone());
            }
            let merged: Vec<Bar> = merged.into_values().collect();
            self.write_partitions(symbol, &merged)?;

            let all_years = self.partition_years(symbol)?;
            self.write_meta(symbol, &self.read_years(symbol, &all_years)?)?;
            debug!(symbol, years = touched.len(), "parquet partitions rewritten");
        }
        Ok(bars.len())
    }

    fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<usize, StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Invalid("parquet write lock poisoned".into()))?;
        let mut universe = self.universe()?;
        for inst in instruments {
            universe.upsert(inst.clone());
        }
        let path = self.universe_path();
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, universe.to_toml()?)?;
        fs::rename(&tmp, &path)?;
        Ok(instruments.len())
    }

    fn status(&self) -> Result<Vec<SymbolCoverage>, StoreError> {
        Ok(self
            .stored_symbols()?
            .into_iter()
            .map(|symbol| {
                let meta = self.meta(&symbol);
                SymbolCoverage {
                    bar_count: meta.as_ref().map_or(0, |m| m.bar_count),
                    first_date: meta.as_ref().map(|m| m.start_date),
                    last_date: meta.as_ref().map(|m| m.end_date),
                    symbol,
                }
            })
            .collect())
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn parquet_err(context: &str) -> impl Fn(PolarsError) -> StoreError + '_ {
    move |e| StoreError::Parquet(format!("{context}: {e}"))
}

fn bars_to_dataframe(bars: &[&Bar]) -> Result<DataFrame, StoreError> {
    let epoch = epoch();
    let dates: Vec<i32> = bars
        .iter()
        .map(|b| (b.date - epoch).num_days() as i32)
        .collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let amounts: Vec<f64> = bars.iter().map(|b| b.amount).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(parquet_err("date cast"))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("amount".into(), amounts),
    ])
    .map_err(parquet_err("dataframe creation"))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path)?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(parquet_err("write parquet"))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path, symbol: &str) -> Result<Vec<Bar>, StoreError> {
    let file = fs::File::open(path)?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(parquet_err("read parquet"))?;

    if df.height() == 0 {
        return Err(StoreError::Invalid("empty parquet file".into()));
    }
    for col_name in EXPECTED_COLUMNS {
        if df.column(col_name).is_err() {
            return Err(StoreError::Invalid(format!("missing column '{col_name}'")));
        }
    }
    dataframe_to_bars(&df, symbol)
}

fn dataframe_to_bars(df: &DataFrame, symbol: &str) -> Result<Vec<Bar>, StoreError> {
    let date_ca = df
        .column("date")
        .and_then(|c| c.date())
        .map_err(parquet_err("date column"))?;
    let open_ca = df.column("open").and_then(|c| c.f64()).map_err(parquet_err("open column"))?;
    let high_ca = df.column("high").and_then(|c| c.f64()).map_err(parquet_err("high column"))?;
    let low_ca = df.column("low").and_then(|c| c.f64()).map_err(parquet_err("low column"))?;
    let close_ca = df.column("close").and_then(|c| c.f64()).map_err(parquet_err("close column"))?;
    let vol_ca = df.column("volume").and_then(|c| c.u64()).map_err(parquet_err("volume column"))?;
    let amount_ca = df
        .column("amount")
        .and_then(|c| c.f64())
        .map_err(parquet_err("amount column"))?;

    let epoch = epoch();
    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let days = date_ca
            .get(i)
            .ok_or_else(|| StoreError::Invalid(format!("null date at row {i}")))?;
        bars.push(Bar {
            symbol: symbol.to_string(),
            date: epoch + chrono::Duration::days(i64::from(days)),
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            amount: amount_ca.get(i).unwrap_or(0.0),
        });
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: NaiveDate, volume: u64) -> Bar {
        Bar {
            symbol: "SPY".into(),
            date,
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 101.0,
            volume,
            amount: 101.0 * volume as f64,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn write_and_load_across_years() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::open(dir.path()).unwrap();
        store
            .upsert(&[bar(d(2023, 12, 29), 10), bar(d(2024, 1, 2), 20), bar(d(2024, 1, 3), 30)])
            .unwrap();

        assert!(dir.path().join("symbol=SPY/2023.parquet").exists());
        assert!(dir.path().join("symbol=SPY/2024.parquet").exists());

        let mut reader = store.reader().unwrap();
        let all = reader.load("SPY", &DateRange::since(d(2023, 1, 1))).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].amount, 101.0 * 30.0);

        let only_2024 = reader
            .load("SPY", &DateRange::between(d(2024, 1, 1), d(2024, 1, 2)))
            .unwrap();
        assert_eq!(only_2024.len(), 1);
        assert_eq!(only_2024[0].volume, 20);
    }

    #[test]
    fn upsert_merges_with_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::open(dir.path()).unwrap();
        store.upsert(&[bar(d(2024, 1, 2), 20), bar(d(2024, 1, 3), 30)]).unwrap();
        store.upsert(&[bar(d(2024, 1, 3), 33), bar(d(2024, 1, 4), 40)]).unwrap();

        let mut reader = store.reader().unwrap();
        let bars = reader.load("SPY", &DateRange::since(d(2024, 1, 1))).unwrap();
        let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
        assert_eq!(volumes, [20, 33, 40]);

        let meta = store.meta("SPY").unwrap();
        assert_eq!(meta.bar_count, 3);
        assert_eq!(meta.end_date, d(2024, 1, 4));
    }

    #[test]
    fn corrupt_partition_fails_the_load_and_stays_put() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::open(dir.path()).unwrap();
        store
            .upsert(&[bar(d(2023, 12, 29), 10), bar(d(2024, 1, 2), 20)])
            .unwrap();
        let path = dir.path().join("symbol=SPY/2023.parquet");
        fs::write(&path, b"not parquet").unwrap();

        let mut reader = store.reader().unwrap();
        let err = reader
            .load("SPY", &DateRange::since(d(2023, 1, 1)))
            .unwrap_err();
        assert!(matches!(err, StoreError::Access { ref symbol, .. } if symbol == "SPY"));
        assert_eq!(fs::read(&path).unwrap(), b"not parquet");

        // the intact year alone still loads
        let only_2024 = reader.load("SPY", &DateRange::since(d(2024, 1, 1))).unwrap();
        assert_eq!(only_2024.len(), 1);
    }

    #[test]
    fn upsert_into_corrupt_year_aborts_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::open(dir.path()).unwrap();
        store.upsert(&[bar(d(2024, 1, 2), 20)]).unwrap();
        let path = dir.path().join("symbol=SPY/2024.parquet");
        fs::write(&path, b"not parquet").unwrap();

        assert!(store.upsert(&[bar(d(2024, 1, 3), 30)]).is_err());
        assert_eq!(fs::read(&path).unwrap(), b"not parquet");
    }

    #[test]
    fn instruments_from_universe_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::open(dir.path()).unwrap();
        store.upsert(&[bar(d(2024, 1, 2), 20)]).unwrap();
        store
            .upsert_instruments(&[Instrument::new("SPY").with_name("S&P 500 ETF")])
            .unwrap();

        let found = store.instruments(&UniverseQuery::all()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name.as_deref(), Some("S&P 500 ETF"));

        let stale = UniverseQuery::all().with_active_since(d(2025, 1, 1));
        assert!(store.instruments(&stale).unwrap().is_empty());

        let status = store.status().unwrap();
        assert_eq!(status[0].bar_count, 1);
    }
}

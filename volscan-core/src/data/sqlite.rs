//! SQLite bar store.
//!
//! Schema: `bars` keyed by (symbol, date) and `instruments` keyed by symbol.
//! Dates are stored as ISO `YYYY-MM-DD` text so range filters compare
//! lexically. The database runs in WAL mode; every reader opens its own
//! read-only connection, writers share one connection behind a mutex.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags};
use tracing::debug;

use super::store::{BarReader, BarStore, StoreError, SymbolCoverage, UniverseQuery};
use crate::domain::{Bar, DateRange, Instrument};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bars (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open REAL NOT NULL,
    high REAL NOT NULL,
    low REAL NOT NULL,
    close REAL NOT NULL,
    volume INTEGER NOT NULL,
    amount REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (symbol, date)
);

CREATE TABLE IF NOT EXISTS instruments (
    symbol TEXT PRIMARY KEY,
    name TEXT,
    tradable INTEGER NOT NULL DEFAULT 1
);
"#;

const DATE_FMT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    path: PathBuf,
    writer: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = %path.display(), "opened sqlite bar store");
        Ok(Self {
            path,
            writer: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Invalid("sqlite writer lock poisoned".into()))
    }
}

fn parse_date(idx: usize, text: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&text, DATE_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_bar(row: &rusqlite::Row) -> rusqlite::Result<Bar> {
    let volume: i64 = row.get(6)?;
    Ok(Bar {
        symbol: row.get(0)?,
        date: parse_date(1, row.get(1)?)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: volume.max(0) as u64,
        amount: row.get(7)?,
    })
}

fn row_to_instrument(row: &rusqlite::Row) -> rusqlite::Result<Instrument> {
    let tradable: i64 = row.get(2)?;
    Ok(Instrument {
        symbol: row.get(0)?,
        name: row.get(1)?,
        tradable: tradable != 0,
    })
}

struct SqliteReader {
    conn: Connection,
}

impl BarReader for SqliteReader {
    fn load(&mut self, symbol: &str, range: &DateRange) -> Result<Vec<Bar>, StoreError> {
        let start = range.start.format(DATE_FMT).to_string();
        let bars = match range.end {
            Some(end) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT symbol, date, open, high, low, close, volume, amount
                     FROM bars WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
                     ORDER BY date ASC",
                )?;
                let rows = stmt.query_map(
                    params![symbol, start, end.format(DATE_FMT).to_string()],
                    row_to_bar,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT symbol, date, open, high, low, close, volume, amount
                     FROM bars WHERE symbol = ?1 AND date >= ?2
                     ORDER BY date ASC",
                )?;
                let rows = stmt.query_map(params![symbol, start], row_to_bar)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(bars)
    }
}

impl BarStore for SqliteStore {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn instruments(&self, query: &UniverseQuery) -> Result<Vec<Instrument>, StoreError> {
        let conn = self.lock()?;
        let since = query
            .active_since
            .map(|d| d.format(DATE_FMT).to_string())
            .unwrap_or_default();
        let mut stmt = conn.prepare(
            "SELECT b.symbol, i.name, COALESCE(i.tradable, 1)
             FROM (SELECT symbol FROM bars GROUP BY symbol HAVING MAX(date) >= ?1) b
             LEFT JOIN instruments i ON i.symbol = b.symbol
             ORDER BY b.symbol",
        )?;
        let rows = stmt.query_map(params![since], row_to_instrument)?;
        let mut out = Vec::new();
        for inst in rows {
            let inst = inst?;
            if query.admits(&inst) {
                out.push(inst);
            }
        }
        Ok(out)
    }

    fn reader(&self) -> Result<Box<dyn BarReader + '_>, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Box::new(SqliteReader { conn }))
    }

    fn upsert(&self, bars: &[Bar]) -> Result<usize, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO bars (symbol, date, open, high, low, close, volume, amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(symbol, date) DO UPDATE SET
                    open = excluded.open, high = excluded.high, low = excluded.low,
                    close = excluded.close, volume = excluded.volume, amount = excluded.amount",
            )?;
            for bar in bars {
                let volume = i64::try_from(bar.volume).map_err(|_| {
                    StoreError::Invalid(format!("volume overflow for {} on {}", bar.symbol, bar.date))
                })?;
                stmt.execute(params![
                    bar.symbol,
                    bar.date.format(DATE_FMT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    volume,
                    bar.amount,
                ])?;
            }
        }
        tx.commit()?;
        debug!(rows = bars.len(), "upserted bars");
        Ok(bars.len())
    }

    fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO instruments (symbol, name, tradable) VALUES (?1, ?2, ?3)
                 ON CONFLICT(symbol) DO UPDATE SET name = excluded.name, tradable = excluded.tradable",
            )?;
            for inst in instruments {
                stmt.execute(params![inst.symbol, inst.name, inst.tradable as i64])?;
            }
        }
        tx.commit()?;
        Ok(instruments.len())
    }

    fn status(&self) -> Result<Vec<SymbolCoverage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT symbol, COUNT(*), MIN(date), MAX(date) FROM bars GROUP BY symbol ORDER BY symbol",
        )?;
        let rows = stmt.query_map([], |row| {
            let count: i64 = row.get(1)?;
            Ok(SymbolCoverage {
                symbol: row.get(0)?,
                bar_count: count.max(0) as usize,
                first_date: Some(parse_date(2, row.get(2)?)?),
                last_date: Some(parse_date(3, row.get(3)?)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

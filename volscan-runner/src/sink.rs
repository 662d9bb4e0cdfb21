//! Result sinks.
//!
//! A sink owns every result row for a scan date. Batch scans call `replace`
//! once; streaming scans call `begin` and then `append` per match. Both paths
//! leave exactly the matches of the latest scan for that date, so a re-run
//! is idempotent.
//!
//! One failing row never takes the others with it: `replace` reports how
//! many rows it wrote and logs the rest.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::{debug, error};

use volscan_core::screen::ScreenResult;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("rejected row for {symbol}: {message}")]
    Row { symbol: String, message: String },
}

pub trait ResultSink: Send {
    /// Short identifier used in logs.
    fn kind(&self) -> &'static str;

    /// Replace every row for `as_of` with `results`. Returns rows written;
    /// rows that failed individually are logged and not counted.
    fn replace(&mut self, as_of: NaiveDate, results: &[ScreenResult]) -> Result<usize, SinkError>;

    /// Drop all rows for `as_of` ahead of a streaming scan.
    fn begin(&mut self, as_of: NaiveDate) -> Result<(), SinkError>;

    /// Add or overwrite one row for `as_of`.
    fn append(&mut self, as_of: NaiveDate, result: &ScreenResult) -> Result<(), SinkError>;
}

const DATE_FMT: &str = "%Y-%m-%d";

// ─── SQLite ──────────────────────────────────────────────────────────

const RESULTS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS screen_results (
    scan_date TEXT NOT NULL,
    symbol TEXT NOT NULL,
    name TEXT,
    bar_date TEXT NOT NULL,
    quiet_cv REAL NOT NULL,
    baseline REAL NOT NULL,
    peak_ratio REAL NOT NULL,
    trend_slope REAL NOT NULL,
    rising_days INTEGER NOT NULL,
    breakout_date TEXT NOT NULL,
    latest_close REAL NOT NULL,
    ma_short REAL,
    ma_long REAL,
    PRIMARY KEY (scan_date, symbol)
);
"#;

const INSERT_SQL: &str = "INSERT OR REPLACE INTO screen_results
    (scan_date, symbol, name, bar_date, quiet_cv, baseline, peak_ratio, trend_slope,
     rising_days, breakout_date, latest_close, ma_short, ma_long)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

/// Results in the `screen_results` table, keyed by (scan_date, symbol).
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(RESULTS_SQL)?;
        Ok(Self { conn })
    }

    /// Rows stored for `as_of`, sorted by symbol.
    pub fn results_for(&self, as_of: NaiveDate) -> Result<Vec<ScreenResult>, SinkError> {
        let mut stmt = self.conn.prepare(
            "SELECT symbol, name, bar_date, quiet_cv, baseline, peak_ratio, trend_slope,
                    rising_days, breakout_date, latest_close, ma_short, ma_long
             FROM screen_results WHERE scan_date = ?1 ORDER BY symbol",
        )?;
        let rows = stmt.query_map(params![as_of.format(DATE_FMT).to_string()], |row| {
            let rising: i64 = row.get(7)?;
            Ok(ScreenResult {
                symbol: row.get(0)?,
                name: row.get(1)?,
                as_of: parse_date(2, row.get(2)?)?,
                quiet_cv: row.get(3)?,
                baseline: row.get(4)?,
                peak_ratio: row.get(5)?,
                trend_slope: row.get(6)?,
                rising_days: rising.max(0) as usize,
                breakout_date: parse_date(8, row.get(8)?)?,
                latest_close: row.get(9)?,
                ma_short: row.get(10)?,
                ma_long: row.get(11)?,
            })
        })?;
        let out = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(out)
    }
}

fn parse_date(idx: usize, text: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&text, DATE_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn insert_row(conn: &Connection, as_of: NaiveDate, r: &ScreenResult) -> Result<(), SinkError> {
    let mut stmt = conn.prepare_cached(INSERT_SQL)?;
    stmt.execute(params![
        as_of.format(DATE_FMT).to_string(),
        r.symbol,
        r.name,
        r.as_of.format(DATE_FMT).to_string(),
        r.quiet_cv,
        r.baseline,
        r.peak_ratio,
        r.trend_slope,
        r.rising_days as i64,
        r.breakout_date.format(DATE_FMT).to_string(),
        r.latest_close,
        r.ma_short,
        r.ma_long,
    ])
    .map_err(|e| SinkError::Row {
        symbol: r.symbol.clone(),
        message: e.to_string(),
    })?;
    Ok(())
}

impl ResultSink for SqliteSink {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn replace(&mut self, as_of: NaiveDate, results: &[ScreenResult]) -> Result<usize, SinkError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM screen_results WHERE scan_date = ?1",
            params![as_of.format(DATE_FMT).to_string()],
        )?;
        let mut written = 0;
        for r in results {
            // a failed statement rolls back only itself
            match insert_row(&tx, as_of, r) {
                Ok(()) => written += 1,
                Err(e) => error!(symbol = %r.symbol, error = %e, "failed to persist result"),
            }
        }
        tx.commit()?;
        debug!(%as_of, written, "replaced scan results");
        Ok(written)
    }

    fn begin(&mut self, as_of: NaiveDate) -> Result<(), SinkError> {
        self.conn.execute(
            "DELETE FROM screen_results WHERE scan_date = ?1",
            params![as_of.format(DATE_FMT).to_string()],
        )?;
        Ok(())
    }

    fn append(&mut self, as_of: NaiveDate, result: &ScreenResult) -> Result<(), SinkError> {
        insert_row(&self.conn, as_of, result)
    }
}

// ─── CSV ─────────────────────────────────────────────────────────────

const CSV_HEADER: [&str; 12] = [
    "symbol",
    "name",
    "as_of",
    "quiet_cv",
    "baseline",
    "peak_ratio",
    "trend_slope",
    "rising_days",
    "breakout_date",
    "latest_close",
    "ma_short",
    "ma_long",
];

/// One CSV file per scan date: `{dir}/screen_{YYYY-MM-DD}.csv`.
///
/// `replace` writes a temp file and renames it over the old one, so readers
/// never see a half-written scan.
pub struct CsvSink {
    dir: PathBuf,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, as_of: NaiveDate) -> PathBuf {
        self.dir.join(format!("screen_{}.csv", as_of.format(DATE_FMT)))
    }

    /// Rows in the file for `as_of`; empty if there is no file.
    pub fn results_for(&self, as_of: NaiveDate) -> Result<Vec<ScreenResult>, SinkError> {
        let path = self.path_for(as_of);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut rdr = csv::Reader::from_path(&path)?;
        let mut out = Vec::new();
        for row in rdr.deserialize() {
            out.push(row?);
        }
        Ok(out)
    }

    fn writer<W: std::io::Write>(inner: W) -> csv::Writer<W> {
        csv::WriterBuilder::new().has_headers(false).from_writer(inner)
    }
}

impl ResultSink for CsvSink {
    fn kind(&self) -> &'static str {
        "csv"
    }

    fn replace(&mut self, as_of: NaiveDate, results: &[ScreenResult]) -> Result<usize, SinkError> {
        let path = self.path_for(as_of);
        let tmp = path.with_extension("csv.tmp");

        let mut written = 0;
        {
            let mut wtr = Self::writer(fs::File::create(&tmp)?);
            wtr.write_record(CSV_HEADER)?;
            for r in results {
                match wtr.serialize(r) {
                    Ok(()) => written += 1,
                    Err(e) => error!(symbol = %r.symbol, error = %e, "failed to persist result"),
                }
            }
            wtr.flush()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), written, "replaced scan results");
        Ok(written)
    }

    fn begin(&mut self, as_of: NaiveDate) -> Result<(), SinkError> {
        self.replace(as_of, &[]).map(|_| ())
    }

    fn append(&mut self, as_of: NaiveDate, result: &ScreenResult) -> Result<(), SinkError> {
        let path = self.path_for(as_of);
        if !path.exists() {
            self.begin(as_of)?;
        }

        // a repeated symbol rewrites the file with that row swapped in
        let mut rows = self.results_for(as_of)?;
        if let Some(slot) = rows.iter_mut().find(|r| r.symbol == result.symbol) {
            *slot = result.clone();
            let written = self.replace(as_of, &rows)?;
            if written < rows.len() {
                return Err(SinkError::Row {
                    symbol: result.symbol.clone(),
                    message: format!("rewrote {written} of {} rows", rows.len()),
                });
            }
            return Ok(());
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        let mut wtr = Self::writer(file);
        wtr.serialize(result).map_err(|e| SinkError::Row {
            symbol: result.symbol.clone(),
            message: e.to_string(),
        })?;
        wtr.flush()?;
        Ok(())
    }
}

// ─── Memory ──────────────────────────────────────────────────────────

/// In-process sink keyed by scan date, with injectable row failures.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: BTreeMap<NaiveDate, BTreeMap<String, ScreenResult>>,
    failing: HashSet<String>,
    writes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write of a result for `symbol` fails from now on.
    pub fn fail_symbol(&mut self, symbol: impl Into<String>) {
        self.failing.insert(symbol.into());
    }

    /// Rows for `as_of`, sorted by symbol.
    pub fn results_for(&self, as_of: NaiveDate) -> Vec<ScreenResult> {
        self.rows
            .get(&as_of)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total successful row writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn put(&mut self, as_of: NaiveDate, result: &ScreenResult) -> Result<(), SinkError> {
        if self.failing.contains(&result.symbol) {
            return Err(SinkError::Row {
                symbol: result.symbol.clone(),
                message: "write refused".into(),
            });
        }
        self.rows
            .entry(as_of)
            .or_default()
            .insert(result.symbol.clone(), result.clone());
        self.writes += 1;
        Ok(())
    }
}

impl ResultSink for MemorySink {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn replace(&mut self, as_of: NaiveDate, results: &[ScreenResult]) -> Result<usize, SinkError> {
        self.rows.insert(as_of, BTreeMap::new());
        let mut written = 0;
        for r in results {
            match self.put(as_of, r) {
                Ok(()) => written += 1,
                Err(e) => error!(symbol = %r.symbol, error = %e, "failed to persist result"),
            }
        }
        Ok(written)
    }

    fn begin(&mut self, as_of: NaiveDate) -> Result<(), SinkError> {
        self.rows.insert(as_of, BTreeMap::new());
        Ok(())
    }

    fn append(&mut self, as_of: NaiveDate, result: &ScreenResult) -> Result<(), SinkError> {
        self.put(as_of, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn result(symbol: &str, ratio: f64) -> ScreenResult {
        ScreenResult {
            symbol: symbol.into(),
            name: Some(format!("{symbol} Corp")),
            as_of: d(2024, 6, 27),
            quiet_cv: 0.12,
            baseline: 1000.0,
            peak_ratio: ratio,
            trend_slope: 150.0,
            rising_days: 8,
            breakout_date: d(2024, 6, 20),
            latest_close: 12.5,
            ma_short: Some(12.4),
            ma_long: None,
        }
    }

    #[test]
    fn memory_sink_replace_then_stream() {
        let mut sink = MemorySink::new();
        let day = d(2024, 6, 28);
        let other = d(2024, 6, 27);

        sink.replace(other, &[result("KEEP", 5.0)]).unwrap();
        assert_eq!(sink.replace(day, &[result("A", 3.5), result("B", 4.0)]).unwrap(), 2);
        // a re-run replaces, never merges
        assert_eq!(sink.replace(day, &[result("B", 4.0)]).unwrap(), 1);
        assert_eq!(sink.results_for(day), vec![result("B", 4.0)]);

        sink.begin(day).unwrap();
        sink.append(day, &result("C", 3.1)).unwrap();
        sink.append(day, &result("A", 3.5)).unwrap();
        assert_eq!(sink.results_for(day), vec![result("A", 3.5), result("C", 3.1)]);
        assert_eq!(sink.results_for(other), vec![result("KEEP", 5.0)]);
    }

    #[test]
    fn memory_sink_isolates_row_failures() {
        let mut sink = MemorySink::new();
        sink.fail_symbol("BAD");
        let day = d(2024, 6, 28);
        let written = sink
            .replace(day, &[result("A", 3.5), result("BAD", 9.0), result("C", 3.0)])
            .unwrap();
        assert_eq!(written, 2);
        let symbols: Vec<String> = sink.results_for(day).into_iter().map(|r| r.symbol).collect();
        assert_eq!(symbols, vec!["A", "C"]);
        assert!(sink.append(day, &result("BAD", 9.0)).is_err());
    }

    #[test]
    fn sqlite_sink_contract() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SqliteSink::open(dir.path().join("results.db")).unwrap();
        let day = d(2024, 6, 28);
        sink.replace(day, &[result("A", 3.5), result("B", 4.0)]).unwrap();
        sink.replace(day, &[result("B", 4.0)]).unwrap();
        assert_eq!(sink.results_for(day).unwrap(), vec![result("B", 4.0)]);

        sink.begin(day).unwrap();
        sink.append(day, &result("C", 3.1)).unwrap();
        sink.append(day, &result("C", 3.2)).unwrap();
        assert_eq!(sink.results_for(day).unwrap(), vec![result("C", 3.2)]);
    }

    #[test]
    fn sqlite_sink_isolates_row_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SqliteSink::open(dir.path().join("results.db")).unwrap();
        let day = d(2024, 6, 28);
        // NaN is stored as NULL and trips the NOT NULL constraint
        let mut bad = result("BAD", 3.0);
        bad.quiet_cv = f64::NAN;
        let written = sink.replace(day, &[result("A", 3.5), bad, result("C", 3.0)]).unwrap();
        assert_eq!(written, 2);
        let symbols: Vec<String> = sink
            .results_for(day)
            .unwrap()
            .into_iter()
            .map(|r| r.symbol)
            .collect();
        assert_eq!(symbols, vec!["A", "C"]);
    }

    #[test]
    fn sqlite_sink_keeps_other_dates() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SqliteSink::open(dir.path().join("results.db")).unwrap();
        sink.replace(d(2024, 6, 27), &[result("OLD", 3.0)]).unwrap();
        sink.replace(d(2024, 6, 28), &[]).unwrap();
        assert_eq!(sink.results_for(d(2024, 6, 27)).unwrap().len(), 1);
        assert!(sink.results_for(d(2024, 6, 28)).unwrap().is_empty());
    }

    #[test]
    fn csv_sink_replace_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path()).unwrap();
        let day = d(2024, 6, 28);

        sink.replace(day, &[result("A", 3.5), result("B", 4.0)]).unwrap();
        sink.replace(day, &[result("B", 4.0)]).unwrap();
        assert_eq!(sink.results_for(day).unwrap(), vec![result("B", 4.0)]);
        assert!(!sink.path_for(day).with_extension("csv.tmp").exists());

        sink.begin(day).unwrap();
        assert!(sink.results_for(day).unwrap().is_empty());
        sink.append(day, &result("C", 3.1)).unwrap();
        sink.append(day, &result("D", 3.3)).unwrap();
        let symbols: Vec<String> = sink
            .results_for(day)
            .unwrap()
            .into_iter()
            .map(|r| r.symbol)
            .collect();
        assert_eq!(symbols, vec!["C", "D"]);

        // appending a symbol again overwrites its row
        sink.append(day, &result("C", 5.0)).unwrap();
        let rows = sink.results_for(day).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], result("C", 5.0));
        assert_eq!(rows[1], result("D", 3.3));

        let header = fs::read_to_string(sink.path_for(day)).unwrap();
        assert!(header.starts_with("symbol,name,as_of,quiet_cv"));
    }
}

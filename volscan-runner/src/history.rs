//! Append-only JSONL log of completed scans.
//!
//! One line per scan with its counts and matched symbols, so scan dates and
//! parameter sets can be compared without re-reading the sink.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::ConfigHash;
use crate::scan::ScanReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub recorded_at: NaiveDateTime,
    pub as_of: NaiveDate,
    pub config_hash: ConfigHash,
    /// Preset name, when the scan started from one.
    #[serde(default)]
    pub preset: Option<String>,
    pub store: String,
    pub total: usize,
    pub matched: usize,
    pub rejected: usize,
    pub insufficient: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub sink_failures: usize,
    pub elapsed_secs: f64,
    pub symbols: Vec<String>,
}

impl HistoryEntry {
    pub fn from_report(report: &ScanReport, store: &str, preset: Option<&str>) -> Self {
        Self {
            recorded_at: chrono::Utc::now().naive_utc(),
            as_of: report.as_of,
            config_hash: report.config_hash.clone(),
            preset: preset.map(str::to_string),
            store: store.to_string(),
            total: report.total,
            matched: report.matched,
            rejected: report.rejected,
            insufficient: report.insufficient,
            failed: report.failed,
            cancelled: report.cancelled,
            sink_failures: report.sink_failures,
            elapsed_secs: report.elapsed_secs,
            symbols: report.results.iter().map(|r| r.symbol.clone()).collect(),
        }
    }
}

pub struct ScanHistory {
    path: PathBuf,
}

impl ScanHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, entry: &HistoryEntry) -> io::Result<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Every readable entry, oldest first. Malformed lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<HistoryEntry>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut entries = Vec::new();
        for line in io::BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<HistoryEntry>(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Most recent entry for a scan date.
    pub fn latest_for(&self, as_of: NaiveDate) -> io::Result<Option<HistoryEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .find(|e| e.as_of == as_of))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn report(day: u32, matched: &[&str]) -> ScanReport {
        let as_of = NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        ScanReport {
            as_of,
            config_hash: "abc".into(),
            total: 10,
            matched: matched.len(),
            rejected: 10 - matched.len(),
            insufficient: 1,
            failed: 0,
            cancelled: 0,
            sink_failures: 0,
            elapsed_secs: 0.5,
            rejections: BTreeMap::new(),
            results: matched
                .iter()
                .map(|s| volscan_core::screen::ScreenResult {
                    symbol: s.to_string(),
                    name: None,
                    as_of,
                    quiet_cv: 0.1,
                    baseline: 100.0,
                    peak_ratio: 3.5,
                    trend_slope: 10.0,
                    rising_days: 5,
                    breakout_date: as_of,
                    latest_close: 10.0,
                    ma_short: Some(10.0),
                    ma_long: Some(10.0),
                })
                .collect(),
            failures: Vec::new(),
        }
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let history = ScanHistory::new(dir.path().join("nested").join("scans.jsonl"));
        assert!(history.read_all().unwrap().is_empty());

        history
            .append(&HistoryEntry::from_report(&report(27, &["A"]), "memory", Some("canonical")))
            .unwrap();
        history
            .append(&HistoryEntry::from_report(&report(28, &["A", "B"]), "memory", None))
            .unwrap();
        history
            .append(&HistoryEntry::from_report(&report(28, &["C"]), "memory", None))
            .unwrap();

        let all = history.read_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].preset.as_deref(), Some("canonical"));
        assert_eq!(all[1].symbols, vec!["A", "B"]);

        let latest = history
            .latest_for(NaiveDate::from_ymd_opt(2024, 6, 28).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(latest.symbols, vec!["C"]);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.jsonl");
        let history = ScanHistory::new(&path);
        history
            .append(&HistoryEntry::from_report(&report(28, &[]), "sqlite", None))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();

        assert_eq!(history.read_all().unwrap().len(), 1);
    }
}

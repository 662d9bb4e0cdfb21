//! volscan runner: everything around a single classification.
//!
//! - Scan configuration, named presets and config fingerprints
//! - Series loading through a worker's store reader
//! - The scan orchestrator (bounded worker pool, cancellation, progress)
//! - Result sinks (SQLite, CSV, memory)
//! - JSONL scan history

pub mod config;
pub mod history;
pub mod loader;
pub mod scan;
pub mod sink;

pub use config::{ConfigError, ConfigHash, ScanConfig, ScanSettings, SinkMode, PRESET_NAMES};
pub use history::{HistoryEntry, ScanHistory};
pub use loader::{load_range, load_series};
pub use scan::{ScanError, ScanProgress, ScanReport, Scanner, SymbolFailure, SymbolOutcome};
pub use sink::{CsvSink, MemorySink, ResultSink, SinkError, SqliteSink};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn scanner_is_shareable_across_workers() {
        assert_send::<Scanner>();
        assert_sync::<Scanner>();
        assert_send::<ScanConfig>();
        assert_sync::<ScanConfig>();
    }

    #[test]
    fn sinks_can_move_to_the_consumer_thread() {
        assert_send::<SqliteSink>();
        assert_send::<CsvSink>();
        assert_send::<MemorySink>();
        assert_send::<Box<dyn ResultSink>>();
    }

    #[test]
    fn reports_are_send_sync() {
        assert_send::<ScanReport>();
        assert_sync::<ScanReport>();
        assert_send::<ScanProgress>();
    }
}

//! Scan orchestration.
//!
//! One scan evaluates every symbol of the universe on a private rayon pool
//! sized to `workers`. Each pool worker opens one `BarReader` and keeps it
//! for the symbols it processes, so the store never sees more readers than
//! workers. Per-symbol failures end up in the report; only failing to list
//! the universe or to open the store aborts the scan.
//!
//! Results are collected in universe order, so the report and the persisted
//! rows do not depend on which worker finished first.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Instant;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use volscan_core::data::{BarReader, BarStore, StoreError};
use volscan_core::domain::Instrument;
use volscan_core::features::FeatureSeries;
use volscan_core::screen::{PatternClassifier, RejectReason, ScreenResult, Verdict};

use crate::config::{ConfigError, ConfigHash, ScanConfig, SinkMode};
use crate::loader::load_series;
use crate::sink::{ResultSink, SinkError};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to enumerate universe: {0}")]
    Universe(#[source] StoreError),

    #[error("failed to open store: {0}")]
    Store(#[source] StoreError),

    #[error("failed to prepare sink: {0}")]
    Sink(#[from] SinkError),

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

/// What happened to one symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolOutcome {
    Matched(ScreenResult),
    Rejected(RejectReason),
    /// The store could not serve the symbol.
    Failed(String),
    /// The scan was cancelled before the symbol was started.
    Cancelled,
}

/// Progress snapshot handed to the progress callback after each symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub done: usize,
    pub total: usize,
    pub matched: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: String,
}

/// Summary of a finished (or cancelled) scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub as_of: NaiveDate,
    pub config_hash: ConfigHash,
    pub total: usize,
    pub matched: usize,
    /// Rejections of any kind, including insufficient data.
    pub rejected: usize,
    pub insufficient: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Matches the sink did not persist.
    pub sink_failures: usize,
    pub elapsed_secs: f64,
    /// Rejection counts keyed by `RejectReason::label`.
    pub rejections: BTreeMap<String, usize>,
    /// Matches in universe order.
    pub results: Vec<ScreenResult>,
    pub failures: Vec<SymbolFailure>,
}

impl ScanReport {
    pub fn was_cancelled(&self) -> bool {
        self.cancelled > 0
    }
}

pub struct Scanner {
    config: ScanConfig,
    classifier: PatternClassifier,
}

impl Scanner {
    /// Validates `config` up front so a bad parameter set never reaches the pool.
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;
        let classifier = PatternClassifier::new(config.classifier.clone());
        Ok(Self { config, classifier })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// The configured scan date, or today.
    pub fn as_of(&self) -> NaiveDate {
        self.config
            .scan
            .as_of
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Load, featurize and classify one symbol.
    pub fn evaluate(
        &self,
        reader: &mut dyn BarReader,
        instrument: &Instrument,
        as_of: NaiveDate,
    ) -> SymbolOutcome {
        let symbol = instrument.symbol.as_str();
        let series = match load_series(reader, symbol, as_of, self.config.scan.lookback_days) {
            Ok(series) => series,
            Err(e) => {
                error!(symbol, error = %e, "data access failed");
                return SymbolOutcome::Failed(e.to_string());
            }
        };

        let params = self.classifier.params();
        let features = FeatureSeries::new(series, params.ma_short, params.ma_long);
        match self.classifier.classify(&features) {
            Verdict::Accept(result) => {
                info!(
                    symbol,
                    peak_ratio = result.peak_ratio,
                    slope = result.trend_slope,
                    "pattern matched"
                );
                SymbolOutcome::Matched(result.with_name(instrument.name.clone()))
            }
            Verdict::Reject(reason) => {
                if reason.is_insufficient() {
                    info!(symbol, %reason, "skipped");
                } else {
                    debug!(symbol, %reason, "rejected");
                }
                SymbolOutcome::Rejected(reason)
            }
        }
    }

    /// Scan the universe and hand the matches to `sink`.
    ///
    /// `cancel` stops scheduling new symbols; symbols already being evaluated
    /// finish. A cancelled batch scan leaves the sink untouched.
    pub fn run(
        &self,
        store: &dyn BarStore,
        sink: &mut dyn ResultSink,
        cancel: Option<&AtomicBool>,
        progress: Option<&(dyn Fn(&ScanProgress) + Sync)>,
    ) -> Result<ScanReport, ScanError> {
        let start = Instant::now();
        let settings = &self.config.scan;
        let as_of = self.as_of();
        let config_hash = self.config.fingerprint();

        let universe = store
            .instruments(&settings.universe_query(as_of))
            .map_err(ScanError::Universe)?;
        // fail fast if no reader can be opened at all
        drop(store.reader().map_err(ScanError::Store)?);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.workers)
            .thread_name(|i| format!("volscan-worker-{i}"))
            .build()
            .map_err(|e| ScanError::Pool(e.to_string()))?;

        info!(
            %as_of,
            symbols = universe.len(),
            workers = settings.workers,
            store = store.kind(),
            sink = sink.kind(),
            config = %config_hash,
            "scan started"
        );

        let tally = Tally::new(universe.len(), settings.progress_every, start);
        let (outcomes, streamed_failures) = match settings.sink_mode {
            SinkMode::Batch => {
                let outcomes = pool.install(|| {
                    self.evaluate_all(store, &universe, as_of, None, cancel, &tally, progress)
                });
                (outcomes, None)
            }
            SinkMode::Streaming => {
                sink.begin(as_of)?;
                let (tx, rx) = mpsc::channel::<ScreenResult>();
                let consumer_sink = &mut *sink;
                std::thread::scope(|scope| {
                    let consumer = scope.spawn(move || {
                        let mut failures = 0usize;
                        for result in rx {
                            if let Err(e) = consumer_sink.append(as_of, &result) {
                                error!(symbol = %result.symbol, error = %e, "failed to persist result");
                                failures += 1;
                            }
                        }
                        failures
                    });
                    let outcomes = pool.install(|| {
                        self.evaluate_all(store, &universe, as_of, Some(&tx), cancel, &tally, progress)
                    });
                    drop(tx);
                    let failures = consumer.join().unwrap_or_else(|_| {
                        error!("sink consumer panicked");
                        usize::MAX
                    });
                    (outcomes, Some(failures))
                })
            }
        };

        let mut report = ScanReport {
            as_of,
            config_hash,
            total: universe.len(),
            matched: 0,
            rejected: 0,
            insufficient: 0,
            failed: 0,
            cancelled: 0,
            sink_failures: 0,
            elapsed_secs: 0.0,
            rejections: BTreeMap::new(),
            results: Vec::new(),
            failures: Vec::new(),
        };
        for (instrument, outcome) in universe.iter().zip(outcomes) {
            match outcome {
                SymbolOutcome::Matched(result) => report.results.push(result),
                SymbolOutcome::Rejected(reason) => {
                    report.rejected += 1;
                    if reason.is_insufficient() {
                        report.insufficient += 1;
                    }
                    *report.rejections.entry(reason.label().to_string()).or_default() += 1;
                }
                SymbolOutcome::Failed(error) => report.failures.push(SymbolFailure {
                    symbol: instrument.symbol.clone(),
                    error,
                }),
                SymbolOutcome::Cancelled => report.cancelled += 1,
            }
        }
        report.matched = report.results.len();
        report.failed = report.failures.len();

        report.sink_failures = match streamed_failures {
            Some(failures) => failures.min(report.matched),
            None if report.was_cancelled() => {
                warn!(cancelled = report.cancelled, "scan cancelled; results not persisted");
                0
            }
            None => match sink.replace(as_of, &report.results) {
                Ok(written) => report.matched.saturating_sub(written),
                Err(e) => {
                    error!(error = %e, "failed to persist scan results");
                    report.matched
                }
            },
        };
        report.elapsed_secs = start.elapsed().as_secs_f64();

        info!(
            %as_of,
            total = report.total,
            matched = report.matched,
            rejected = report.rejected,
            insufficient = report.insufficient,
            failed = report.failed,
            cancelled = report.cancelled,
            sink_failures = report.sink_failures,
            elapsed_secs = report.elapsed_secs,
            "scan finished"
        );
        Ok(report)
    }

    /// Runs inside the pool. Returns one outcome per instrument, in order.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_all(
        &self,
        store: &dyn BarStore,
        universe: &[Instrument],
        as_of: NaiveDate,
        stream: Option<&mpsc::Sender<ScreenResult>>,
        cancel: Option<&AtomicBool>,
        tally: &Tally,
        progress: Option<&(dyn Fn(&ScanProgress) + Sync)>,
    ) -> Vec<SymbolOutcome> {
        universe
            .par_iter()
            .map_init(
                || (store.reader(), stream.cloned()),
                |(reader, stream), instrument| {
                    if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                        return SymbolOutcome::Cancelled;
                    }
                    let outcome = match reader {
                        Ok(reader) => self.evaluate(reader.as_mut(), instrument, as_of),
                        Err(e) => {
                            error!(symbol = %instrument.symbol, error = %e, "no store reader");
                            SymbolOutcome::Failed(format!("store reader unavailable: {e}"))
                        }
                    };
                    if let (SymbolOutcome::Matched(result), Some(tx)) = (&outcome, stream.as_ref()) {
                        // the consumer only hangs up if it panicked
                        let _ = tx.send(result.clone());
                    }
                    tally.record(&outcome, progress);
                    outcome
                },
            )
            .collect()
    }
}

/// Shared progress counters; workers never block on each other here.
struct Tally {
    total: usize,
    every: usize,
    start: Instant,
    done: AtomicUsize,
    matched: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn new(total: usize, every: usize, start: Instant) -> Self {
        Self {
            total,
            every,
            start,
            done: AtomicUsize::new(0),
            matched: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn record(&self, outcome: &SymbolOutcome, progress: Option<&(dyn Fn(&ScanProgress) + Sync)>) {
        match outcome {
            SymbolOutcome::Matched(_) => {
                self.matched.fetch_add(1, Ordering::SeqCst);
            }
            SymbolOutcome::Failed(_) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let log_now = self.every > 0 && (done % self.every == 0 || done == self.total);
        if !log_now && progress.is_none() {
            return;
        }

        let snapshot = ScanProgress {
            done,
            total: self.total,
            matched: self.matched.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            elapsed_secs: self.start.elapsed().as_secs_f64(),
        };
        if log_now {
            info!(
                done = snapshot.done,
                total = snapshot.total,
                matched = snapshot.matched,
                failed = snapshot.failed,
                elapsed_secs = snapshot.elapsed_secs,
                "scan progress"
            );
        }
        if let Some(cb) = progress {
            cb(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use volscan_core::data::synthetic::{generate_bars, Shape};
    use volscan_core::data::MemoryStore;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn config(workers: usize) -> ScanConfig {
        let mut config = ScanConfig::default();
        config.scan.workers = workers;
        config.scan.as_of = Some(d(2024, 6, 28));
        config
    }

    fn planted() -> Shape {
        Shape::Breakout {
            quiet_days: 60,
            breakout_days: 10,
        }
    }

    #[test]
    fn evaluate_reports_each_outcome_kind() {
        let store = MemoryStore::new();
        store
            .upsert(&generate_bars("HIT", d(2024, 1, 1), d(2024, 6, 28), planted()))
            .unwrap();
        store
            .upsert(&generate_bars("THIN", d(2024, 6, 1), d(2024, 6, 28), Shape::Noise))
            .unwrap();
        store.fail_symbol("DOWN");

        let scanner = Scanner::new(config(1)).unwrap();
        let mut reader = store.reader().unwrap();
        let as_of = d(2024, 6, 28);

        let hit = scanner.evaluate(
            reader.as_mut(),
            &Instrument::new("HIT").with_name("Hit Co"),
            as_of,
        );
        match hit {
            SymbolOutcome::Matched(r) => assert_eq!(r.name.as_deref(), Some("Hit Co")),
            other => panic!("expected match, got {other:?}"),
        }

        let thin = scanner.evaluate(reader.as_mut(), &Instrument::new("THIN"), as_of);
        assert!(matches!(thin, SymbolOutcome::Rejected(ref r) if r.is_insufficient()));

        let missing = scanner.evaluate(reader.as_mut(), &Instrument::new("NONE"), as_of);
        assert!(matches!(
            missing,
            SymbolOutcome::Rejected(RejectReason::InsufficientData { have: 0, .. })
        ));

        let down = scanner.evaluate(reader.as_mut(), &Instrument::new("DOWN"), as_of);
        assert!(matches!(down, SymbolOutcome::Failed(_)));
    }

    #[test]
    fn invalid_config_is_refused() {
        let bad = config(0);
        assert!(matches!(Scanner::new(bad), Err(ScanError::Config(_))));
    }

    #[test]
    fn empty_universe_reports_zero() {
        let store = MemoryStore::new();
        let mut sink = MemorySink::new();
        let report = Scanner::new(config(2))
            .unwrap()
            .run(&store, &mut sink, None, None)
            .unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.matched, 0);
        assert!(sink.results_for(d(2024, 6, 28)).is_empty());
    }

    #[test]
    fn cancelled_before_start_schedules_nothing() {
        let store = MemoryStore::new();
        for sym in ["A", "B", "C"] {
            store
                .upsert(&generate_bars(sym, d(2024, 1, 1), d(2024, 6, 28), planted()))
                .unwrap();
        }
        let mut sink = MemorySink::new();
        let cancel = AtomicBool::new(true);
        let report = Scanner::new(config(2))
            .unwrap()
            .run(&store, &mut sink, Some(&cancel), None)
            .unwrap();
        assert_eq!(report.cancelled, 3);
        assert_eq!(report.matched, 0);
        assert_eq!(store.load_count(), 0);
        assert_eq!(sink.write_count(), 0);
    }
}

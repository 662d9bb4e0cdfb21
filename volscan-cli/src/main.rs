//! volscan CLI: screen a bar store for quiet-then-breakout volume patterns.
//!
//! Commands:
//! - `scan`: run a screen from a TOML config or named preset
//! - `import`: load bars (and optionally a universe file) into a store
//! - `status`: per-symbol coverage of a store
//! - `spikes`: historical volume spikes as CSV
//! - `seed-demo`: fill a store with synthetic bars, some with planted breakouts
//! - `presets`: print the named presets as TOML

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use volscan_core::data::synthetic::{generate_bars, Shape};
use volscan_core::data::{import_csv, BarStore, ParquetStore, SqliteStore, Universe};
use volscan_core::domain::{DateRange, Instrument};
use volscan_core::features::VolumeBasis;
use volscan_core::spikes::{find_spikes, find_spikes_since, history_start, SpikeParams};
use volscan_runner::{
    load_range, CsvSink, HistoryEntry, ResultSink, ScanConfig, ScanHistory, ScanReport, Scanner,
    SinkMode, SqliteSink, PRESET_NAMES,
};

#[derive(Parser)]
#[command(name = "volscan", about = "volscan: quiet-then-breakout volume screener")]
struct Cli {
    /// Base log level; RUST_LOG overrides it.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Sqlite,
    Parquet,
}

#[derive(Clone, Copy, ValueEnum)]
enum SinkKind {
    Sqlite,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum Basis {
    Volume,
    Amount,
}

impl From<Basis> for VolumeBasis {
    fn from(b: Basis) -> Self {
        match b {
            Basis::Volume => VolumeBasis::Volume,
            Basis::Amount => VolumeBasis::Amount,
        }
    }
}

#[derive(Args)]
struct StoreArgs {
    /// Store backend.
    #[arg(long, value_enum, default_value_t = Backend::Sqlite)]
    backend: Backend,

    /// SQLite database file, or Parquet root directory.
    #[arg(long, default_value = "data/bars.db")]
    store: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen every symbol in the store.
    Scan {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Named preset (see `volscan presets`). Defaults to canonical.
        #[arg(long)]
        preset: Option<String>,

        /// Worker count override.
        #[arg(long)]
        workers: Option<usize>,

        /// Scan date override (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Calendar days of history per symbol.
        #[arg(long)]
        lookback_days: Option<u32>,

        /// Skip instruments flagged as not tradable.
        #[arg(long, default_value_t = false)]
        tradable_only: bool,

        /// Append each match as it is found instead of one write at the end.
        #[arg(long, default_value_t = false)]
        streaming: bool,

        #[command(flatten)]
        store: StoreArgs,

        #[arg(long, value_enum, default_value_t = SinkKind::Sqlite)]
        sink: SinkKind,

        /// Results database (sqlite sink) or output directory (csv sink).
        #[arg(long, default_value = "data/results.db")]
        out: PathBuf,

        /// JSONL scan history file.
        #[arg(long, default_value = "data/scan_history.jsonl")]
        history: PathBuf,

        /// Print the full report as JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Import bars from a CSV file (symbol,date,open,high,low,close,volume[,amount]).
    Import {
        file: PathBuf,

        /// Universe TOML with instrument names and tradable flags.
        #[arg(long)]
        universe: Option<PathBuf>,

        #[command(flatten)]
        store: StoreArgs,
    },
    /// Show bar coverage per symbol.
    Status {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// List historical volume spikes as CSV.
    Spikes {
        /// Only this symbol. Defaults to every symbol in the store.
        #[arg(long)]
        symbol: Option<String>,

        /// Bars before a spike forming its baseline.
        #[arg(long, default_value_t = 10)]
        lookback: usize,

        /// Bars after a spike that must stay above the baseline.
        #[arg(long, default_value_t = 5)]
        post_days: usize,

        #[arg(long, default_value_t = 3.0)]
        ratio: f64,

        #[arg(long, value_enum, default_value_t = Basis::Amount)]
        basis: Basis,

        /// Only bars on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Output CSV path. Defaults to stdout.
        #[arg(long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        store: StoreArgs,
    },
    /// Fill a store with synthetic bars.
    SeedDemo {
        #[arg(long, default_value_t = 50)]
        symbols: usize,

        /// Every n-th symbol gets a planted breakout ending on --end.
        #[arg(long, default_value_t = 7)]
        planted_every: usize,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,

        #[command(flatten)]
        store: StoreArgs,
    },
    /// Print named presets as TOML.
    Presets {
        /// Only this preset.
        name: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Scan {
            config,
            preset,
            workers,
            as_of,
            lookback_days,
            tradable_only,
            streaming,
            store,
            sink,
            out,
            history,
            json,
        } => {
            let mut scan_config = load_config(config.as_deref(), preset.as_deref())?;
            let s = &mut scan_config.scan;
            if let Some(w) = workers {
                s.workers = w;
            }
            if as_of.is_some() {
                s.as_of = as_of;
            }
            if let Some(days) = lookback_days {
                s.lookback_days = days;
            }
            s.tradable_only |= tradable_only;
            if streaming {
                s.sink_mode = SinkMode::Streaming;
            }
            let preset_name = match (&config, preset) {
                (None, None) => Some("canonical".to_string()),
                (_, p) => p,
            };
            run_scan(scan_config, &store, sink, &out, &history, preset_name.as_deref(), json)
        }
        Commands::Import {
            file,
            universe,
            store,
        } => run_import(&file, universe.as_deref(), &store),
        Commands::Status { store } => run_status(&store),
        Commands::Spikes {
            symbol,
            lookback,
            post_days,
            ratio,
            basis,
            since,
            out,
            store,
        } => {
            let params = SpikeParams {
                lookback,
                post_days,
                ratio,
                basis: basis.into(),
            };
            run_spikes(&store, symbol.as_deref(), &params, since, out.as_deref())
        }
        Commands::SeedDemo {
            symbols,
            planted_every,
            start,
            end,
            store,
        } => run_seed_demo(&store, symbols, planted_every, start, end),
        Commands::Presets { name } => run_presets(name.as_deref()),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true)
                .with_writer(io::stderr);
            let _ = registry.with(layer).try_init();
        }
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr);
            let _ = registry.with(layer).try_init();
        }
    }
}

fn load_config(path: Option<&Path>, preset: Option<&str>) -> Result<ScanConfig> {
    let config = match (path, preset) {
        (Some(_), Some(_)) => bail!("--config and --preset are mutually exclusive"),
        (Some(path), None) => ScanConfig::from_file(path)?,
        (None, Some(name)) => ScanConfig::preset(name)?,
        (None, None) => ScanConfig::preset("canonical")?,
    };
    Ok(config)
}

fn open_store(args: &StoreArgs) -> Result<Box<dyn BarStore>> {
    let store: Box<dyn BarStore> = match args.backend {
        Backend::Sqlite => Box::new(
            SqliteStore::open(&args.store)
                .with_context(|| format!("opening sqlite store {}", args.store.display()))?,
        ),
        Backend::Parquet => Box::new(
            ParquetStore::open(args.store.clone())
                .with_context(|| format!("opening parquet store {}", args.store.display()))?,
        ),
    };
    Ok(store)
}

fn open_sink(kind: SinkKind, out: &Path) -> Result<Box<dyn ResultSink>> {
    let sink: Box<dyn ResultSink> = match kind {
        SinkKind::Sqlite => Box::new(
            SqliteSink::open(out).with_context(|| format!("opening results {}", out.display()))?,
        ),
        SinkKind::Csv => Box::new(
            CsvSink::new(out).with_context(|| format!("opening results dir {}", out.display()))?,
        ),
    };
    Ok(sink)
}

fn run_scan(
    config: ScanConfig,
    store_args: &StoreArgs,
    sink_kind: SinkKind,
    out: &Path,
    history_path: &Path,
    preset: Option<&str>,
    json: bool,
) -> Result<()> {
    let scanner = Scanner::new(config)?;
    let store = open_store(store_args)?;
    let mut sink = open_sink(sink_kind, out)?;

    let report = scanner.run(store.as_ref(), sink.as_mut(), None, None)?;

    let history = ScanHistory::new(history_path);
    if let Err(e) = history.append(&HistoryEntry::from_report(&report, store.kind(), preset)) {
        warn!(path = %history_path.display(), error = %e, "failed to record scan history");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!("Scan date:     {}", report.as_of);
    println!("Config:        {}", &report.config_hash[..16]);
    println!("Symbols:       {}", report.total);
    println!("Matched:       {}", report.matched);
    println!(
        "Rejected:      {} ({} insufficient data)",
        report.rejected, report.insufficient
    );
    println!("Failed:        {}", report.failed);
    if report.cancelled > 0 {
        println!("Cancelled:     {}", report.cancelled);
    }
    if report.sink_failures > 0 {
        println!("Not persisted: {}", report.sink_failures);
    }
    println!("Elapsed:       {:.2}s", report.elapsed_secs);

    if !report.results.is_empty() {
        println!();
        println!(
            "{:<10} {:<16} {:>8} {:>8} {:>10} {:>11} {:>10}",
            "Symbol", "Name", "Ratio", "CV", "Slope", "Breakout", "Close"
        );
        println!("{}", "-".repeat(79));
        for r in &report.results {
            println!(
                "{:<10} {:<16} {:>8.2} {:>8.3} {:>10.1} {:>11} {:>10.2}",
                r.symbol,
                r.name.as_deref().unwrap_or("-"),
                r.peak_ratio,
                r.quiet_cv,
                r.trend_slope,
                r.breakout_date,
                r.latest_close
            );
        }
    }

    for f in &report.failures {
        eprintln!("Error for {}: {}", f.symbol, f.error);
    }
}

fn run_import(file: &Path, universe: Option<&Path>, store_args: &StoreArgs) -> Result<()> {
    let store = open_store(store_args)?;
    if let Some(path) = universe {
        let universe = Universe::from_file(path)?;
        let n = store.upsert_instruments(&universe.instruments)?;
        info!(instruments = n, "imported universe");
    }
    let summary = import_csv(store.as_ref(), file)
        .with_context(|| format!("importing {}", file.display()))?;
    println!(
        "Imported {} of {} rows for {} symbols ({} skipped)",
        summary.imported, summary.rows, summary.symbols, summary.skipped
    );
    Ok(())
}

fn run_status(store_args: &StoreArgs) -> Result<()> {
    let store = open_store(store_args)?;
    let coverage = store.status()?;
    if coverage.is_empty() {
        println!("Store is empty: {}", store_args.store.display());
        return Ok(());
    }

    let bars: usize = coverage.iter().map(|c| c.bar_count).sum();
    println!("Store: {} ({})", store_args.store.display(), store.kind());
    println!("Symbols: {}", coverage.len());
    println!("Bars: {bars}");
    println!();
    println!("{:<10} {:<12} {:<12} {:>8}", "Symbol", "First", "Last", "Bars");
    println!("{}", "-".repeat(45));
    let fmt = |d: Option<NaiveDate>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
    for c in &coverage {
        println!(
            "{:<10} {:<12} {:<12} {:>8}",
            c.symbol,
            fmt(c.first_date),
            fmt(c.last_date),
            c.bar_count
        );
    }
    Ok(())
}

fn run_spikes(
    store_args: &StoreArgs,
    symbol: Option<&str>,
    params: &SpikeParams,
    since: Option<NaiveDate>,
    out: Option<&Path>,
) -> Result<()> {
    if params.lookback == 0 || params.post_days == 0 {
        bail!("--lookback and --post-days must be positive");
    }
    let store = open_store(store_args)?;
    let symbols: Vec<String> = match symbol {
        Some(s) => vec![s.to_string()],
        None => store
            .instruments(&volscan_core::data::UniverseQuery::all())?
            .into_iter()
            .map(|i| i.symbol)
            .collect(),
    };
    // load ahead of the cutoff so early spikes keep their pre-window
    let range = DateRange::since(since.map_or(NaiveDate::MIN, |s| history_start(s, params)));

    let writer: Box<dyn io::Write> = match out {
        Some(path) => Box::new(
            std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut wtr = csv::Writer::from_writer(writer);

    let mut reader = store.reader()?;
    let mut total = 0;
    for sym in &symbols {
        let series = match load_range(reader.as_mut(), sym, &range) {
            Ok(series) => series,
            Err(e) => {
                warn!(symbol = %sym, error = %e, "skipping symbol");
                continue;
            }
        };
        let events = match since {
            Some(cutoff) => find_spikes_since(&series, params, cutoff),
            None => find_spikes(&series, params),
        };
        for event in events {
            wtr.serialize(&event)?;
            total += 1;
        }
    }
    wtr.flush()?;
    info!(symbols = symbols.len(), spikes = total, "spike scan finished");
    Ok(())
}

fn run_seed_demo(
    store_args: &StoreArgs,
    count: usize,
    planted_every: usize,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    let end = end.unwrap_or_else(|| chrono::Local::now().date_naive());
    let start = start.unwrap_or(end - chrono::Duration::days(365));
    if start >= end {
        bail!("--start must be before --end");
    }

    let store = open_store(store_args)?;
    let mut instruments = Vec::with_capacity(count);
    let mut planted = 0;
    for i in 0..count {
        let symbol = format!("DEMO{i:04}");
        let shape = if planted_every > 0 && i % planted_every == 0 {
            planted += 1;
            Shape::Breakout {
                quiet_days: 60,
                breakout_days: 10,
            }
        } else {
            Shape::Noise
        };
        store.upsert(&generate_bars(&symbol, start, end, shape))?;
        instruments.push(Instrument::new(&symbol).with_name(format!("Demo Company {i}")));
    }
    store.upsert_instruments(&instruments)?;
    println!(
        "Seeded {count} symbols ({planted} with planted breakouts) from {start} to {end} into {}",
        store_args.store.display()
    );
    Ok(())
}

fn run_presets(name: Option<&str>) -> Result<()> {
    let names: Vec<&str> = match name {
        Some(n) => vec![n],
        None => PRESET_NAMES.to_vec(),
    };
    for (i, n) in names.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let config = ScanConfig::preset(n)?;
        println!("# preset: {n}  (fingerprint {})", &config.fingerprint()[..16]);
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

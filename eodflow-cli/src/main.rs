//! EODFlow CLI: one-shot runs, the recurring scheduler, and destination inspection.
//!
//! Commands:
//! - `run` fetch, normalize and replace the destination table once
//! - `schedule` repeat `run` on a fixed interval until stopped
//! - `inspect` print the relation currently stored at the destination

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use eodflow_core::config::PipelineConfig;
use eodflow_core::pipeline::{Pipeline, RunReport};
use eodflow_core::schedule::{run_scheduled, Schedule, SchedulerOptions, SystemClock};
use eodflow_core::store::{SqliteStore, StoredTable};
use eodflow_core::table::CanonicalTable;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;

/// Rows printed by `run --dry-run` and `inspect` before truncating.
const PREVIEW_ROWS: usize = 20;

#[derive(Parser)]
#[command(
    name = "eodflow",
    about = "EODFlow: end-of-day price ingestion from Marketstack into SQLite"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, normalize and replace the destination table once.
    Run {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Stop after normalization and print the table instead of loading it.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Also export the normalized table as CSV.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Run the pipeline on a fixed interval.
    Schedule {
        #[command(flatten)]
        pipeline: PipelineArgs,

        /// Seconds between ticks. Defaults to the config value (60).
        #[arg(long)]
        interval_secs: Option<u64>,

        /// First tick (RFC 3339). Defaults to the config value.
        #[arg(long)]
        start: Option<String>,

        /// Stop after this many runs.
        #[arg(long)]
        max_runs: Option<u64>,

        /// Wait for the next tick instead of running immediately.
        #[arg(long, default_value_t = false)]
        no_run_on_start: bool,
    },
    /// Print the relation stored at the destination.
    Inspect {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Destination connection string. Overrides DATABASE_URL.
        #[arg(long)]
        database_url: Option<String>,

        /// Relation to read. Defaults to new_table.
        #[arg(long)]
        table: Option<String>,
    },
}

/// Flags shared by `run` and `schedule`.
#[derive(Args)]
struct PipelineArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated symbols (e.g. AAPL,MSFT). Overrides EODFLOW_SYMBOLS.
    #[arg(long)]
    symbols: Option<String>,

    /// Destination connection string. Overrides DATABASE_URL.
    #[arg(long)]
    database_url: Option<String>,

    /// Destination relation. Defaults to new_table.
    #[arg(long)]
    table: Option<String>,

    /// Refuse the development placeholder destination.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Request timeout in seconds. Unbounded when unset.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl PipelineArgs {
    fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())?;
        if let Some(symbols) = &self.symbols {
            config.source.symbols = symbols.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(url) = &self.database_url {
            config.set_database_url(url.clone());
        }
        if let Some(table) = &self.table {
            config.destination.table = table.clone();
        }
        if self.strict {
            config.destination.strict = true;
        }
        if self.timeout_secs.is_some() {
            config.source.timeout_secs = self.timeout_secs;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pipeline,
            dry_run,
            csv,
        } => run_once_cmd(&pipeline, dry_run, csv),
        Commands::Schedule {
            pipeline,
            interval_secs,
            start,
            max_runs,
            no_run_on_start,
        } => run_schedule_cmd(&pipeline, interval_secs, start, max_runs, no_run_on_start),
        Commands::Inspect {
            config,
            database_url,
            table,
        } => run_inspect(config, database_url, table),
    }
}

fn run_once_cmd(args: &PipelineArgs, dry_run: bool, csv: Option<PathBuf>) -> Result<()> {
    let config = args.load_config()?;
    let pipeline = Pipeline::from_config(&config)?;

    if dry_run {
        let table = pipeline.run_until_normalized()?;
        if let Some(path) = &csv {
            export_csv(&table, path)?;
        }
        print_table(&table)?;
        return Ok(());
    }

    let (report, table) = pipeline.run_once_with_table()?;
    if let Some(path) = &csv {
        export_csv(&table, path)?;
    }
    print_report(&report);
    Ok(())
}

fn run_schedule_cmd(
    args: &PipelineArgs,
    interval_secs: Option<u64>,
    start: Option<String>,
    max_runs: Option<u64>,
    no_run_on_start: bool,
) -> Result<()> {
    let mut config = args.load_config()?;
    if let Some(secs) = interval_secs {
        config.schedule.interval_secs = secs;
    }
    if let Some(start) = start {
        config.schedule.start = DateTime::parse_from_rfc3339(&start)
            .with_context(|| format!("invalid --start '{start}'"))?
            .with_timezone(&Utc);
    }
    if no_run_on_start {
        config.schedule.run_on_start = false;
    }

    let pipeline = Pipeline::from_config(&config)?;
    let schedule = Schedule::from_config(&config.schedule)?;
    let options = SchedulerOptions {
        run_on_start: config.schedule.run_on_start,
        max_runs,
    };
    let stop = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(interrupt_handler(Arc::clone(&stop)))
        .context("failed to install the Ctrl-C handler")?;

    let summary = run_scheduled(&schedule, options, &SystemClock, &stop, |n| {
        let _span = info_span!("run", run = n).entered();
        // Failures are logged inside run_once; the loop carries on.
        pipeline.run_once().is_ok()
    });

    println!(
        "Scheduler finished: {} runs, {} failed, {} ticks skipped",
        summary.runs, summary.failures, summary.skipped_ticks
    );
    Ok(())
}

/// First Ctrl-C stops the scheduler once the current run (or wait) ends; a
/// second one exits at once.
fn interrupt_handler(stop: Arc<AtomicBool>) -> impl FnMut() + Send + 'static {
    move || {
        if stop.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        warn!("interrupt received, stopping after the current run (Ctrl-C again to exit now)");
    }
}

fn run_inspect(
    config_path: Option<PathBuf>,
    database_url: Option<String>,
    table: Option<String>,
) -> Result<()> {
    let mut config = PipelineConfig::load(config_path.as_deref())?;
    if let Some(url) = database_url {
        config.set_database_url(url);
    }
    let table_name = table.unwrap_or_else(|| config.destination.table.clone());

    let store = SqliteStore::open(config.destination.url())?;
    match store.read_table(&table_name)? {
        Some(stored) => print_stored(&stored),
        None => bail!(
            "relation '{table_name}' does not exist at {}",
            store.destination()
        ),
    }
    Ok(())
}

fn export_csv(table: &CanonicalTable, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    table.write_csv(BufWriter::new(file))?;
    info!(path = %path.display(), rows = table.height(), "exported CSV");
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n=== Run Summary ===");
    println!("Symbols:       {}", report.symbols);
    println!("Table:         {}", report.load.table_name);
    println!("Input records: {}", report.normalize.input_records);
    println!("Dropped nulls: {}", report.normalize.dropped_null_rows);
    println!("Dropped dates: {}", report.normalize.dropped_bad_dates);
    println!("Rows written:  {}", report.load.rows_written);
    println!("Fingerprint:   {}", report.load.fingerprint);
    println!("Elapsed:       {:.2?}", report.elapsed);
}

fn print_table(table: &CanonicalTable) -> Result<()> {
    let rows = table.rows()?;
    print_rows(
        &table.column_names(),
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect::<Vec<_>>()),
    );
    let stats = table.stats();
    if stats.input_records > 0 {
        println!(
            "({} of {} records kept; {} with nulls, {} with bad dates dropped)",
            stats.kept_rows(),
            stats.input_records,
            stats.dropped_null_rows,
            stats.dropped_bad_dates
        );
    }
    Ok(())
}

fn print_stored(stored: &StoredTable) {
    let names: Vec<String> = stored
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.declared_type))
        .collect();
    println!("Relation '{}':", stored.name);
    print_rows(
        &names,
        stored
            .rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect::<Vec<_>>()),
    );
}

fn print_rows<I>(header: &[String], rows: I)
where
    I: ExactSizeIterator<Item = Vec<String>>,
{
    let total = rows.len();
    println!("{}", header.join(" | "));
    for row in rows.take(PREVIEW_ROWS) {
        println!("{}", row.join(" | "));
    }
    if total > PREVIEW_ROWS {
        println!("... {} more rows", total - PREVIEW_ROWS);
    }
    println!("{total} rows");
}

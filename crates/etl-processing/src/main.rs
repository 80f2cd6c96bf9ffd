//! CLI entry point for the table cleaning pipeline.

use anyhow::{Result, anyhow};
use chrono::Local;
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use etl_processing::storage::{LocalObjectStore, ObjectStore};
use etl_processing::{
    EtlConfig, EtlError, ExecutionMode, PipelineRunner, SUPPORTED_TABLES, TaskResult, reporting,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[cfg(feature = "gcs")]
use etl_processing::storage::{GcsConfig, GcsObjectStore};

/// Where the bucket lives.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// A local directory acting as the bucket root
    Local,
    /// Google Cloud Storage
    Gcs,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Table cleaning ETL pipeline",
    long_about = "Cleans raw Parquet table snapshots in object storage and writes\n\
                  <table>_processed.parquet outputs back to the bucket.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  GOOGLE_APPLICATION_CREDENTIALS    Service-account key file\n  \
                  GCS_ACCESS_TOKEN                  Bearer token for the gcs backend\n  \
                  RUST_LOG                          Overrides --log-level\n\n\
                  EXAMPLES:\n  \
                  # Clean every table against a mounted bucket\n  \
                  etl-processing --bucket-root /mnt/warehouse\n\n  \
                  # Two workers, JSON summary on stdout\n  \
                  etl-processing --parallel --json\n\n  \
                  # One table, as scheduled by an external orchestrator\n  \
                  etl-processing --backend gcs --bucket warehouse --load-only --table accounts_user"
)]
struct Args {
    /// Run only the task for this table
    #[arg(short, long)]
    table: Option<String>,

    /// Run tasks on a bounded worker pool instead of one after another
    #[arg(short, long)]
    parallel: bool,

    /// Only load the table given by --table; nothing is transformed or written
    #[arg(long, requires = "table")]
    load_only: bool,

    /// Storage backend
    #[arg(long, value_enum, default_value = "local")]
    backend: Backend,

    /// Bucket name (overrides the config file)
    #[arg(long)]
    bucket: Option<String>,

    /// Directory used as the bucket root by the local backend
    #[arg(long, default_value = "./bucket")]
    bucket_root: PathBuf,

    /// Service-account key file (overrides the config file)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show warnings, errors and the summary)
    #[arg(short, long)]
    quiet: bool,

    /// Output JSON to stdout instead of the human-readable summary
    ///
    /// Disables console logs so stdout holds only the JSON document.
    #[arg(long)]
    json: bool,

    /// Also write logs to preprocessing_<timestamp>.log in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write the JSON run report into this directory
    #[arg(short = 'r', long)]
    emit_report: Option<PathBuf>,
}

/// Initialize the tracing subscriber.
///
/// The console layer is skipped when `json_output` is set. The returned
/// guard must live until exit so buffered file logs are flushed.
fn init_logging(
    level: &str,
    quiet: bool,
    json_output: bool,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if json_output && log_dir.is_none() {
        return Ok(None);
    }

    let effective_level = if quiet { "warn" } else { level };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_name = format!("preprocessing_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let console_layer = (!json_output).then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn load_config(args: &Args) -> Result<EtlConfig> {
    let mut config = match &args.config {
        Some(path) => EtlConfig::from_json_file(path)?,
        None => EtlConfig::default(),
    };

    if let Some(bucket) = &args.bucket {
        config.bucket = bucket.clone();
    }
    if let Some(credentials) = &args.credentials {
        config.credentials_path = Some(credentials.clone());
    }
    config.validate()?;
    Ok(config)
}

fn build_store(args: &Args, config: &EtlConfig) -> Result<Arc<dyn ObjectStore>> {
    match args.backend {
        Backend::Local => {
            if !args.bucket_root.is_dir() {
                return Err(anyhow!(
                    "Bucket root not found: {}",
                    args.bucket_root.display()
                ));
            }
            Ok(Arc::new(LocalObjectStore::new(&args.bucket_root)))
        }
        #[cfg(feature = "gcs")]
        Backend::Gcs => {
            let mut gcs = GcsConfig::new(&config.bucket);
            if let Some(path) = &config.credentials_path {
                gcs = gcs.credentials_path(path);
            }
            Ok(Arc::new(GcsObjectStore::connect(gcs)?))
        }
        #[cfg(not(feature = "gcs"))]
        Backend::Gcs => {
            let _ = config;
            Err(anyhow!(
                "The gcs backend is not available; rebuild with --features gcs"
            ))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = init_logging(
        &args.log_level,
        args.quiet,
        args.json,
        args.log_dir.as_deref(),
    )?;

    dotenv().ok();

    let config = load_config(&args)?;
    let store = build_store(&args, &config)?;
    let runner = PipelineRunner::builder()
        .config(config)
        .store(store)
        .build()?;

    match args.table.as_deref() {
        Some(table) if args.load_only => run_load_only(&runner, table, &args),
        Some(table) => run_single(&runner, table, &args),
        None => run_all(&runner, &args),
    }
}

fn run_all(runner: &PipelineRunner, args: &Args) -> Result<()> {
    let mode = if args.parallel {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Sequential
    };

    // Task failures are part of the summary; only the upfront check is fatal.
    let summary = runner.run_all(mode).inspect_err(|e| {
        error!("Pipeline aborted: {}", e);
    })?;

    if let Some(dir) = &args.emit_report {
        reporting::write_json_report(&summary, dir)?;
    }

    if args.json {
        println!("{}", reporting::to_json(&summary)?);
    } else {
        print!("{}", reporting::render_text(&summary));
    }
    Ok(())
}

fn run_single(runner: &PipelineRunner, table: &str, args: &Args) -> Result<()> {
    let result = runner
        .run_single(table)
        .inspect_err(print_unknown_table)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_task_result(&result);
    }
    Ok(())
}

fn run_load_only(runner: &PipelineRunner, table: &str, args: &Args) -> Result<()> {
    let (rows, columns) = runner
        .load_only(table)
        .inspect_err(print_unknown_table)?;

    info!("Loaded {}: {} rows x {} columns", table, rows, columns);
    if args.json {
        let value = serde_json::json!({ "table": table, "rows": rows, "columns": columns });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}: {} rows x {} columns", table, rows, columns);
    }
    Ok(())
}

fn print_unknown_table(err: &EtlError) {
    if let EtlError::UnknownTable { table, .. } = err {
        eprintln!("Unknown table '{}'. Supported tables:", table);
        for supported in SUPPORTED_TABLES {
            eprintln!("  - {}", supported);
        }
    }
}

/// Print a single task outcome.
///
/// Uses `println!` on purpose: this is the command's output, not a log line.
fn print_task_result(result: &TaskResult) {
    println!("\n{}", "=".repeat(80));
    println!("{} ({})", result.table_name, result.processor);
    println!("{}", "-".repeat(40));
    match &result.error {
        None => {
            println!("  Status: SUCCESS");
            println!(
                "  Rows: {} -> {}",
                result.rows_in.unwrap_or_default(),
                result.rows_out.unwrap_or_default()
            );
            if let Some(storage) = &result.storage_info {
                println!("  Output: {} ({:.1} MB)", storage.path, storage.size_mb);
            }
            if let Some(report) = &result.transform_report {
                for note in &report.notes {
                    println!("  - {}", note);
                }
            }
        }
        Some(error) => {
            println!("  Status: FAILED");
            if let Some(stage) = result.failed_stage {
                println!("  Stage: {}", stage);
            }
            println!("  Error: {}", error);
        }
    }
    println!("  Time: {:.2}s", result.elapsed_seconds);
    println!("{}", "=".repeat(80));
}

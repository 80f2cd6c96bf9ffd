//! Orchestration of the table tasks.

use chrono::Local;
use polars::prelude::*;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn};

use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::guard::{ResourceGuard, ResourceProbe, SystemProbe};
use crate::io::{TableLoader, TableWriter};
use crate::pipeline::progress::{
    ClosureProgressReporter, ProgressReporter, ProgressUpdate, TaskStage,
};
use crate::pipeline::tasks::{TaskSpec, default_tasks, find_task};
use crate::reporting;
use crate::storage::ObjectStore;
use crate::types::{
    ExecutionMode, RunSummary, StorageInfo, TaskResult, TaskStatus, TransformReport, round_to,
};

/// Worker cap for parallel runs. Each worker may hold a whole table in memory.
pub const MAX_PARALLEL_WORKERS: usize = 2;

/// Runs Loader -> Transformation -> Writer for each table task.
///
/// Use [`PipelineRunner::builder()`] to construct one.
///
/// # Example
///
/// ```rust,ignore
/// use etl_processing::{ExecutionMode, PipelineRunner};
/// use etl_processing::storage::LocalObjectStore;
/// use std::sync::Arc;
///
/// let summary = PipelineRunner::builder()
///     .store(Arc::new(LocalObjectStore::new("/mnt/warehouse")))
///     .build()?
///     .run_all(ExecutionMode::Sequential)?;
///
/// println!("{} succeeded, {} failed", summary.success_count, summary.failure_count);
/// ```
pub struct PipelineRunner {
    config: EtlConfig,
    store: Arc<dyn ObjectStore>,
    guard: ResourceGuard,
    loader: TableLoader,
    writer: TableWriter,
    tasks: Vec<TaskSpec>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

// Parallel runs share the runner between pool workers.
static_assertions::assert_impl_all!(PipelineRunner: Send, Sync);

/// What a successful task produced.
struct TaskOutput {
    rows_out: usize,
    report: TransformReport,
    storage: StorageInfo,
}

/// Where a task got to, kept for the failure record.
struct TaskTrace {
    stage: TaskStage,
    rows_in: Option<usize>,
}

impl PipelineRunner {
    /// Create a new runner builder.
    pub fn builder() -> PipelineRunnerBuilder {
        PipelineRunnerBuilder::default()
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    fn report_progress(&self, task: &TaskSpec, stage: TaskStage, message: impl Into<String>) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(ProgressUpdate::new(
                &task.processor,
                &task.table,
                stage,
                message,
            ));
        }
    }

    fn advance(&self, task: &TaskSpec, trace: &mut TaskTrace, stage: TaskStage) {
        trace.stage = stage;
        self.report_progress(task, stage, format!("{} {}", stage.display_name(), task.table));
    }

    /// Run one task to completion.
    ///
    /// Never fails: any error is recorded in the returned [`TaskResult`]
    /// together with the stage it happened in.
    pub fn run_task(&self, task: &TaskSpec) -> TaskResult {
        let span = info_span!("task", table = %task.table, processor = %task.processor);
        let _enter = span.enter();

        info!("Starting {} ({})", task.table, task.processor);
        let start = Instant::now();
        let mut trace = TaskTrace {
            stage: TaskStage::Pending,
            rows_in: None,
        };
        self.report_progress(task, TaskStage::Pending, "queued");

        let outcome = self.execute(task, &mut trace);
        let elapsed_seconds = round_to(start.elapsed().as_secs_f64(), 2);

        match outcome {
            Ok(output) => {
                info!(
                    "Finished {} in {:.1}s: {} -> {} rows",
                    task.table,
                    elapsed_seconds,
                    trace.rows_in.unwrap_or_default(),
                    output.rows_out
                );
                self.report_progress(task, TaskStage::Succeeded, "completed");
                TaskResult {
                    processor: task.processor.clone(),
                    table_name: task.table.clone(),
                    rows_in: trace.rows_in,
                    rows_out: Some(output.rows_out),
                    elapsed_seconds,
                    status: TaskStatus::Success,
                    error: None,
                    error_code: None,
                    failed_stage: None,
                    transform_report: Some(output.report),
                    storage_info: Some(output.storage),
                }
            }
            Err(e) => {
                error!(
                    "{} ({}) failed while {}: {}",
                    task.table,
                    task.processor,
                    trace.stage.display_name().to_lowercase(),
                    e
                );
                self.report_progress(task, TaskStage::Failed, e.to_string());
                TaskResult {
                    processor: task.processor.clone(),
                    table_name: task.table.clone(),
                    rows_in: trace.rows_in,
                    rows_out: None,
                    elapsed_seconds,
                    status: TaskStatus::Failed,
                    error: Some(e.to_string()),
                    error_code: Some(e.error_code().to_string()),
                    failed_stage: Some(trace.stage),
                    transform_report: None,
                    storage_info: None,
                }
            }
        }
    }

    fn execute(&self, task: &TaskSpec, trace: &mut TaskTrace) -> Result<TaskOutput> {
        self.guard.check_preflight()?;

        self.advance(task, trace, TaskStage::Loading);
        let df = self.loader.load(&task.table, &task.dataset)?;
        trace.rows_in = Some(df.height());

        self.advance(task, trace, TaskStage::Transforming);
        let (mut df, report) = task.transformation.apply(df)?;
        for note in &report.notes {
            info!("{}: {}", report.transformation, note);
        }

        self.advance(task, trace, TaskStage::Writing);
        let storage = self
            .writer
            .write(&mut df, &task.table, &self.config.output_dataset)?;
        let rows_out = df.height();
        drop(df);

        if let Ok(sample) = self.guard.sample() {
            info!(
                "Resources after {}: memory {:.1}%, disk {:.1}%",
                task.table, sample.memory_pct, sample.disk_pct
            );
        }

        Ok(TaskOutput {
            rows_out,
            report,
            storage,
        })
    }

    /// Run every configured task.
    ///
    /// Fails only if the upfront resource check fails, before any task has
    /// started. Individual task failures are reported in the summary.
    pub fn run_all(&self, mode: ExecutionMode) -> Result<RunSummary> {
        let started_at = Local::now();
        let start = Instant::now();
        info!(
            "Starting pipeline: {} tasks, {:?} mode, started {}",
            self.tasks.len(),
            mode,
            started_at.format("%Y-%m-%d %H:%M:%S")
        );

        let resources_before = self.guard.check_preflight().inspect_err(|e| {
            error!("Aborting run, insufficient system resources: {}", e);
        })?;

        let results = match mode {
            ExecutionMode::Sequential => self.run_sequential(),
            ExecutionMode::Parallel => self.run_parallel(),
        };

        let success_count = results.iter().filter(|r| r.is_success()).count();
        let summary = RunSummary {
            started_at,
            finished_at: Local::now(),
            mode,
            failure_count: results.len() - success_count,
            success_count,
            results,
            total_elapsed_seconds: round_to(start.elapsed().as_secs_f64(), 2),
            resources_before,
            resources_after: self.guard.sample().ok(),
            output_prefix: self.store.uri(&format!("{}/", self.config.output_dataset)),
        };

        reporting::log_summary(&summary);
        Ok(summary)
    }

    fn run_sequential(&self) -> Vec<TaskResult> {
        info!("Sequential mode");
        let pause = Duration::from_millis(self.config.pause_between_tasks_ms);
        let total = self.tasks.len();
        let mut results = Vec::with_capacity(total);

        for (i, task) in self.tasks.iter().enumerate() {
            info!("Progress: {}/{}", i + 1, total);
            results.push(self.run_task(task));
            if i + 1 < total && !pause.is_zero() {
                std::thread::sleep(pause);
            }
        }
        results
    }

    fn run_parallel(&self) -> Vec<TaskResult> {
        info!("Parallel mode ({} workers)", MAX_PARALLEL_WORKERS);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(MAX_PARALLEL_WORKERS)
            .thread_name(|i| format!("etl-worker-{}", i))
            .build();

        match pool {
            Ok(pool) => pool.install(|| {
                self.tasks
                    .par_iter()
                    .map(|t| self.run_task(t))
                    .collect::<Vec<_>>()
            }),
            Err(e) => {
                warn!("Could not start worker pool ({}); running sequentially", e);
                self.run_sequential()
            }
        }
    }

    /// Run the task for one table.
    ///
    /// Fails with `UnknownTable` if `table` is not configured; otherwise the
    /// outcome is in the returned result.
    pub fn run_single(&self, table: &str) -> Result<TaskResult> {
        let task = find_task(&self.tasks, table)?;
        Ok(self.run_task(task))
    }

    /// Load one table without transforming or writing it.
    ///
    /// Returns the table's `(rows, columns)`.
    pub fn load_only(&self, table: &str) -> Result<(usize, usize)> {
        let task = find_task(&self.tasks, table)?;
        let span = info_span!("load", table = %task.table);
        let _enter = span.enter();
        let df: DataFrame = self.loader.load(&task.table, &task.dataset)?;
        Ok(df.shape())
    }
}

/// Builder for [`PipelineRunner`].
#[derive(Default)]
pub struct PipelineRunnerBuilder {
    config: Option<EtlConfig>,
    store: Option<Arc<dyn ObjectStore>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    tasks: Option<Vec<TaskSpec>>,
}

static_assertions::assert_impl_all!(PipelineRunnerBuilder: Send);

impl PipelineRunnerBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: EtlConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the object store holding raw and processed tables. Required.
    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the resource probe. Defaults to a [`SystemProbe`] on the staging directory.
    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Set a progress reporter.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Replace the task list. Defaults to the four production tasks.
    pub fn tasks(mut self, tasks: Vec<TaskSpec>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Build the runner.
    ///
    /// Fails with `InvalidConfig` if the configuration is invalid or no store
    /// was set.
    pub fn build(self) -> Result<PipelineRunner> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = self
            .store
            .ok_or_else(|| EtlError::InvalidConfig("an object store is required".to_string()))?;
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SystemProbe::new(&config.staging_dir)));
        let guard = ResourceGuard::new(probe, config.memory_high_water, config.disk_high_water);
        let tasks = self.tasks.unwrap_or_else(|| default_tasks(&config));

        info!("Pipeline storage backend: {}", store.name());
        Ok(PipelineRunner {
            loader: TableLoader::new(store.clone(), guard.clone(), &config),
            writer: TableWriter::new(store.clone(), &config),
            config,
            store,
            guard,
            tasks,
            progress_reporter: self.progress_reporter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::FixedProbe;
    use crate::storage::MemoryObjectStore;
    use parking_lot::Mutex;

    fn parquet_bytes(mut df: DataFrame) -> Vec<u8> {
        let mut buf = Vec::new();
        ParquetWriter::new(&mut buf).finish(&mut df).unwrap();
        buf
    }

    fn runner(store: Arc<MemoryObjectStore>, probe: FixedProbe) -> PipelineRunner {
        let staging = std::env::temp_dir();
        PipelineRunner::builder()
            .config(
                EtlConfig::builder()
                    .staging_dir(staging)
                    .pause_between_tasks_ms(0)
                    .build()
                    .unwrap(),
            )
            .store(store)
            .probe(Arc::new(probe))
            .build()
            .unwrap()
    }

    fn seed_blockrecord(store: &MemoryObjectStore) {
        store.insert(
            "votes/accounts_blockrecord.parquet",
            parquet_bytes(
                df! {
                    "user_id" => [1i64, 2, 3],
                    "block_user_id" => [2i64, 2, 3],
                }
                .unwrap(),
            ),
        );
    }

    #[test]
    fn test_build_requires_store() {
        let err = PipelineRunner::builder().build().err().unwrap();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_run_single_success() {
        let store = Arc::new(MemoryObjectStore::new("test"));
        seed_blockrecord(&store);

        let result = runner(store.clone(), FixedProbe::idle())
            .run_single("accounts_blockrecord")
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.rows_in, Some(3));
        assert_eq!(result.rows_out, Some(1));
        assert_eq!(result.processor, "self-relation");
        let storage = result.storage_info.unwrap();
        assert_eq!(storage.table_name, "accounts_blockrecord_processed");
        assert_eq!(storage.path, "mem://test/processed/accounts_blockrecord_processed.parquet");
        assert!(store.get("processed/accounts_blockrecord_processed.parquet").is_some());
    }

    #[test]
    fn test_run_single_unknown_table() {
        let store = Arc::new(MemoryObjectStore::new("test"));
        let err = runner(store, FixedProbe::idle())
            .run_single("orders")
            .unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_TABLE");
    }

    #[test]
    fn test_missing_table_fails_in_loading_stage() {
        let store = Arc::new(MemoryObjectStore::new("test"));
        let result = runner(store.clone(), FixedProbe::idle())
            .run_single("accounts_user")
            .unwrap();

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.failed_stage, Some(TaskStage::Loading));
        assert_eq!(result.error_code.as_deref(), Some("NOT_FOUND"));
        assert!(result.rows_in.is_none());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_validation_failure_writes_nothing() {
        let store = Arc::new(MemoryObjectStore::new("test"));
        store.insert(
            "votes/accounts_blockrecord.parquet",
            parquet_bytes(df! { "user_id" => [1i64] }.unwrap()),
        );

        let result = runner(store.clone(), FixedProbe::idle())
            .run_single("accounts_blockrecord")
            .unwrap();

        assert_eq!(result.failed_stage, Some(TaskStage::Transforming));
        assert_eq!(result.rows_in, Some(1));
        assert_eq!(store.keys(), vec!["votes/accounts_blockrecord.parquet".to_string()]);
    }

    #[test]
    fn test_run_all_aborts_on_preflight() {
        let store = Arc::new(MemoryObjectStore::new("test"));
        let err = runner(store, FixedProbe::new(95.0, 10.0, 10.0))
            .run_all(ExecutionMode::Sequential)
            .unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    #[test]
    fn test_run_all_one_result_per_task() {
        let store = Arc::new(MemoryObjectStore::new("test"));
        seed_blockrecord(&store);

        let summary = runner(store, FixedProbe::idle())
            .run_all(ExecutionMode::Sequential)
            .unwrap();

        assert_eq!(summary.results.len(), 4);
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.failure_count, 3);
        assert_eq!(summary.results[3].table_name, "accounts_blockrecord");
        assert!(summary.results[3].is_success());
    }

    #[test]
    fn test_progress_stages_in_order() {
        let store = Arc::new(MemoryObjectStore::new("test"));
        seed_blockrecord(&store);
        let stages = Arc::new(Mutex::new(Vec::new()));
        let stages_clone = stages.clone();

        let runner = PipelineRunner::builder()
            .config(EtlConfig::builder().pause_between_tasks_ms(0).build().unwrap())
            .store(store)
            .probe(Arc::new(FixedProbe::idle()))
            .on_progress(move |update| stages_clone.lock().push(update.stage))
            .build()
            .unwrap();
        runner.run_single("accounts_blockrecord").unwrap();

        assert_eq!(
            *stages.lock(),
            vec![
                TaskStage::Pending,
                TaskStage::Loading,
                TaskStage::Transforming,
                TaskStage::Writing,
                TaskStage::Succeeded,
            ]
        );
    }

    #[test]
    fn test_load_only_reports_shape() {
        let store = Arc::new(MemoryObjectStore::new("test"));
        seed_blockrecord(&store);

        let shape = runner(store.clone(), FixedProbe::idle())
            .load_only("accounts_blockrecord")
            .unwrap();
        assert_eq!(shape, (3, 2));
        assert_eq!(store.keys().len(), 1);
    }
}

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::pipeline::TaskStage;

/// Point-in-time host resource usage, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub memory_pct: f64,
    pub cpu_pct: f64,
    pub disk_pct: f64,
}

/// Metadata returned by the writer for a persisted table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// Name of the written table, including the `_processed` suffix.
    pub table_name: String,
    pub rows: usize,
    pub columns: usize,
    /// Serialized size, rounded to one decimal.
    pub size_mb: f64,
    /// Full URI of the written object.
    pub path: String,
}

/// Counters produced by a transformation, for logs and the run report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformReport {
    pub transformation: String,
    pub rows_in: usize,
    pub rows_out: usize,
    /// Rows dropped by filters or deduplication.
    pub removed: usize,
    /// Rows marked by a derived flag column.
    pub flagged: usize,
    /// Human-readable per-stage notes (removal rates, thresholds, ...).
    pub notes: Vec<String>,
}

impl TransformReport {
    pub fn new(transformation: impl Into<String>, rows_in: usize) -> Self {
        Self {
            transformation: transformation.into(),
            rows_in,
            ..Default::default()
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// Final status of a table task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failed,
}

/// Outcome of one table task. Produced exactly once per requested table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub processor: String,
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_in: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_out: Option<usize>,
    /// Wall-clock time of the whole task, rounded to two decimals.
    pub elapsed_seconds: f64,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Stage that was running when the task failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<TaskStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform_report: Option<TransformReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_info: Option<StorageInfo>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// How the runner schedules the table tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time, in order.
    #[default]
    Sequential,
    /// Bounded worker pool.
    Parallel,
}

/// Aggregate of all task results for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub mode: ExecutionMode,
    pub results: Vec<TaskResult>,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_elapsed_seconds: f64,
    pub resources_before: ResourceSample,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources_after: Option<ResourceSample>,
    /// Location prefix that successful tables were written under.
    pub output_prefix: String,
}

impl RunSummary {
    pub fn failed_tables(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

/// Round to a fixed number of decimals, for report fields.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

//! Per-task progress reporting.
//!
//! Every table task moves through
//! `Pending -> Loading -> Transforming -> Writing -> {Succeeded | Failed}`.
//! Each transition is published to an optional [`ProgressReporter`].
//!
//! # Example
//!
//! ```rust,ignore
//! use etl_processing::PipelineRunner;
//!
//! let runner = PipelineRunner::builder()
//!     .store(store)
//!     .on_progress(|update| {
//!         println!("[{}] {}: {}", update.table, update.stage.display_name(), update.message);
//!     })
//!     .build()?;
//! ```

use serde::{Deserialize, Serialize};

/// Stages of a single table task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    /// Queued; resource gate not yet passed
    Pending,
    /// Fetching the raw table
    Loading,
    /// Applying the table's cleaning rule
    Transforming,
    /// Persisting the cleaned table
    Writing,
    /// All three stages completed
    Succeeded,
    /// A stage failed; the task contributes nothing to storage
    Failed,
}

impl TaskStage {
    /// Returns a human-readable name for the stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Loading => "Loading",
            Self::Transforming => "Transforming",
            Self::Writing => "Writing",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A stage transition of one table task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub processor: String,
    pub table: String,
    pub stage: TaskStage,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(
        processor: impl Into<String>,
        table: impl Into<String>,
        stage: TaskStage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            processor: processor.into(),
            table: table.into(),
            stage,
            message: message.into(),
        }
    }
}

/// Trait for receiving task progress.
///
/// Implementations must be `Send + Sync`: in parallel mode updates arrive
/// from pool worker threads.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Wrapper that implements [`ProgressReporter`] using a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);
static_assertions::assert_impl_all!(TaskStage: Send, Sync, Copy);

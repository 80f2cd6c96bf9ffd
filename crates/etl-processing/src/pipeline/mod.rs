//! Pipeline module.
//!
//! This module provides the task runner, the fixed task list and progress
//! reporting.

pub mod progress;
mod runner;
pub mod tasks;

pub use progress::{ClosureProgressReporter, ProgressReporter, ProgressUpdate, TaskStage};
pub use runner::{MAX_PARALLEL_WORKERS, PipelineRunner, PipelineRunnerBuilder};
pub use tasks::{SUPPORTED_TABLES, TaskSpec, default_tasks, find_task};

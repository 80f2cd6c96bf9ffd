//! Table Cleaning ETL Library
//!
//! A batch pipeline that cleans raw Parquet table snapshots held in object
//! storage and writes the cleaned tables back, built with Rust and Polars.
//!
//! # Overview
//!
//! Each run executes a fixed set of table tasks. A task loads one raw table,
//! applies that table's cleaning rule and writes the result as
//! `<output_dataset>/<table>_processed.parquet`:
//!
//! - **accounts_blockrecord**: drop rows where a user blocks themselves
//! - **accounts_user**: flag point and friend-count specialists
//! - **accounts_userquestionrecord**: flag self votes
//! - **hackle_events**: drop excluded events and exact duplicates
//!
//! Host resources are checked before the run and before each task. A failing
//! task never stops the others; every task yields exactly one
//! [`TaskResult`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use etl_processing::{EtlConfig, ExecutionMode, PipelineRunner};
//! use etl_processing::storage::LocalObjectStore;
//! use std::sync::Arc;
//!
//! let config = EtlConfig::builder()
//!     .bucket("warehouse")
//!     .pause_between_tasks_ms(0)
//!     .build()?;
//!
//! let summary = PipelineRunner::builder()
//!     .config(config)
//!     .store(Arc::new(LocalObjectStore::new("/mnt/warehouse")))
//!     .on_progress(|update| {
//!         println!("[{}] {}", update.table, update.stage);
//!     })
//!     .build()?
//!     .run_all(ExecutionMode::Parallel)?;
//!
//! for failed in summary.failed_tables() {
//!     eprintln!("{}: {:?}", failed.table_name, failed.error);
//! }
//! ```
//!
//! # Storage Backends
//!
//! Storage goes through the [`storage::ObjectStore`] trait:
//!
//! - [`storage::LocalObjectStore`] - a directory used as the bucket root
//! - [`storage::MemoryObjectStore`] - in-process objects, for tests
//! - `storage::GcsObjectStore` - Google Cloud Storage (feature `gcs`)

pub mod config;
pub mod error;
pub mod guard;
pub mod io;
pub mod pipeline;
pub mod reporting;
pub mod storage;
pub mod transforms;
pub mod types;

// Re-exports for convenient access
pub use config::{ConfigValidationError, DEFAULT_EXCLUDED_EVENTS, EtlConfig, EtlConfigBuilder};
pub use error::{EtlError, Result as EtlResult, ResultExt};
pub use guard::{FixedProbe, ResourceGuard, ResourceProbe, SystemProbe};
pub use io::{TableLoader, TableWriter};
pub use pipeline::{
    ClosureProgressReporter, PipelineRunner, PipelineRunnerBuilder, ProgressReporter,
    ProgressUpdate, SUPPORTED_TABLES, TaskSpec, TaskStage,
};
pub use storage::ObjectStore;
pub use transforms::Transformation;
pub use types::{
    ExecutionMode, ResourceSample, RunSummary, StorageInfo, TaskResult, TaskStatus,
    TransformReport,
};

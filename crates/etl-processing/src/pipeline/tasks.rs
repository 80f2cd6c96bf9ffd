//! The fixed table task list.

use std::sync::Arc;

use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use crate::transforms::{
    EventCleanup, SelfRelationFilter, SelfVoteFlag, SpecialistClassifier, Transformation,
};

/// Tables the pipeline knows how to clean, in run order.
pub const SUPPORTED_TABLES: [&str; 4] = [
    "accounts_user",
    "hackle_events",
    "accounts_userquestionrecord",
    "accounts_blockrecord",
];

/// One table task: where to read, who owns it, and which rule to apply.
#[derive(Clone)]
pub struct TaskSpec {
    /// Owning processor, used in logs and results.
    pub processor: String,
    pub table: String,
    /// Source namespace of the raw table.
    pub dataset: String,
    pub transformation: Arc<dyn Transformation>,
}

impl TaskSpec {
    pub fn new(
        processor: impl Into<String>,
        table: impl Into<String>,
        dataset: impl Into<String>,
        transformation: Arc<dyn Transformation>,
    ) -> Self {
        Self {
            processor: processor.into(),
            table: table.into(),
            dataset: dataset.into(),
            transformation,
        }
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("processor", &self.processor)
            .field("table", &self.table)
            .field("dataset", &self.dataset)
            .field("transformation", &self.transformation.name())
            .finish()
    }
}

/// The four production tasks.
pub fn default_tasks(config: &EtlConfig) -> Vec<TaskSpec> {
    vec![
        TaskSpec::new("specialist", "accounts_user", "votes", Arc::new(SpecialistClassifier)),
        TaskSpec::new(
            "event-cleanup",
            "hackle_events",
            "hackle",
            Arc::new(EventCleanup::from_config(config)),
        ),
        TaskSpec::new(
            "self-vote",
            "accounts_userquestionrecord",
            "votes",
            Arc::new(SelfVoteFlag),
        ),
        TaskSpec::new(
            "self-relation",
            "accounts_blockrecord",
            "votes",
            Arc::new(SelfRelationFilter),
        ),
    ]
}

/// Find the task for `table`, or fail with `UnknownTable` listing the options.
pub fn find_task<'a>(tasks: &'a [TaskSpec], table: &str) -> Result<&'a TaskSpec> {
    tasks
        .iter()
        .find(|t| t.table == table)
        .ok_or_else(|| EtlError::UnknownTable {
            table: table.to_string(),
            supported: tasks
                .iter()
                .map(|t| t.table.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

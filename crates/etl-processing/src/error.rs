//! Error types for the ETL pipeline.
//!
//! Every stage of a table task (load, transform, write) reports failures
//! through [`EtlError`]. The runner converts these into failed task results,
//! so each variant carries a stable [`EtlError::error_code`] that survives
//! serialization into the run report.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the ETL pipeline.
#[derive(Error, Debug)]
pub enum EtlError {
    /// The remote object does not exist.
    #[error("Object not found in storage: {0}")]
    NotFound(String),

    /// Required columns are missing, a transformation emptied a non-empty
    /// table, or an empty table was handed to the writer.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Host memory or disk usage crossed a safety threshold.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Transfer or post-write verification failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The requested table is not one of the configured tasks.
    #[error("Unsupported table '{table}' (supported: {supported})")]
    UnknownTable { table: String, supported: String },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (e.g., worker pool construction failure).
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error (GCS backend, only with "gcs" feature).
    #[cfg(feature = "gcs")]
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EtlError>,
    },
}

impl EtlError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EtlError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable machine-readable code, recorded on failed task results.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::UnknownTable { .. } => "UNKNOWN_TABLE",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            #[cfg(feature = "gcs")]
            Self::HttpRequest(_) => "STORAGE_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Check if this error is a resource-threshold breach.
    pub fn is_resource_exhausted(&self) -> bool {
        match self {
            Self::ResourceExhausted(_) => true,
            Self::WithContext { source, .. } => source.is_resource_exhausted(),
            _ => false,
        }
    }

    /// Check if this error means the input object was missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::WithContext { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Errors are serialized as a struct with `code` and `message` fields,
/// which is how they appear in the JSON run report.
impl Serialize for EtlError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("EtlError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, EtlError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| EtlError::Polars(e).with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| EtlError::Io(e).with_context(context))
    }
}

//! Object storage backends.
//!
//! Tables live in a single bucket, addressed as `<dataset>/<table>.parquet`.
//! Raw inputs sit under their source dataset (e.g., `votes`, `hackle`) and
//! cleaned outputs under the output dataset as `<table>_processed.parquet`.
//!
//! # Example
//!
//! ```rust,ignore
//! use etl_processing::storage::{LocalObjectStore, ObjectStore};
//! use std::sync::Arc;
//!
//! let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new("/mnt/bucket"));
//! assert!(store.exists("votes/accounts_user.parquet")?);
//! ```

mod credentials;
mod local;
mod memory;
mod provider;

pub use credentials::{CREDENTIALS_ENV_VAR, resolve_credentials};
pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use provider::ObjectStore;

#[cfg(feature = "gcs")]
mod gcs;
#[cfg(feature = "gcs")]
mod service_account;

#[cfg(feature = "gcs")]
pub use gcs::{GcsConfig, GcsObjectStore};
#[cfg(feature = "gcs")]
pub use service_account::{STORAGE_SCOPE, ServiceAccountKey};

/// Suffix appended to the table name of every cleaned output.
pub const PROCESSED_SUFFIX: &str = "_processed";

/// Key of a raw input table.
pub fn input_key(dataset: &str, table: &str) -> String {
    format!("{}/{}.parquet", dataset, table)
}

/// Name of the cleaned output for `table`.
pub fn processed_name(table: &str) -> String {
    format!("{}{}", table, PROCESSED_SUFFIX)
}

/// Key of the cleaned output for `table`.
pub fn output_key(dataset: &str, table: &str) -> String {
    input_key(dataset, &processed_name(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(
            input_key("votes", "accounts_user"),
            "votes/accounts_user.parquet"
        );
        assert_eq!(
            output_key("processed", "accounts_user"),
            "processed/accounts_user_processed.parquet"
        );
    }
}

//! Object storage trait for abstracting the bucket backend.
//!
//! The loader and writer only talk to storage through [`ObjectStore`], so the
//! pipeline runs unchanged against a mounted directory, an in-memory map, or
//! Google Cloud Storage.
//!
//! # Implementing a New Backend
//!
//! 1. Create a new file in `src/storage/` (e.g., `s3.rs`)
//! 2. Implement the [`ObjectStore`] trait for your backend struct
//! 3. Export the backend in `src/storage/mod.rs`

use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Trait for bucket backends that hold the raw and processed tables.
///
/// Keys are bucket-relative paths such as `votes/accounts_user.parquet`.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the runner shares one store
/// between pool workers.
pub trait ObjectStore: Send + Sync {
    /// Check whether an object exists.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Size of an object in bytes.
    ///
    /// Returns `EtlError::NotFound` when the object is missing.
    fn size(&self, key: &str) -> Result<u64>;

    /// Read an object fully into memory without staging it on disk.
    ///
    /// Returns `Ok(None)` when the backend does not support direct reads;
    /// callers then fall back to [`ObjectStore::download_to`].
    fn read_direct(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Download an object into a local file, overwriting it.
    fn download_to(&self, key: &str, dest: &Path) -> Result<()>;

    /// Upload a local file as an object, failing if the transfer exceeds `timeout`.
    fn upload_from(&self, src: &Path, key: &str, timeout: Duration) -> Result<()>;

    /// Full, human-readable location of a key (e.g., `gs://bucket/key`).
    fn uri(&self, key: &str) -> String;

    /// Backend name for logging and debugging.
    fn name(&self) -> &str;
}

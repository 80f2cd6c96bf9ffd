//! Table loading from object storage.

use polars::prelude::*;
use std::fs::File;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::EtlConfig;
use crate::error::{EtlError, Result, ResultExt};
use crate::guard::ResourceGuard;
use crate::storage::{ObjectStore, input_key};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Loads whole Parquet tables from an [`ObjectStore`].
///
/// Before any transfer the loader checks host memory against its ceiling and
/// confirms the object exists. Downloads staged on disk are removed on every
/// exit path.
pub struct TableLoader {
    store: Arc<dyn ObjectStore>,
    guard: ResourceGuard,
    staging_dir: PathBuf,
    memory_ceiling: f64,
    large_object_warn_mb: f64,
}

impl TableLoader {
    pub fn new(store: Arc<dyn ObjectStore>, guard: ResourceGuard, config: &EtlConfig) -> Self {
        Self {
            store,
            guard,
            staging_dir: config.staging_dir.clone(),
            memory_ceiling: config.loader_memory_ceiling,
            large_object_warn_mb: config.large_object_warn_mb,
        }
    }

    /// Load `<dataset>/<table>.parquet` into memory.
    ///
    /// # Errors
    ///
    /// - `ResourceExhausted` if memory is above the loader ceiling (checked first)
    /// - `NotFound` if the object does not exist
    /// - `Storage`, `Io` or `Polars` errors from the transfer or decode
    pub fn load(&self, table: &str, dataset: &str) -> Result<DataFrame> {
        let key = input_key(dataset, table);
        let uri = self.store.uri(&key);
        info!("Loading {} from {}", table, uri);

        let before = self.guard.check_memory(self.memory_ceiling)?;
        info!("Memory usage before load: {:.1}%", before);

        if !self.store.exists(&key)? {
            return Err(EtlError::NotFound(uri));
        }

        let size_mb = self.store.size(&key)? as f64 / BYTES_PER_MB;
        info!("Object size: {:.1}MB", size_mb);
        if size_mb > self.large_object_warn_mb {
            warn!(
                "Large object detected: {:.1}MB; loading may take a while",
                size_mb
            );
        }

        let df = match self.store.read_direct(&key)? {
            Some(bytes) => ParquetReader::new(Cursor::new(bytes))
                .finish()
                .context(format!("decode {}", uri))?,
            None => {
                info!("Direct reads unavailable on {}; staging a local copy", self.store.name());
                self.load_staged(table, dataset, &key)?
            }
        };

        info!("Loaded {}: {} rows, {} columns", table, df.height(), df.width());
        if let Ok(after) = self.guard.memory_pct() {
            info!(
                "Memory usage after load: {:.1}% ({:+.1}%)",
                after,
                after - before
            );
        }

        Ok(df)
    }

    fn load_staged(&self, table: &str, dataset: &str, key: &str) -> Result<DataFrame> {
        // Removed when `staged` drops, whichever way this function returns.
        let staged = tempfile::Builder::new()
            .prefix(&format!("{}_{}_", table, dataset))
            .suffix(".parquet")
            .tempfile_in(&self.staging_dir)
            .context(format!("create temp file in {}", self.staging_dir.display()))?;

        self.store.download_to(key, staged.path())?;
        debug!("Downloaded {} to {}", key, staged.path().display());

        let file = File::open(staged.path()).context(format!("open {}", staged.path().display()))?;
        let df = ParquetReader::new(file)
            .finish()
            .context(format!("decode {}", self.store.uri(key)))?;
        Ok(df)
    }
}

//! Persisting cleaned tables to object storage.

use polars::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EtlConfig;
use crate::error::{EtlError, Result, ResultExt};
use crate::storage::{ObjectStore, output_key, processed_name};
use crate::types::{StorageInfo, round_to};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Writes cleaned tables as snappy-compressed Parquet.
///
/// The table is serialized to a temporary file in the staging directory,
/// uploaded, and verified remotely. The temporary file is removed whether or
/// not the upload succeeds.
pub struct TableWriter {
    store: Arc<dyn ObjectStore>,
    staging_dir: PathBuf,
    upload_timeout: Duration,
}

impl TableWriter {
    pub fn new(store: Arc<dyn ObjectStore>, config: &EtlConfig) -> Self {
        Self {
            store,
            staging_dir: config.staging_dir.clone(),
            upload_timeout: Duration::from_secs(config.upload_timeout_secs),
        }
    }

    /// Write `df` to `<dataset>/<table>_processed.parquet`.
    ///
    /// # Errors
    ///
    /// - `Validation` if `df` has no rows (nothing is written)
    /// - `Storage` if the upload fails or the object is missing afterwards
    pub fn write(&self, df: &mut DataFrame, table: &str, dataset: &str) -> Result<StorageInfo> {
        let table_name = processed_name(table);
        if df.height() == 0 {
            return Err(EtlError::Validation(format!(
                "refusing to save empty table {}",
                table_name
            )));
        }

        let key = output_key(dataset, table);
        let uri = self.store.uri(&key);
        info!(
            "Saving {}: {} rows, {} columns",
            table_name,
            df.height(),
            df.width()
        );

        let mut staged = tempfile::Builder::new()
            .prefix(&format!("{}_", table_name))
            .suffix(".parquet")
            .tempfile_in(&self.staging_dir)
            .context(format!("create temp file in {}", self.staging_dir.display()))?;

        ParquetWriter::new(staged.as_file_mut())
            .with_compression(ParquetCompression::Snappy)
            .finish(df)
            .context(format!("encode {}", table_name))?;

        let size_bytes = staged
            .as_file()
            .metadata()
            .context(format!("stat {}", staged.path().display()))?
            .len();
        let size_mb = size_bytes as f64 / BYTES_PER_MB;
        info!("Serialized size: {:.1}MB", size_mb);

        self.store
            .upload_from(staged.path(), &key, self.upload_timeout)?;

        if !self.store.exists(&key)? {
            return Err(EtlError::Storage(format!(
                "upload verification failed: {} not found after upload",
                uri
            )));
        }

        let staged_path = staged.path().to_path_buf();
        if let Err(e) = staged.close() {
            warn!("Failed to remove temp file {}: {}", staged_path.display(), e);
        } else {
            debug!("Removed temp file {}", staged_path.display());
        }

        info!("Saved {} to {}", table_name, uri);
        Ok(StorageInfo {
            table_name,
            rows: df.height(),
            columns: df.width(),
            size_mb: round_to(size_mb, 1),
            path: uri,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalObjectStore, MemoryObjectStore};
    use std::path::Path;

    struct RejectingStore;

    impl ObjectStore for RejectingStore {
        fn exists(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        fn size(&self, key: &str) -> Result<u64> {
            Err(EtlError::NotFound(key.to_string()))
        }
        fn download_to(&self, key: &str, _dest: &Path) -> Result<()> {
            Err(EtlError::NotFound(key.to_string()))
        }
        fn upload_from(&self, _src: &Path, key: &str, _timeout: Duration) -> Result<()> {
            Err(EtlError::Storage(format!("upload to {} timed out", key)))
        }
        fn uri(&self, key: &str) -> String {
            format!("reject://{}", key)
        }
        fn name(&self) -> &str {
            "rejecting"
        }
    }

    /// Accepts uploads but never shows them.
    struct BlackHoleStore;

    impl ObjectStore for BlackHoleStore {
        fn exists(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        fn size(&self, key: &str) -> Result<u64> {
            Err(EtlError::NotFound(key.to_string()))
        }
        fn download_to(&self, key: &str, _dest: &Path) -> Result<()> {
            Err(EtlError::NotFound(key.to_string()))
        }
        fn upload_from(&self, _src: &Path, _key: &str, _timeout: Duration) -> Result<()> {
            Ok(())
        }
        fn uri(&self, key: &str) -> String {
            format!("void://{}", key)
        }
        fn name(&self) -> &str {
            "black-hole"
        }
    }

    fn writer(store: Arc<dyn ObjectStore>, staging: &Path) -> TableWriter {
        let config = EtlConfig::builder().staging_dir(staging).build().unwrap();
        TableWriter::new(store, &config)
    }

    fn staging_is_empty(staging: &Path) -> bool {
        std::fs::read_dir(staging).unwrap().count() == 0
    }

    #[test]
    fn test_write_returns_storage_info() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path().join("bucket")));

        let mut df = df! {
            "user_id" => [1i64, 2],
            "chosen_user_id" => [1i64, 3],
        }
        .unwrap();

        let info = writer(store.clone(), &staging)
            .write(&mut df, "accounts_userquestionrecord", "processed")
            .unwrap();

        assert_eq!(info.table_name, "accounts_userquestionrecord_processed");
        assert_eq!(info.rows, 2);
        assert_eq!(info.columns, 2);
        assert!(info.path.ends_with("processed/accounts_userquestionrecord_processed.parquet"));
        assert!(store
            .exists("processed/accounts_userquestionrecord_processed.parquet")
            .unwrap());
        assert!(staging_is_empty(&staging));
    }

    #[test]
    fn test_empty_table_is_rejected_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new("test"));
        let mut df = df! { "user_id" => Vec::<i64>::new() }.unwrap();

        let err = writer(store.clone(), dir.path())
            .write(&mut df, "accounts_blockrecord", "processed")
            .unwrap_err();

        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(store.keys().is_empty());
        assert!(staging_is_empty(dir.path()));
    }

    #[test]
    fn test_failed_upload_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = df! { "a" => [1i32] }.unwrap();

        let err = writer(Arc::new(RejectingStore), dir.path())
            .write(&mut df, "t", "processed")
            .unwrap_err();

        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert!(staging_is_empty(dir.path()));
    }

    #[test]
    fn test_unverified_upload_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = df! { "a" => [1i32] }.unwrap();

        let err = writer(Arc::new(BlackHoleStore), dir.path())
            .write(&mut df, "t", "processed")
            .unwrap_err();

        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert!(err.to_string().contains("verification"));
        assert!(staging_is_empty(dir.path()));
    }

    #[test]
    fn test_written_object_is_snappy_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new("test"));
        let mut df = df! { "event_key" => ["click", "view", "click"] }.unwrap();

        writer(store.clone(), dir.path())
            .write(&mut df, "hackle_events", "processed")
            .unwrap();

        let bytes = store.get("processed/hackle_events_processed.parquet").unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        let back = ParquetReader::new(std::io::Cursor::new(bytes))
            .finish()
            .unwrap();
        assert!(back.equals(&df));
    }
}

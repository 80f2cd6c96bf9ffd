//! Directory-backed object store.
//!
//! Treats a local directory as the bucket root. This covers buckets mounted
//! into the filesystem as well as local runs and tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::ObjectStore;
use crate::error::{EtlError, Result, ResultExt};

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    direct_reads: bool,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`. Direct reads are enabled.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            direct_reads: true,
        }
    }

    /// Enable or disable direct reads.
    ///
    /// With direct reads disabled, loaders go through a staged download.
    pub fn with_direct_reads(mut self, enabled: bool) -> Self {
        self.direct_reads = enabled;
        self
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for LocalObjectStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key).is_file())
    }

    fn size(&self, key: &str) -> Result<u64> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EtlError::NotFound(self.uri(key)))
            }
            Err(e) => Err(EtlError::Io(e).with_context(format!("stat {}", path.display()))),
        }
    }

    fn read_direct(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.direct_reads {
            return Ok(None);
        }
        let path = self.path_for(key);
        let bytes = fs::read(&path).context(format!("read {}", path.display()))?;
        Ok(Some(bytes))
    }

    fn download_to(&self, key: &str, dest: &Path) -> Result<()> {
        let src = self.path_for(key);
        if !src.is_file() {
            return Err(EtlError::NotFound(self.uri(key)));
        }
        fs::copy(&src, dest).context(format!("copy {} to {}", src.display(), dest.display()))?;
        Ok(())
    }

    fn upload_from(&self, src: &Path, key: &str, _timeout: Duration) -> Result<()> {
        let dest = self.path_for(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context(format!("create {}", parent.display()))?;
        }

        // Copy next to the destination first so readers never see a partial object.
        let partial = dest.with_extension("parquet.partial");
        fs::copy(src, &partial).map_err(|e| {
            EtlError::Storage(format!("upload to {} failed: {}", dest.display(), e))
        })?;
        fs::rename(&partial, &dest).map_err(|e| {
            let _ = fs::remove_file(&partial);
            EtlError::Storage(format!("upload to {} failed: {}", dest.display(), e))
        })?;

        debug!("Uploaded {} -> {}", src.display(), dest.display());
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        self.path_for(key).display().to_string()
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        assert!(!store.exists("votes/accounts_user.parquet").unwrap());
        let err = store.size("votes/accounts_user.parquet").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_upload_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("bucket"));

        let src = dir.path().join("payload.bin");
        fs::write(&src, b"parquet bytes").unwrap();

        store
            .upload_from(&src, "processed/t_processed.parquet", Duration::from_secs(1))
            .unwrap();

        assert!(store.exists("processed/t_processed.parquet").unwrap());
        assert_eq!(store.size("processed/t_processed.parquet").unwrap(), 13);
        assert_eq!(
            store
                .read_direct("processed/t_processed.parquet")
                .unwrap()
                .unwrap(),
            b"parquet bytes".to_vec()
        );
        assert!(
            !dir.path()
                .join("bucket/processed/t_processed.parquet.partial")
                .exists()
        );
    }

    #[test]
    fn test_direct_reads_disabled() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("votes")).unwrap();
        fs::write(dir.path().join("votes/t.parquet"), b"abc").unwrap();

        let store = LocalObjectStore::new(dir.path()).with_direct_reads(false);
        assert!(store.read_direct("votes/t.parquet").unwrap().is_none());

        let dest = dir.path().join("copy.parquet");
        store.download_to("votes/t.parquet", &dest).unwrap();
        assert_eq!(fs::read(dest).unwrap(), b"abc".to_vec());
    }
}

//! In-process object store.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::ObjectStore;
use crate::error::{EtlError, Result, ResultExt};

/// Object store holding every object in a shared map.
///
/// Used for dry runs and tests; supports direct reads.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Store raw bytes under `key`.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects.lock().insert(key.into(), bytes);
    }

    /// Copy of the bytes stored under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ObjectStore for MemoryObjectStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().contains_key(key))
    }

    fn size(&self, key: &str) -> Result<u64> {
        self.objects
            .lock()
            .get(key)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| EtlError::NotFound(self.uri(key)))
    }

    fn read_direct(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get(key)
            .map(Some)
            .ok_or_else(|| EtlError::NotFound(self.uri(key)))
    }

    fn download_to(&self, key: &str, dest: &Path) -> Result<()> {
        let bytes = self
            .get(key)
            .ok_or_else(|| EtlError::NotFound(self.uri(key)))?;
        fs::write(dest, bytes).context(format!("write {}", dest.display()))?;
        Ok(())
    }

    fn upload_from(&self, src: &Path, key: &str, _timeout: Duration) -> Result<()> {
        let bytes = fs::read(src).context(format!("read {}", src.display()))?;
        self.insert(key, bytes);
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("mem://{}/{}", self.bucket, key)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let store = MemoryObjectStore::new("test");
        store.insert("votes/a.parquet", vec![1, 2, 3]);

        assert!(store.exists("votes/a.parquet").unwrap());
        assert_eq!(store.size("votes/a.parquet").unwrap(), 3);
        assert_eq!(store.uri("votes/a.parquet"), "mem://test/votes/a.parquet");
        assert!(store.size("votes/b.parquet").unwrap_err().is_not_found());
    }

    #[test]
    fn test_upload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("out.parquet");
        fs::write(&src, b"xyz").unwrap();

        let store = MemoryObjectStore::new("test");
        store
            .upload_from(&src, "processed/out.parquet", Duration::from_secs(1))
            .unwrap();

        assert_eq!(store.keys(), vec!["processed/out.parquet".to_string()]);
        assert_eq!(store.get("processed/out.parquet").unwrap(), b"xyz".to_vec());
    }
}

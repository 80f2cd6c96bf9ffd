//! Google Cloud Storage backend.
//!
//! This module provides [`GcsObjectStore`], which implements [`ObjectStore`]
//! on top of the GCS JSON API (<https://cloud.google.com/storage/docs/json_api>).
//!
//! Authentication uses a bearer token taken, in order, from:
//!
//! 1. the configuration or the `GCS_ACCESS_TOKEN` environment variable
//! 2. a service-account key (`credentials_path` or `GOOGLE_APPLICATION_CREDENTIALS`)
//! 3. the GCE metadata server
//!
//! Without any of them requests are sent anonymously, which only works for
//! public buckets. A key file that exists but cannot be exchanged for a token
//! is an error.

use reqwest::StatusCode;
use reqwest::blocking::{Body, Client, RequestBuilder};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ObjectStore;
use super::credentials::resolve_credentials;
use super::service_account::ServiceAccountKey;
use crate::error::{EtlError, Result, ResultExt};

/// Default GCS API endpoint.
const DEFAULT_BASE_URL: &str = "https://storage.googleapis.com";

/// Metadata server endpoint for the default service account token.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Environment variable holding a pre-issued access token.
const TOKEN_ENV_VAR: &str = "GCS_ACCESS_TOKEN";

/// Default timeout for metadata and download requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Timeout for the metadata server request.
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ObjectMetadata {
    /// GCS reports sizes as decimal strings.
    size: String,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Configuration for the GCS backend.
#[derive(Debug, Clone)]
pub struct GcsConfig {
    /// Bucket name (without the `gs://` prefix).
    pub bucket: String,
    /// Explicit bearer token. Takes precedence over every other source.
    pub access_token: Option<String>,
    /// Service-account key file. Falls back to `GOOGLE_APPLICATION_CREDENTIALS`.
    pub credentials_path: Option<PathBuf>,
    /// Timeout for metadata and download requests in seconds.
    pub timeout_secs: u64,
    /// Base URL for the API (useful for emulators).
    pub base_url: String,
    /// Whether loaders may read objects straight into memory.
    pub direct_reads: bool,
}

impl GcsConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            access_token: None,
            credentials_path: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            base_url: DEFAULT_BASE_URL.to_string(),
            direct_reads: true,
        }
    }

    /// Set an explicit bearer token.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the service-account key file.
    pub fn credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    /// Set a custom base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Enable or disable direct reads.
    pub fn direct_reads(mut self, enabled: bool) -> Self {
        self.direct_reads = enabled;
        self
    }
}

/// Object store backed by a GCS bucket.
pub struct GcsObjectStore {
    client: Client,
    config: GcsConfig,
    token: Option<String>,
}

impl GcsObjectStore {
    /// Create the store and resolve an access token.
    ///
    /// # Errors
    ///
    /// Fails if a service-account key is present but unusable, or the token
    /// endpoint rejects it.
    pub fn connect(config: GcsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Self::with_client(client, config)
    }

    fn with_client(client: Client, config: GcsConfig) -> Result<Self> {
        let token = Self::resolve_token(&client, &config)?;
        if token.is_none() {
            warn!(
                "No GCS access token found ({} unset, no service-account key, metadata server unreachable); using anonymous requests",
                TOKEN_ENV_VAR
            );
        }

        info!("Using GCS bucket gs://{}", config.bucket);
        Ok(Self {
            client,
            config,
            token,
        })
    }

    fn resolve_token(client: &Client, config: &GcsConfig) -> Result<Option<String>> {
        if let Some(token) = config
            .access_token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()))
        {
            return Ok(Some(token));
        }

        if let Some(path) = resolve_credentials(config.credentials_path.as_deref()) {
            let key = ServiceAccountKey::from_file(&path)?;
            debug!("Exchanging service-account key for {}", key.client_email);
            return key.access_token(client).map(Some);
        }

        Ok(Self::metadata_token(client))
    }

    fn metadata_token(client: &Client) -> Option<String> {
        let response = client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
            .send()
            .ok()?;

        if !response.status().is_success() {
            debug!("Metadata server returned {}", response.status());
            return None;
        }

        response
            .json::<MetadataToken>()
            .ok()
            .map(|t| t.access_token)
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.config.base_url,
            self.config.bucket,
            urlencoding::encode(key)
        )
    }

    fn media_url(&self, key: &str) -> String {
        format!("{}?alt=media", self.object_url(key))
    }

    fn upload_url(&self, key: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.config.base_url,
            self.config.bucket,
            urlencoding::encode(key)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn fetch_metadata(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let response = self
            .authorize(self.client.get(self.object_url(key)))
            .send()?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<ObjectMetadata>()?)),
            status => Err(EtlError::Storage(format!(
                "metadata request for {} failed with {}",
                self.uri(key),
                status
            ))),
        }
    }

    fn get_media(&self, key: &str) -> Result<reqwest::blocking::Response> {
        let response = self
            .authorize(self.client.get(self.media_url(key)))
            .send()?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(EtlError::NotFound(self.uri(key))),
            status if status.is_success() => Ok(response),
            status => Err(EtlError::Storage(format!(
                "download of {} failed with {}",
                self.uri(key),
                status
            ))),
        }
    }
}

impl ObjectStore for GcsObjectStore {
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.fetch_metadata(key)?.is_some())
    }

    fn size(&self, key: &str) -> Result<u64> {
        let metadata = self
            .fetch_metadata(key)?
            .ok_or_else(|| EtlError::NotFound(self.uri(key)))?;
        metadata.size.parse::<u64>().map_err(|e| {
            EtlError::Storage(format!(
                "invalid size '{}' for {}: {}",
                metadata.size,
                self.uri(key),
                e
            ))
        })
    }

    fn read_direct(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.config.direct_reads {
            return Ok(None);
        }
        let bytes = self.get_media(key)?.bytes()?;
        Ok(Some(bytes.to_vec()))
    }

    fn download_to(&self, key: &str, dest: &Path) -> Result<()> {
        let mut response = self.get_media(key)?;
        let mut file = File::create(dest).context(format!("create {}", dest.display()))?;
        response.copy_to(&mut file)?;
        Ok(())
    }

    fn upload_from(&self, src: &Path, key: &str, timeout: Duration) -> Result<()> {
        let file = File::open(src).context(format!("open {}", src.display()))?;
        let response = self
            .authorize(self.client.post(self.upload_url(key)))
            .header("Content-Type", "application/octet-stream")
            .timeout(timeout)
            .body(Body::from(file))
            .send()
            .map_err(|e| {
                EtlError::Storage(format!("upload to {} failed: {}", self.uri(key), e))
            })?;

        if !response.status().is_success() {
            return Err(EtlError::Storage(format!(
                "upload to {} failed with {}",
                self.uri(key),
                response.status()
            )));
        }
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("gs://{}/{}", self.config.bucket, key)
    }

    fn name(&self) -> &str {
        "gcs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::service_account::testing::{serve_once, write_key};

    fn store() -> GcsObjectStore {
        GcsObjectStore {
            client: Client::new(),
            config: GcsConfig::new("warehouse").base_url("http://localhost:4443"),
            token: None,
        }
    }

    #[test]
    fn test_object_url_encodes_key() {
        assert_eq!(
            store().object_url("votes/accounts_user.parquet"),
            "http://localhost:4443/storage/v1/b/warehouse/o/votes%2Faccounts_user.parquet"
        );
    }

    #[test]
    fn test_upload_url() {
        assert_eq!(
            store().upload_url("processed/t_processed.parquet"),
            "http://localhost:4443/upload/storage/v1/b/warehouse/o?uploadType=media&name=processed%2Ft_processed.parquet"
        );
    }

    #[test]
    fn test_uri() {
        assert_eq!(
            store().uri("votes/accounts_user.parquet"),
            "gs://warehouse/votes/accounts_user.parquet"
        );
    }

    #[test]
    fn test_metadata_size_is_string() {
        let metadata: ObjectMetadata =
            serde_json::from_str(r#"{"name": "votes/a.parquet", "size": "1048576"}"#).unwrap();
        assert_eq!(metadata.size.parse::<u64>().unwrap(), 1_048_576);
    }

    #[test]
    fn test_key_file_authenticates_store() {
        let dir = tempfile::tempdir().unwrap();
        let (url, server) = serve_once("200 OK", r#"{"access_token": "ya29.from-key", "expires_in": 3599}"#);
        let key = write_key(dir.path(), &url);

        let client = Client::builder().no_proxy().build().unwrap();
        let config = GcsConfig::new("warehouse").credentials_path(&key);
        let store = GcsObjectStore::with_client(client, config).unwrap();

        assert_eq!(store.token.as_deref(), Some("ya29.from-key"));
        server.join().unwrap();
    }

    #[test]
    fn test_explicit_token_skips_key_exchange() {
        let dir = tempfile::tempdir().unwrap();
        // Nothing listens here; the key must not be used.
        let key = write_key(dir.path(), "http://127.0.0.1:9/token");

        let config = GcsConfig::new("warehouse")
            .access_token("explicit")
            .credentials_path(&key);
        let store = GcsObjectStore::with_client(Client::new(), config).unwrap();
        assert_eq!(store.token.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_unusable_key_fails_connect() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("key.json");
        std::fs::write(&key, "not json").unwrap();

        let config = GcsConfig::new("warehouse").credentials_path(&key);
        let err = GcsObjectStore::with_client(Client::new(), config).err().unwrap();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }
}

//! Service-account key files and the OAuth 2.0 JWT bearer token exchange.
//!
//! The key's private key signs a short-lived RS256 assertion, which the
//! key's `token_uri` trades for a bearer access token.

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{EtlError, Result, ResultExt};

/// Scope requested for bucket reads and writes.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of a signed assertion; the token endpoint caps it at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service-account key file the exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl ServiceAccountKey {
    /// Read a JSON key file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("read {}", path.display()))?;
        serde_json::from_str(&content).map_err(|e| {
            EtlError::InvalidConfig(format!(
                "invalid service-account key {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Sign the bearer assertion for `now` (seconds since the epoch).
    fn assertion(&self, now: i64) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes()).map_err(|e| {
            EtlError::InvalidConfig(format!(
                "invalid private key for {}: {}",
                self.client_email, e
            ))
        })?;

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        let claims = Claims {
            iss: &self.client_email,
            scope: STORAGE_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        jsonwebtoken::encode(&header, &claims, &key).map_err(|e| {
            EtlError::InvalidConfig(format!(
                "cannot sign token request for {}: {}",
                self.client_email, e
            ))
        })
    }

    /// Exchange a signed assertion for an access token.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the private key cannot sign
    /// - `Storage` if the token endpoint rejects the request
    pub fn access_token(&self, client: &Client) -> Result<String> {
        let assertion = self.assertion(Utc::now().timestamp())?;
        let response = client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EtlError::Storage(format!(
                "token exchange for {} failed with {}: {}",
                self.client_email, status, body
            )));
        }

        let token = response.json::<TokenResponse>()?;
        info!("Obtained access token for {}", self.client_email);
        Ok(token.access_token)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{serve_once, write_key};
    use super::*;

    fn client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn test_key_file_defaults_token_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(
            &path,
            r#"{"client_email": "a@b.iam.gserviceaccount.com", "private_key": "x"}"#,
        )
        .unwrap();

        let key = ServiceAccountKey::from_file(&path).unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        assert!(!format!("{:?}", key).contains("private_key:"));
    }

    #[test]
    fn test_malformed_key_file_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(&path, "{\"client_email\": 1}").unwrap();

        let err = ServiceAccountKey::from_file(&path).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_bad_private_key_cannot_sign() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(
            &path,
            r#"{"client_email": "a@b.iam.gserviceaccount.com", "private_key": "not a pem", "token_uri": "http://127.0.0.1:9/token"}"#,
        )
        .unwrap();

        let key = ServiceAccountKey::from_file(&path).unwrap();
        let err = key.access_token(&client()).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_exchange_posts_signed_assertion() {
        let dir = tempfile::tempdir().unwrap();
        let (url, server) = serve_once(
            "200 OK",
            r#"{"access_token": "ya29.test", "expires_in": 3599, "token_type": "Bearer"}"#,
        );
        let key = ServiceAccountKey::from_file(&write_key(dir.path(), &url)).unwrap();

        let token = key.access_token(&client()).unwrap();
        assert_eq!(token, "ya29.test");

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /token"));
        assert!(request.contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"));
        assert!(request.contains("assertion=ey"));
    }

    #[test]
    fn test_rejected_exchange_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let (url, server) = serve_once("401 Unauthorized", r#"{"error": "invalid_grant"}"#);
        let key = ServiceAccountKey::from_file(&write_key(dir.path(), &url)).unwrap();

        let err = key.access_token(&client()).unwrap_err();
        assert_eq!(err.error_code(), "STORAGE_ERROR");
        assert!(err.to_string().contains("invalid_grant"));
        server.join().unwrap();
    }
}

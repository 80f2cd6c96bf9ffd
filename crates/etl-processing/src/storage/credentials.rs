//! Locating the service-account key used by remote stores.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable pointing at a service-account key.
pub const CREDENTIALS_ENV_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Resolve the credential file, preferring an explicit path over the environment.
///
/// Returns `None` (after logging a warning) when no usable file is found. The
/// store may still authenticate through ambient credentials, so this is never
/// an error.
pub fn resolve_credentials(explicit: Option<&Path>) -> Option<PathBuf> {
    let candidate = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CREDENTIALS_ENV_VAR).map(PathBuf::from));

    match candidate {
        Some(path) if path.is_file() => {
            debug!("Using credentials from {}", path.display());
            Some(path)
        }
        Some(path) => {
            warn!(
                "Credential file {} does not exist; relying on ambient credentials",
                path.display()
            );
            None
        }
        None => {
            warn!(
                "{} is not set; relying on ambient credentials",
                CREDENTIALS_ENV_VAR
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_explicit_credentials() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_credentials(Some(&dir.path().join("missing.json"))).is_none());

        let key = dir.path().join("key.json");
        std::fs::write(&key, "{}").unwrap();
        assert_eq!(resolve_credentials(Some(&key)), Some(key));
    }
}

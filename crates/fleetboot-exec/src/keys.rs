//! SSH key sources and loading

use std::env;
use std::path::{Path, PathBuf};

use russh::keys::ssh_key::PrivateKey;
use russh::keys::{decode_secret_key, load_secret_key};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where an SSH private key comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Explicit path to an OpenSSH/PEM key file
    Path(PathBuf),
    /// Name of an environment variable holding the base64-encoded key
    Env(String),
}

impl KeySource {
    /// Load and parse the private key
    ///
    /// Keys are kept in memory only; nothing is written to disk.
    ///
    /// # Errors
    /// Returns `KeyError` if the key cannot be found, decoded or parsed.
    pub fn load(&self) -> Result<PrivateKey, KeyError> {
        match self {
            KeySource::Path(path) => {
                validate_key_permissions(path)?;
                let key = load_secret_key(path, None)
                    .map_err(|e| KeyError::Parse(e.to_string()))?;
                debug!(path = %path.display(), "loaded SSH key from file");
                Ok(key)
            }
            KeySource::Env(var_name) => {
                let encoded =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let pem = decode_env_key(&encoded)?;
                let key =
                    decode_secret_key(&pem, None).map_err(|e| KeyError::Parse(e.to_string()))?;
                debug!(var = %var_name, "loaded SSH key from environment");
                Ok(key)
            }
        }
    }

    /// Human-readable description for logs
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            KeySource::Path(path) => format!("file {}", path.display()),
            KeySource::Env(var) => format!("env ${var}"),
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("decoded key is not valid UTF-8")]
    InvalidUtf8,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("failed to parse private key: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn decode_env_key(encoded: &str) -> Result<String, KeyError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| KeyError::InvalidBase64)?;
    String::from_utf8(bytes).map_err(|_| KeyError::InvalidUtf8)
}

fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            KeyError::NotFound(path.display().to_string())
        } else {
            KeyError::Io(e)
        }
    })?;

    // group and other bits must be clear
    if metadata.permissions().mode() & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_env_key() {
        // "-----BEGIN" in base64
        let decoded = decode_env_key("LS0tLS1CRUdJTg==\n").unwrap();
        assert_eq!(decoded, "-----BEGIN");

        assert!(matches!(
            decode_env_key("not base64!!"),
            Err(KeyError::InvalidBase64)
        ));
    }

    #[test]
    fn test_env_not_set() {
        let source = KeySource::Env("FLEETBOOT_TEST_KEY_THAT_IS_NEVER_SET".to_string());
        assert!(matches!(source.load(), Err(KeyError::EnvNotSet(_))));
    }

    #[test]
    fn test_missing_key_file() {
        let source = KeySource::Path(PathBuf::from("/nonexistent/fleetboot/key.pem"));
        assert!(matches!(source.load(), Err(KeyError::NotFound(_))));
    }

    #[test]
    fn test_open_permissions_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let path = env::temp_dir().join(format!("fleetboot_perm_test_{}", std::process::id()));
        std::fs::write(&path, "not a key").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let result = KeySource::Path(path.clone()).load();
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(KeyError::BadPermissions(_))));
    }

    #[test]
    fn test_key_source_serde() {
        let source: KeySource = serde_json::from_str(r#"{"path":"EC2_generic_key.pem"}"#).unwrap();
        assert_eq!(source, KeySource::Path(PathBuf::from("EC2_generic_key.pem")));

        let source: KeySource = serde_json::from_str(r#"{"env":"AWS_PEM_KEY"}"#).unwrap();
        assert_eq!(source.describe(), "env $AWS_PEM_KEY");
    }
}

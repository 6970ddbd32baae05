//! Configuration for the peerlink agent

use std::env;
use std::path::PathBuf;

use crate::did::VerificationMaterialFormat;
use crate::error::{Error, Result};
use crate::key_store::{KeyMaterialStore, DEFAULT_KEYS_FILE};

/// Environment variable naming the peerlink home directory
pub const HOME_ENV: &str = "PEERLINK_HOME";
/// Environment variable naming the secrets file directly
pub const KEYS_FILE_ENV: &str = "PEERLINK_KEYS_FILE";

/// Configuration options for a peerlink agent
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Path of the secrets file, or `None` for an in-memory store
    pub keys_path: Option<PathBuf>,

    /// Default for wrapping authcrypt in anoncrypt
    pub protect_sender_id: bool,

    /// Format used when resolving DID documents for display
    pub resolution_format: VerificationMaterialFormat,
}

impl AgentConfig {
    /// Creates an in-memory configuration
    pub fn new() -> Self {
        Self {
            keys_path: None,
            protect_sender_id: false,
            resolution_format: VerificationMaterialFormat::Jwk,
        }
    }

    /// Reads `PEERLINK_KEYS_FILE`, then `PEERLINK_HOME`, then falls back to
    /// `~/.peerlink/secrets.json`
    pub fn from_env() -> Result<Self> {
        let keys_path = match (env::var_os(KEYS_FILE_ENV), env::var_os(HOME_ENV)) {
            (Some(file), _) => PathBuf::from(file),
            (None, Some(home)) => PathBuf::from(home).join(DEFAULT_KEYS_FILE),
            (None, None) => KeyMaterialStore::default_key_path().ok_or_else(|| {
                Error::Storage(
                    "Could not determine home directory for default key path".to_string(),
                )
            })?,
        };
        Ok(Self::new().with_keys_path(keys_path))
    }

    /// Uses the secrets file in the given peerlink home directory
    pub fn with_home(self, home: impl Into<PathBuf>) -> Self {
        self.with_keys_path(home.into().join(DEFAULT_KEYS_FILE))
    }

    /// Sets the secrets file path
    pub fn with_keys_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.keys_path = Some(path.into());
        self
    }

    /// Sets the default sender protection policy
    pub fn with_protect_sender_id(mut self, protect: bool) -> Self {
        self.protect_sender_id = protect;
        self
    }

    /// Sets the DID document format
    pub fn with_resolution_format(mut self, format: VerificationMaterialFormat) -> Self {
        self.resolution_format = format;
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods() {
        let config = AgentConfig::new()
            .with_home("/tmp/peerlink")
            .with_protect_sender_id(true)
            .with_resolution_format(VerificationMaterialFormat::Multibase);
        assert_eq!(
            config.keys_path,
            Some(PathBuf::from("/tmp/peerlink/secrets.json"))
        );
        assert!(config.protect_sender_id);
        assert_eq!(
            config.resolution_format,
            VerificationMaterialFormat::Multibase
        );
        assert_eq!(AgentConfig::default().keys_path, None);
    }
}

//! Configuration management for the quay engine.
//!
//! Loads configuration from ${QUAY_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod paths {
    //! Path resolution for quay configuration and data directories.
    //!
    //! QUAY_HOME resolution order:
    //! 1. QUAY_HOME environment variable (if set)
    //! 2. ~/.config/quay (default)

    use std::path::PathBuf;

    /// Returns the quay home directory.
    pub fn quay_home() -> PathBuf {
        if let Ok(home) = std::env::var("QUAY_HOME") {
            return PathBuf::from(home);
        }

        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".config").join("quay"))
            .unwrap_or_else(|_| PathBuf::from(".quay"))
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        quay_home().join("config.toml")
    }

    /// Returns the directory engine log files are written to.
    pub fn logs_dir() -> PathBuf {
        quay_home().join("logs")
    }
}

/// Engine configuration snapshot.
///
/// Returned verbatim by `join_session`/`get_config`, so it stays
/// serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-request event queue capacity; producers block when it is full.
    pub event_buffer: usize,

    /// Timeout for outstanding permission requests in seconds (0 disables).
    /// Expiry behaves as an implicit "no".
    pub permission_timeout_secs: u64,

    /// Default bound for `get_recent_sessions`.
    pub recent_sessions_limit: usize,
}

impl Config {
    const DEFAULT_EVENT_BUFFER: usize = 128;
    const DEFAULT_PERMISSION_TIMEOUT_SECS: u64 = 0;
    const DEFAULT_RECENT_SESSIONS_LIMIT: usize = 20;

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Returns the permission timeout, or `None` when disabled.
    pub fn permission_timeout(&self) -> Option<Duration> {
        if self.permission_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.permission_timeout_secs))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_buffer: Self::DEFAULT_EVENT_BUFFER,
            permission_timeout_secs: Self::DEFAULT_PERMISSION_TIMEOUT_SECS,
            recent_sessions_limit: Self::DEFAULT_RECENT_SESSIONS_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = Config::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.event_buffer, 128);
        assert!(config.permission_timeout().is_none());
        assert_eq!(config.recent_sessions_limit, 20);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "permission_timeout_secs = 30\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.permission_timeout(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.event_buffer, 128);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "event_buffer = \"lots\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}

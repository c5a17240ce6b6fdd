//! Configuration types for the webipc control link.
//!
//! A single RON document configures every participant:
//!
//! ```ron
//! (
//!     queue: (key_path: "/opt/twc", project_id: 'T'),
//!     query: (max_retries: 50, retry_interval_ms: 100),
//!     responder: (poll_interval_ms: 50),
//! )
//! ```
//!
//! Every field has a default, so an empty `()` document is valid.
//!
//! ## Modules
//!
//! - [`queue`]: queue identity and message size
//! - [`timeouts`]: query retry budget and responder polling

pub mod queue;
pub mod timeouts;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use queue::QueueConfig;
pub use timeouts::{QueryTimeouts, ResponderConfig};

use crate::error::{ConfigError, Result};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "WEBIPC_CONFIG";

/// Locations searched, in order, when no explicit file is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./webipc.config.ron", "/etc/webipc/webipc.config.ron"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub query: QueryTimeouts,
    #[serde(default)]
    pub responder: ResponderConfig,
}

impl Config {
    /// Parse a configuration from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not a valid configuration.
    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| ConfigError::Parse {
            path: None,
            reason: e.to_string(),
        })
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        ron::from_str(&text).map_err(|e| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            reason: e.to_string(),
        })
    }

    /// Load the configuration using the following precedence:
    /// 1. `explicit`, when given
    /// 2. `WEBIPC_CONFIG` environment variable
    /// 3. the first of [`DEFAULT_CONFIG_PATHS`] that exists
    /// 4. built-in defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file (argument or environment)
    /// does not exist, or if the chosen file fails to load.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match find_config_file(explicit)? {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading configuration");
                Self::load(&path)
            }
            None => {
                tracing::debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

fn find_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::NotFound(path));
    }

    Ok(DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists()))
}

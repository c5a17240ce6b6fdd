//! Error types for the webipc-common crate.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file exists but could not be read.
    #[error("Failed to read configuration from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration text is not valid RON for [`crate::config::Config`].
    #[error("Invalid configuration{}: {reason}", path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        reason: String,
    },
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;

    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = ConfigError::NotFound(PathBuf::from("/etc/webipc/webipc.config.ron"));
        assert_eq!(
            err.to_string(),
            "Configuration file not found: /etc/webipc/webipc.config.ron"
        );
    }

    #[test]
    fn test_parse_display() {
        let err = ConfigError::Parse {
            path: None,
            reason: "Expected struct".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid configuration: Expected struct");

        let err = ConfigError::Parse {
            path: Some(PathBuf::from("webipc.config.ron")),
            reason: "Expected struct".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration in webipc.config.ron: Expected struct"
        );
    }

    #[test]
    fn test_read_error_source_chain() {
        let err = ConfigError::Read {
            path: PathBuf::from("webipc.config.ron"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        };

        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "Failed to read configuration from webipc.config.ron: access denied"
        );
    }
}

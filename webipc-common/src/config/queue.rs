//! Identity and sizing of the shared message queue.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where the shared queue lives and how large its messages may be.
///
/// The queue key is derived from `key_path` and `project_id` the same way by
/// every participant, so the front end and the backend must agree on both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Existing file or directory whose inode seeds the queue key.
    ///
    /// Default: `/etc/webipc`
    #[serde(default = "defaults::key_path")]
    pub key_path: PathBuf,

    /// Single-character discriminator mixed into the queue key.
    ///
    /// Default: `'T'`
    #[serde(default = "defaults::project_id")]
    pub project_id: char,

    /// Largest record, header included, accepted by the queue.
    ///
    /// Default: 300 bytes
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key_path: defaults::key_path(),
            project_id: defaults::project_id(),
            max_message_size: defaults::max_message_size(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn key_path() -> PathBuf {
        PathBuf::from("/etc/webipc")
    }
    pub const fn project_id() -> char {
        'T'
    }
    pub const fn max_message_size() -> usize {
        300
    }
}

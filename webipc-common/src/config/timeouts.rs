//! Retry and staleness timing for the query protocol.
//!
//! A query call is a bounded poll: `max_retries` receive attempts spaced
//! `retry_interval` apart. With the defaults that is 50 × 100 ms, so a caller
//! waits about five seconds before the backend is declared unresponsive.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing used by the query client while it waits for a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTimeouts {
    /// Number of receive attempts before a query times out.
    ///
    /// Default: 50
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Pause between receive attempts.
    ///
    /// Default: 100 milliseconds
    #[serde(default = "defaults::retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Age after which a response belonging to another caller is presumed
    /// abandoned and dropped instead of being put back on the queue.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::stale_after_secs")]
    pub stale_after_secs: u32,
}

impl QueryTimeouts {
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Upper bound on how long a single query call can block its caller.
    #[must_use]
    pub fn total_wait(&self) -> Duration {
        self.retry_interval().saturating_mul(self.max_retries)
    }
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            retry_interval_ms: defaults::retry_interval_ms(),
            stale_after_secs: defaults::stale_after_secs(),
        }
    }
}

/// Timing used by the responder loop on the backend side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Pause between polls when no request is waiting.
    ///
    /// Default: 50 milliseconds
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl ResponderConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::poll_interval_ms(),
        }
    }
}

mod defaults {
    pub const fn max_retries() -> u32 {
        50
    }
    pub const fn retry_interval_ms() -> u64 {
        100
    }
    pub const fn stale_after_secs() -> u32 {
        30
    }
    pub const fn poll_interval_ms() -> u64 {
        50
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_timeouts_defaults() {
        let timeouts = QueryTimeouts::default();
        assert_eq!(timeouts.max_retries, 50);
        assert_eq!(timeouts.retry_interval_ms, 100);
        assert_eq!(timeouts.stale_after_secs, 30);
    }

    #[test]
    fn test_total_wait() {
        let timeouts = QueryTimeouts::default();
        assert_eq!(timeouts.retry_interval(), Duration::from_millis(100));
        assert_eq!(timeouts.total_wait(), Duration::from_secs(5));
    }

    #[test]
    fn test_responder_defaults() {
        let responder = ResponderConfig::default();
        assert_eq!(responder.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let timeouts: QueryTimeouts = ron::from_str("(max_retries: 10)").unwrap();
        assert_eq!(timeouts.max_retries, 10);
        assert_eq!(timeouts.retry_interval_ms, 100);
        assert_eq!(timeouts.stale_after_secs, 30);
    }
}

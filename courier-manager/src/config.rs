use std::time::Duration;

use courier_queue::RetryPolicy;
use serde::{Deserialize, Serialize};

const fn default_workers() -> usize {
    4
}

const fn default_shutdown_timeout() -> u64 {
    30
}

const fn default_dequeue_backoff_base() -> u64 {
    100
}

const fn default_dequeue_backoff_max() -> u64 {
    30_000
}

/// Spool manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Number of concurrent workers
    ///
    /// Default: 4
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Retry policy for mail that fails unexpectedly while being processed
    #[serde(default)]
    pub retry: RetryPolicy,

    /// How long shutdown waits for in-flight mail, in seconds. Leases still
    /// held afterwards expire and the mail is redelivered after a restart.
    ///
    /// Default: 30
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// First pause after a failed dequeue, in milliseconds, doubling on each
    /// consecutive failure
    ///
    /// Default: 100
    #[serde(default = "default_dequeue_backoff_base")]
    pub dequeue_backoff_base_ms: u64,

    /// Longest pause after failed dequeues, in milliseconds
    ///
    /// Default: 30000
    #[serde(default = "default_dequeue_backoff_max")]
    pub dequeue_backoff_max_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry: RetryPolicy::default(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            dequeue_backoff_base_ms: default_dequeue_backoff_base(),
            dequeue_backoff_max_ms: default_dequeue_backoff_max(),
        }
    }
}

impl ManagerConfig {
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

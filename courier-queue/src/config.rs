use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Queue settings
///
/// ```ron
/// queue: (
///     visibility_timeout_secs: 300,
/// ),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a dequeued mail stays invisible to other workers before its
    /// lease expires and it is handed out again.
    ///
    /// Default: 300 seconds
    #[serde(default = "defaults::visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: defaults::visibility_timeout_secs(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

mod defaults {
    pub const fn visibility_timeout_secs() -> u64 {
        300
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply() {
        let config: QueueConfig = ron::from_str("()").unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.visibility_timeout(), Duration::from_secs(300));

        let config: QueueConfig = ron::from_str("(visibility_timeout_secs: 5)").unwrap();
        assert_eq!(config.visibility_timeout(), Duration::from_secs(5));
    }
}

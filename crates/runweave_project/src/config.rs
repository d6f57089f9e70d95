//! Controller and project creation options.

use runweave_runtime::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Pause between gateway polls while waiting for a run
    pub poll_interval: Duration,
    /// Retries for gateway polls and snapshot reads
    pub max_sync_retries: u32,
    /// Base pause between those retries
    pub sync_backoff: Duration,
}

impl ControllerConfig {
    /// Set poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set snapshot read retries
    #[must_use]
    pub fn with_max_sync_retries(mut self, retries: u32) -> Self {
        self.max_sync_retries = retries;
        self
    }

    /// Set snapshot read backoff
    #[must_use]
    pub fn with_sync_backoff(mut self, backoff: Duration) -> Self {
        self.sync_backoff = backoff;
        self
    }

    /// Retry policy for snapshot reads
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(self.max_sync_retries)
            .with_backoff(self.sync_backoff)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            max_sync_retries: 3,
            sync_backoff: Duration::from_millis(500),
        }
    }
}

/// Options for a new project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectOptions {
    /// Create read-only
    pub read_only: bool,
    /// Lifetime in days
    pub life_time_days: Option<u32>,
    /// Initial runs view
    pub runs_view: Option<u32>,
    /// Hosts file copied into `.config/hosts.json`
    pub hosts_file: Option<PathBuf>,
}

impl ProjectOptions {
    /// Set read-only
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set lifetime
    #[must_use]
    pub fn with_life_time(mut self, days: u32) -> Self {
        self.life_time_days = Some(days);
        self
    }

    /// Set runs view
    #[must_use]
    pub fn with_runs_view(mut self, view: u32) -> Self {
        self.runs_view = Some(view);
        self
    }

    /// Set hosts file
    #[must_use]
    pub fn with_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hosts_file = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_sync_retries, 3);
        assert_eq!(config.sync_backoff, Duration::from_millis(500));
        let policy = config.with_max_sync_retries(5).retry_policy();
        assert_eq!(policy.max_retries, 5);
    }
}

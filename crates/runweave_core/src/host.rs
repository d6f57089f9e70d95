//! Execution host configuration.

use crate::error::{CoreError, CoreResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the built-in local host
pub const LOCALHOST: &str = "localhost";

/// One execution host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Host name used by runs
    pub name: String,
    /// Network address
    pub address: String,
    /// Remote user, if any
    #[serde(default)]
    pub user: Option<String>,
    /// Project directory on the host, if different from the local one
    #[serde(default)]
    pub host_path: Option<PathBuf>,
    /// Queue submission command, if runs go through a batch system
    #[serde(default)]
    pub queue_command: Option<String>,
    /// Cores available to a single run
    #[serde(default = "default_cores")]
    pub max_cores: u32,
}

fn default_cores() -> u32 {
    1
}

impl HostConfig {
    /// Create a host entry
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            user: None,
            host_path: None,
            queue_command: None,
            max_cores: default_cores(),
        }
    }

    /// The built-in local host
    #[must_use]
    pub fn localhost() -> Self {
        Self::new(LOCALHOST, "127.0.0.1")
    }

    /// Set remote user
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set queue command
    #[must_use]
    pub fn with_queue_command(mut self, command: impl Into<String>) -> Self {
        self.queue_command = Some(command.into());
        self
    }

    /// Set max cores
    #[must_use]
    pub fn with_max_cores(mut self, cores: u32) -> Self {
        self.max_cores = cores;
        self
    }
}

/// Ordered set of hosts; never empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsConfig {
    hosts: IndexMap<String, HostConfig>,
}

impl HostsConfig {
    /// Hosts from a list; falls back to localhost when the list is empty
    #[must_use]
    pub fn from_hosts(hosts: Vec<HostConfig>) -> Self {
        let mut map: IndexMap<String, HostConfig> =
            hosts.into_iter().map(|h| (h.name.clone(), h)).collect();
        if map.is_empty() {
            map.insert(LOCALHOST.to_string(), HostConfig::localhost());
        }
        Self { hosts: map }
    }

    /// Load a JSON array of hosts
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, &e))?;
        let hosts: Vec<HostConfig> = serde_json::from_str(&text).map_err(|e| CoreError::ParseError {
            message: format!("{}: {}", path.display(), e),
        })?;
        Ok(Self::from_hosts(hosts))
    }

    /// Write as a JSON array
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let hosts: Vec<&HostConfig> = self.hosts.values().collect();
        let text = serde_json::to_string_pretty(&hosts)?;
        std::fs::write(path, text).map_err(|e| CoreError::io(path, &e))
    }

    /// Host names in file order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    /// Exact lookup
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HostConfig> {
        self.hosts.get(name)
    }

    /// Lookup falling back to the first host with a warning
    #[must_use]
    pub fn resolve(&self, name: &str) -> HostConfig {
        if let Some(host) = self.hosts.get(name) {
            return host.clone();
        }
        let fallback = self
            .hosts
            .values()
            .next()
            .cloned()
            .unwrap_or_else(HostConfig::localhost);
        warn!(
            requested = name,
            fallback = %fallback.name,
            "Unknown host, using the first configured host"
        );
        fallback
    }

    /// Number of hosts
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Always false
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self::from_hosts(Vec::new())
    }
}

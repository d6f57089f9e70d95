//! Per-project settings persisted next to the entity store.

use crate::error::{CoreError, CoreResult};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Project settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// When the project was created
    pub creation_time: Timestamp,
    /// Lifetime in days; `None` means unlimited
    pub life_time_days: Option<u32>,
    /// Refuse every mutation when set
    pub read_only: bool,
    /// Last used runs view (0 = list, 1 = tree)
    pub runs_view: u32,
}

impl ProjectSettings {
    /// Create settings stamped with the current time
    #[must_use]
    pub fn new() -> Self {
        Self {
            creation_time: Timestamp::now(),
            life_time_days: None,
            read_only: false,
            runs_view: 1,
        }
    }

    /// Set read-only flag
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set lifetime in days
    #[must_use]
    pub fn with_life_time(mut self, days: Option<u32>) -> Self {
        self.life_time_days = days;
        self
    }

    /// Set runs view
    #[must_use]
    pub fn with_runs_view(mut self, view: u32) -> Self {
        self.runs_view = view;
        self
    }

    /// Time since creation
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.creation_time.elapsed()
    }

    /// Remaining lifetime, `None` when unlimited
    #[must_use]
    pub fn time_left(&self) -> Option<chrono::Duration> {
        self.life_time_days
            .map(|days| chrono::Duration::days(i64::from(days)) - self.elapsed())
    }

    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, &e))?;
        serde_json::from_str(&text).map_err(|e| CoreError::ParseError {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Write to a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| CoreError::io(path, &e))
    }
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self::new()
    }
}

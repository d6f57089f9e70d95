//! On-disk layout of a project directory.

use crate::error::{ProjectError, ProjectResult};
use runweave_storage::{Store, StoreConfig};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";
/// Runs directory name; working directories live below it
pub const RUNS_DIR: &str = "Runs";
/// Logs directory name
pub const LOGS_DIR: &str = "Logs";
/// Temporary files directory name
pub const TMP_DIR: &str = "Tmp";
/// Uploads directory name
pub const UPLOADS_DIR: &str = "Uploads";
/// Configuration directory name
pub const CONFIG_DIR: &str = ".config";

/// Paths of one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
    store: StoreConfig,
}

impl ProjectPaths {
    /// Layout rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            store: StoreConfig::default(),
        }
    }

    /// Project root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store configuration
    #[must_use]
    pub fn store_config(&self) -> &StoreConfig {
        &self.store
    }

    /// Entity store file
    #[must_use]
    pub fn db(&self) -> PathBuf {
        Store::file_path(&self.store, &self.root)
    }

    /// `settings.json`
    #[must_use]
    pub fn settings(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    /// `Runs/`
    #[must_use]
    pub fn runs(&self) -> PathBuf {
        self.root.join(RUNS_DIR)
    }

    /// `.config/hosts.json`
    #[must_use]
    pub fn hosts_file(&self) -> PathBuf {
        self.root.join(CONFIG_DIR).join("hosts.json")
    }

    /// `.config/protocols.json`
    #[must_use]
    pub fn protocols_file(&self) -> PathBuf {
        self.root.join(CONFIG_DIR).join("protocols.json")
    }

    /// Resolve a path relative to the root
    #[must_use]
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// True when the directory holds a project store
    #[must_use]
    pub fn is_project(&self) -> bool {
        self.db().is_file()
    }

    /// Create the directory layout
    ///
    /// # Errors
    ///
    /// Returns error if a directory cannot be created
    pub fn make_dirs(&self) -> ProjectResult<()> {
        for name in [RUNS_DIR, LOGS_DIR, TMP_DIR, UPLOADS_DIR, CONFIG_DIR] {
            let dir = self.root.join(name);
            std::fs::create_dir_all(&dir).map_err(|e| ProjectError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Remove the store, settings and generated directories of an earlier project
    ///
    /// # Errors
    ///
    /// Returns error if something exists but cannot be removed
    pub fn clean(&self) -> ProjectResult<()> {
        for file in [self.db(), self.settings()] {
            if file.exists() {
                debug!(path = %file.display(), "Removing old project file");
                std::fs::remove_file(&file).map_err(|e| ProjectError::io(&file, e))?;
            }
        }
        for name in [RUNS_DIR, LOGS_DIR, TMP_DIR] {
            let dir = self.root.join(name);
            if dir.exists() {
                debug!(path = %dir.display(), "Removing old project directory");
                std::fs::remove_dir_all(&dir).map_err(|e| ProjectError::io(&dir, e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        paths.make_dirs().unwrap();
        assert!(dir.path().join("Runs").is_dir());
        assert!(dir.path().join(".config").is_dir());
        assert_eq!(paths.db(), dir.path().join("project.redb"));
        assert!(!paths.is_project());
    }

    #[test]
    fn test_clean_removes_previous_data() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ProjectPaths::new(dir.path());
        paths.make_dirs().unwrap();
        std::fs::write(paths.settings(), "{}").unwrap();
        std::fs::create_dir_all(paths.runs().join("000001_import")).unwrap();
        std::fs::write(dir.path().join("Uploads/keep.txt"), "x").unwrap();

        paths.clean().unwrap();
        assert!(!paths.settings().exists());
        assert!(!paths.runs().exists());
        assert!(dir.path().join("Uploads/keep.txt").exists());
    }
}

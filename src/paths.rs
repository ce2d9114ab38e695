//! Centralized path utilities for the launcher data root.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// File name of the release manifest inside an installed version directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Get the default root data directory (~/.hagicode_launcher).
pub fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| AppError::io("Cannot find home directory"))?;
    Ok(home.join(".hagicode_launcher"))
}

/// Directory layout below a single installation root.
///
/// ```text
/// <root>/config.toml
/// <root>/apps/installed/<id>/
/// <root>/apps/cache/
/// <root>/apps/logs/<id>/
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    pub fn installed_dir(&self) -> PathBuf {
        self.apps_dir().join("installed")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.apps_dir().join("cache")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.apps_dir().join("logs")
    }

    /// Get the install directory for a version.
    pub fn version_dir(&self, id: &str) -> PathBuf {
        self.installed_dir().join(id)
    }

    /// Staging directory holding the previous install during a reinstall.
    pub fn version_staging_dir(&self, id: &str) -> PathBuf {
        self.installed_dir().join(format!("{id}.previous"))
    }

    pub fn version_logs_dir(&self, id: &str) -> PathBuf {
        self.logs_dir().join(id)
    }

    pub fn cached_artifact_path(&self, artifact_filename: &str) -> PathBuf {
        self.cache_dir().join(artifact_filename)
    }

    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.version_dir(id).join(MANIFEST_FILE_NAME)
    }

    /// Ensure all required data directories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| AppError::io(e.to_string()))?;

        let dirs = [self.installed_dir(), self.cache_dir(), self.logs_dir()];
        for dir in &dirs {
            fs::create_dir_all(dir).map_err(|e| AppError::io(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_documented_tree() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.version_dir("hagicode-1.2.0-linux"),
            PathBuf::from("/data/apps/installed/hagicode-1.2.0-linux")
        );
        assert_eq!(layout.cache_dir(), PathBuf::from("/data/apps/cache"));
        assert_eq!(
            layout.version_logs_dir("x"),
            PathBuf::from("/data/apps/logs/x")
        );
        assert_eq!(layout.config_path(), PathBuf::from("/data/config.toml"));
    }

    #[test]
    fn ensure_dirs_creates_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path().join("root"));
        layout.ensure_dirs().unwrap();
        assert!(layout.installed_dir().is_dir());
        assert!(layout.cache_dir().is_dir());
        assert!(layout.logs_dir().is_dir());
    }
}

//! Package source backed by a directory of release artifacts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::filename::parse_artifact_filename;
use super::{AvailableVersion, ValidationResult};
use crate::download::{copy_file, DownloadCallback};
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct LocalFolderSource {
    root: PathBuf,
}

impl LocalFolderSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn list_available_versions(&self) -> Result<Vec<AvailableVersion>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            AppError::io(format!("Failed to read {}: {}", self.root.display(), e))
        })?;

        let mut versions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::io(e.to_string()))?
        {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(parsed) = parse_artifact_filename(file_name) else {
                log::debug!("Skipping unrecognized artifact {}", file_name);
                continue;
            };

            let mut version = AvailableVersion::from_parsed(&parsed, file_name);
            version.size_bytes = Some(metadata.len());
            version.released_at = metadata.modified().ok().map(DateTime::<Utc>::from);
            versions.push(version);
        }

        Ok(versions)
    }

    pub async fn download_package(
        &self,
        version: &AvailableVersion,
        dest: &Path,
        on_progress: DownloadCallback<'_>,
    ) -> Result<()> {
        let src = self.root.join(&version.artifact_filename);
        if !src.is_file() {
            return Err(AppError::version_not_available(&version.id)
                .with_context("path", src.display().to_string()));
        }
        copy_file(&src, dest, on_progress).await
    }

    pub fn validate_config(&self) -> ValidationResult {
        if !self.root.exists() {
            return ValidationResult::invalid(format!("{} does not exist", self.root.display()));
        }
        if !self.root.is_dir() {
            return ValidationResult::invalid(format!("{} is not a directory", self.root.display()));
        }
        ValidationResult::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;

    #[tokio::test]
    async fn lists_only_recognized_artifacts() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("hagicode-1.2.0-linux-x64-nort.zip"), b"zip").unwrap();
        std::fs::write(tmp.path().join("hagicode-1.3.0-beta.1-win-x64.zip"), b"zip").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(tmp.path().join("hagicode-9.9.9-linux.zip")).unwrap();

        let source = LocalFolderSource::new(tmp.path());
        let mut versions = source.list_available_versions().await.unwrap();
        versions.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].id, "hagicode-1.2.0-linux");
        assert_eq!(versions[0].size_bytes, Some(3));
        assert_eq!(versions[1].platform, Platform::Windows);
        assert_eq!(versions[1].channel, "beta");
    }

    #[tokio::test]
    async fn download_copies_artifact() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("hagicode-1.2.0-linux.zip"), b"payload").unwrap();
        let source = LocalFolderSource::new(tmp.path());
        let version = source.list_available_versions().await.unwrap().remove(0);

        let dest = tmp.path().join("cache").join(&version.artifact_filename);
        source.download_package(&version, &dest, &|_| {}).await.unwrap();
        assert_eq!(std::fs::read(dest).unwrap(), b"payload");
    }

    #[test]
    fn validates_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(LocalFolderSource::new(tmp.path()).validate_config().valid);
        let missing = LocalFolderSource::new(tmp.path().join("missing")).validate_config();
        assert!(!missing.valid);
        assert!(missing.error.is_some());
    }
}

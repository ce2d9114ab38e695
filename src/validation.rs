use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::paths::DataLayout;

/// Reject ids that could escape the install root once joined onto a path.
pub fn validate_version_id(id: &str) -> Result<()> {
    let is_safe = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'));

    if !is_safe {
        return Err(AppError::version_not_found(id));
    }

    Ok(())
}

/// Validate an artifact file name before it is joined onto the cache dir.
pub fn validate_artifact_filename(name: &str) -> Result<()> {
    let is_safe = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'));

    if !is_safe {
        return Err(AppError::io(format!("Invalid artifact file name: {name}")));
    }

    Ok(())
}

/// Resolve the install directory for a version, ensuring it stays inside the installed dir.
pub fn resolve_version_dir(layout: &DataLayout, id: &str) -> Result<PathBuf> {
    validate_version_id(id)?;

    let installed_dir = layout.installed_dir();
    let installed_canonical = ensure_and_canonicalize_dir(&installed_dir, "installed")?;
    let version_dir = layout.version_dir(id);

    if version_dir.exists() {
        let canonical = version_dir
            .canonicalize()
            .map_err(|e| AppError::io(format!("Failed to resolve version dir: {}", e)))?;
        if !canonical.starts_with(&installed_canonical) {
            return Err(AppError::io(
                "Version dir is outside the installed directory",
            ));
        }
        return Ok(canonical);
    }

    if !version_dir.starts_with(&installed_dir) {
        return Err(AppError::io(
            "Version dir is outside the installed directory",
        ));
    }

    Ok(version_dir)
}

fn ensure_and_canonicalize_dir(path: &Path, label: &str) -> Result<PathBuf> {
    fs::create_dir_all(path)
        .map_err(|e| AppError::io(format!("Failed to create {} dir: {}", label, e)))?;
    path.canonicalize()
        .map_err(|e| AppError::io(format!("Failed to resolve {} dir: {}", label, e)))
}

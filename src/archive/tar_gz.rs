use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};

use super::extract::{write_entry, EntryKind, EntryProgress};
use super::path::{detect_common_top_dir, is_unsafe_entry, parse_entry_rel_path, strip_common_top_dir};

fn open_tar_gz(archive_path: &Path) -> Result<tar::Archive<flate2::read::GzDecoder<fs::File>>> {
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::io(format!("failed to open {archive_path:?}: {e}")))?;
    Ok(tar::Archive::new(flate2::read::GzDecoder::new(file)))
}

fn entry_path_string<R: std::io::Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let path = entry.path().map_err(|e| AppError::io(e.to_string()))?;
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::io(format!("archive entry path is not valid UTF-8: {path:?}")))
}

/// Collect every entry path in a first pass so the shared root and total can be known.
fn scan_entry_paths(archive_path: &Path) -> Result<Vec<String>> {
    let mut archive = open_tar_gz(archive_path)?;
    let mut paths = Vec::new();
    for entry in archive.entries().map_err(|e| AppError::io(e.to_string()))? {
        let entry = entry.map_err(|e| AppError::io(e.to_string()))?;
        paths.push(entry_path_string(&entry)?);
    }
    Ok(paths)
}

/// Extract a tar.gz archive into `dest_dir`, stripping a shared top-level directory.
///
/// Link entries are skipped with a warning.
pub(crate) fn extract_tar_gz(
    archive_path: &Path,
    dest_dir: &Path,
    on_entry: EntryProgress<'_>,
) -> Result<()> {
    fs::create_dir_all(dest_dir).map_err(|e| AppError::io(e.to_string()))?;

    let paths = scan_entry_paths(archive_path)?;
    if let Some(bad) = paths.iter().find(|p| is_unsafe_entry(p)) {
        return Err(AppError::io(format!(
            "archive contains unsafe entry path: {bad:?}"
        )));
    }
    let top_dir = detect_common_top_dir(paths.iter().map(String::as_str));
    let total = paths.len();

    let mut archive = open_tar_gz(archive_path)?;
    for (index, entry) in archive
        .entries()
        .map_err(|e| AppError::io(e.to_string()))?
        .enumerate()
    {
        let mut entry = entry.map_err(|e| AppError::io(e.to_string()))?;
        on_entry(index + 1, total);

        let raw_path = entry_path_string(&entry)?;
        let Some(relative) = parse_entry_rel_path(&raw_path) else {
            continue;
        };
        let Some(relative) = strip_common_top_dir(&relative, top_dir.as_deref()) else {
            continue;
        };

        let entry_type = entry.header().entry_type();
        let kind = if entry_type.is_dir() {
            EntryKind::Dir
        } else if entry_type.is_file() {
            EntryKind::File {
                declared_size: entry
                    .header()
                    .size()
                    .map_err(|e| AppError::io(e.to_string()))?,
            }
        } else {
            log::warn!(
                "Skipping unsupported tar entry {:?} ({:?})",
                raw_path,
                entry_type
            );
            continue;
        };

        let unix_mode = entry.header().mode().ok();
        write_entry(&dest_dir.join(relative), kind, &mut entry, unix_mode)?;
    }

    Ok(())
}

use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};

use super::extract::{write_entry, EntryKind, EntryProgress};
use super::path::{detect_common_top_dir, is_unsafe_entry, parse_entry_rel_path, strip_common_top_dir};

fn open_zip(archive_path: &Path) -> Result<zip::ZipArchive<fs::File>> {
    let file = fs::File::open(archive_path)
        .map_err(|e| AppError::io(format!("failed to open {archive_path:?}: {e}")))?;
    Ok(zip::ZipArchive::new(file)?)
}

/// Extract a zip archive into `dest_dir`, stripping a shared top-level directory.
///
/// Symlink entries are skipped; release archives are expected to carry plain files.
pub(crate) fn extract_zip(
    archive_path: &Path,
    dest_dir: &Path,
    on_entry: EntryProgress<'_>,
) -> Result<()> {
    fs::create_dir_all(dest_dir).map_err(|e| AppError::io(e.to_string()))?;
    let mut archive = open_zip(archive_path)?;

    if let Some(bad) = archive.file_names().find(|name| is_unsafe_entry(name)) {
        return Err(AppError::io(format!(
            "archive contains unsafe zip path: {bad:?}"
        )));
    }
    let top_dir = detect_common_top_dir(archive.file_names());
    let total = archive.len();

    for index in 0..total {
        let mut entry = archive.by_index(index)?;
        on_entry(index + 1, total);

        let Some(relative) = parse_entry_rel_path(entry.name()) else {
            continue;
        };
        let Some(relative) = strip_common_top_dir(&relative, top_dir.as_deref()) else {
            continue;
        };

        if entry.is_symlink() {
            log::warn!("Skipping symlink entry {:?} in {:?}", relative, archive_path);
            continue;
        }

        let kind = if entry.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File {
                declared_size: entry.size(),
            }
        };
        let unix_mode = entry.unix_mode();
        write_entry(&dest_dir.join(relative), kind, &mut entry, unix_mode)?;
    }

    Ok(())
}

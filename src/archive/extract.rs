use std::fs;
use std::io;
use std::path::Path;

use crate::error::{AppError, Result};

/// Entry-level extraction progress: `(entries_done, entries_total)`.
pub type EntryProgress<'a> = &'a mut dyn FnMut(usize, usize);

/// Kind of an archive entry after link entries have been filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EntryKind {
    Dir,
    File { declared_size: u64 },
}

/// Write one entry below `dest_dir`; returns the number of bytes written.
pub(super) fn write_entry<R>(
    out_path: &Path,
    kind: EntryKind,
    reader: &mut R,
    unix_mode: Option<u32>,
) -> Result<u64>
where
    R: io::Read,
{
    let declared_size = match kind {
        EntryKind::Dir => {
            fs::create_dir_all(out_path).map_err(|e| {
                AppError::io(format!("failed to create directory {out_path:?}: {e}"))
            })?;
            return Ok(0);
        }
        EntryKind::File { declared_size } => declared_size,
    };

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("failed to create directory {parent:?}: {e}")))?;
    }

    let mut outfile = fs::File::create(out_path)
        .map_err(|e| AppError::io(format!("failed to create {out_path:?}: {e}")))?;
    let written = io::copy(reader, &mut outfile)
        .map_err(|e| AppError::io(format!("failed to write {out_path:?}: {e}")))?;
    if written != declared_size {
        return Err(AppError::io(format!(
            "archive entry {out_path:?} is truncated: expected {declared_size} bytes, got {written}",
        )));
    }

    apply_mode(out_path, unix_mode)?;
    Ok(written)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    let Some(mode) = mode.map(|m| m & 0o7777).filter(|m| *m != 0) else {
        return Ok(());
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| AppError::io(format!("failed to set permissions on {path:?}: {e}")))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

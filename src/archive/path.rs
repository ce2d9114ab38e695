use std::path::{Path, PathBuf};

fn has_windows_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Convert an archive entry path to a relative PathBuf, rejecting absolute or traversal paths.
///
/// Returns `None` for entries that resolve to nothing (e.g. `./`).
pub(crate) fn parse_entry_rel_path(raw: &str) -> Option<PathBuf> {
    let normalized = raw.replace('\\', "/");
    if normalized.starts_with('/') || has_windows_drive_prefix(&normalized) {
        return None;
    }

    let mut relative = PathBuf::new();
    for part in normalized.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            _ => relative.push(part),
        }
    }

    if relative.as_os_str().is_empty() {
        return None;
    }

    Some(relative)
}

/// Whether an entry path is unsafe to extract (absolute or traversing upwards).
pub(crate) fn is_unsafe_entry(raw: &str) -> bool {
    let normalized = raw.replace('\\', "/");
    normalized.starts_with('/')
        || has_windows_drive_prefix(&normalized)
        || normalized.split('/').any(|part| part == "..")
}

/// Detect a top-level directory shared by every entry.
///
/// Only reported when at least one entry is nested below it, so a flat
/// archive holding a single file keeps that file.
pub(crate) fn detect_common_top_dir<'a, I>(paths: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidate: Option<String> = None;
    let mut saw_nested = false;

    for raw in paths {
        let Some(relative) = parse_entry_rel_path(raw) else {
            continue;
        };
        let mut components = relative.components();
        let first = components.next()?.as_os_str().to_str()?.to_string();
        if components.next().is_some() {
            saw_nested = true;
        }
        match candidate.as_deref() {
            None => candidate = Some(first),
            Some(existing) if existing == first => {}
            Some(_) => return None,
        }
    }

    if saw_nested {
        candidate
    } else {
        None
    }
}

/// Strip the common top-level directory from a relative path, if present.
///
/// Returns `None` for the top-level directory entry itself.
pub(crate) fn strip_common_top_dir(relative: &Path, top_dir: Option<&str>) -> Option<PathBuf> {
    let Some(top) = top_dir else {
        return Some(relative.to_path_buf());
    };

    let stripped = relative.strip_prefix(top).ok()?;
    if stripped.as_os_str().is_empty() {
        None
    } else {
        Some(stripped.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_absolute_paths() {
        assert!(parse_entry_rel_path("../evil").is_none());
        assert!(parse_entry_rel_path("/etc/passwd").is_none());
        assert!(parse_entry_rel_path("C:\\windows").is_none());
        assert!(is_unsafe_entry("a/../../b"));
        assert!(!is_unsafe_entry("a/b/c.txt"));
    }

    #[test]
    fn normalizes_backslashes() {
        assert_eq!(
            parse_entry_rel_path("app\\bin\\hagicode").unwrap(),
            PathBuf::from("app/bin/hagicode")
        );
    }

    #[test]
    fn detects_shared_root() {
        let entries = ["hagicode-1.2.0/", "hagicode-1.2.0/manifest.json", "hagicode-1.2.0/bin/app"];
        assert_eq!(
            detect_common_top_dir(entries).as_deref(),
            Some("hagicode-1.2.0")
        );
    }

    #[test]
    fn no_shared_root_for_flat_archives() {
        assert_eq!(detect_common_top_dir(["manifest.json", "bin/app"]), None);
        assert_eq!(detect_common_top_dir(["single.txt"]), None);
    }

    #[test]
    fn strips_root() {
        let stripped = strip_common_top_dir(Path::new("root/bin/app"), Some("root")).unwrap();
        assert_eq!(stripped, PathBuf::from("bin/app"));
        assert!(strip_common_top_dir(Path::new("root"), Some("root")).is_none());
    }
}

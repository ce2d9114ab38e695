//! Release archive extraction.

mod extract;
mod path;
mod tar_gz;
mod zip_ops;

use std::path::Path;

use walkdir::WalkDir;

use crate::error::{AppError, Result};

pub use extract::EntryProgress;

/// Archive formats release artifacts are published in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// Extract `archive_path` into `dest_dir` according to its file extension.
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    on_entry: EntryProgress<'_>,
) -> Result<()> {
    let name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    match ArchiveFormat::from_filename(name) {
        Some(ArchiveFormat::Zip) => zip_ops::extract_zip(archive_path, dest_dir, on_entry),
        Some(ArchiveFormat::TarGz) => tar_gz::extract_tar_gz(archive_path, dest_dir, on_entry),
        None => Err(AppError::io(format!("Unsupported archive format: {name}"))),
    }
}

/// Set executable bits on files under `dir` whose file name is in `names`
/// or that are shell scripts. Returns how many files were touched.
#[cfg(unix)]
pub fn mark_executables(dir: &Path, names: &[String]) -> Result<usize> {
    use std::os::unix::fs::PermissionsExt as _;

    let mut marked = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        let recognized =
            file_name.ends_with(".sh") || names.iter().any(|n| n.as_str() == file_name);
        if !recognized {
            continue;
        }

        let metadata = entry.metadata()?;
        let mode = metadata.permissions().mode();
        if mode & 0o111 != 0o111 {
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode | 0o755))
                .map_err(|e| {
                    AppError::io(format!("failed to chmod {:?}: {e}", entry.path()))
                })?;
        }
        marked += 1;
    }
    Ok(marked)
}

#[cfg(not(unix))]
pub fn mark_executables(dir: &Path, _names: &[String]) -> Result<usize> {
    for entry in WalkDir::new(dir) {
        entry?;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn write_tar_gz(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn detects_format_from_name() {
        assert_eq!(ArchiveFormat::from_filename("a.ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_filename("a.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_filename("a.tgz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_filename("a.rar"), None);
    }

    #[test]
    fn zip_is_extracted_without_top_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("hagicode-1.2.0-linux-x64.zip");
        write_zip(
            &archive,
            &[
                ("hagicode-1.2.0/manifest.json", "{}"),
                ("hagicode-1.2.0/bin/hagicode", "binary"),
            ],
        );

        let dest = tmp.path().join("out");
        let mut seen = Vec::new();
        extract_archive(&archive, &dest, &mut |done, total| seen.push((done, total))).unwrap();

        assert!(dest.join("manifest.json").is_file());
        assert_eq!(
            std::fs::read_to_string(dest.join("bin/hagicode")).unwrap(),
            "binary"
        );
        assert_eq!(seen.last(), Some(&(2, 2)));
    }

    #[test]
    fn zip_with_traversal_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("evil.zip");
        write_zip(&archive, &[("../escape.txt", "x")]);
        let dest = tmp.path().join("out");
        assert!(extract_archive(&archive, &dest, &mut |_, _| {}).is_err());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn tar_gz_is_extracted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("hagicode-1.2.0-osx.tar.gz");
        write_tar_gz(
            &archive,
            &[("pkg/manifest.json", "{}"), ("pkg/lib/readme.txt", "hi")],
        );
        let dest = tmp.path().join("out");
        extract_archive(&archive, &dest, &mut |_, _| {}).unwrap();
        assert!(dest.join("manifest.json").is_file());
        assert!(dest.join("lib/readme.txt").is_file());
    }

    #[test]
    fn unknown_format_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let archive = tmp.path().join("release.rar");
        std::fs::write(&archive, b"x").unwrap();
        assert!(extract_archive(&archive, tmp.path(), &mut |_, _| {}).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn marks_recognized_binaries_executable() {
        use std::os::unix::fs::PermissionsExt as _;

        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("bin")).unwrap();
        let bin = tmp.path().join("bin/hagicode");
        let script = tmp.path().join("install.sh");
        let data = tmp.path().join("data.json");
        for p in [&bin, &script, &data] {
            std::fs::write(p, b"x").unwrap();
            std::fs::set_permissions(p, std::fs::Permissions::from_mode(0o644)).unwrap();
        }

        let marked = mark_executables(tmp.path(), &["hagicode".to_string()]).unwrap();
        assert_eq!(marked, 2);
        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode();
        assert_ne!(mode(&bin) & 0o111, 0);
        assert_ne!(mode(&script) & 0o111, 0);
        assert_eq!(mode(&data) & 0o111, 0);
    }
}

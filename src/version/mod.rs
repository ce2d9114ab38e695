//! Version lifecycle: the installed-version registry and the active pointer.

mod manager;
mod types;

pub use manager::{InstallCallback, VersionManager};
pub use types::{
    InstallProgress, InstallStage, InstalledVersion, SwitchOutcome, SwitchWarning,
    VersionEvent, VersionOperation, VersionStatus,
};

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write as _;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use reqwest::Client;

    use super::*;
    use crate::config::ConfigStore;
    use crate::deps::DependencyResolver;
    use crate::error::ErrorKind;
    use crate::paths::DataLayout;
    use crate::source::{SourceKind, SourceStore};

    const MANIFEST: &str = r#"{
        "name": "hagicode",
        "version": "1.2.0",
        "dependencies": [
            {"key": "runtime", "name": "Runtime", "type": "runtime",
             "checkCommand": "test -f runtime.ok",
             "installCommand": "touch runtime.ok"}
        ],
        "entryPoint": {"command": "./hagicode.sh", "args": ["--port", "{port}"]}
    }"#;

    const READY_MANIFEST: &str = r#"{"dependencies": [
        {"key": "shell", "name": "Shell", "type": "system-requirement", "checkCommand": "true"}
    ]}"#;

    struct Fixture {
        _tmp: tempfile::TempDir,
        layout: DataLayout,
        packages: std::path::PathBuf,
        manager: VersionManager,
    }

    fn write_release(dir: &Path, filename: &str, manifest: &str) {
        let file = std::fs::File::create(dir.join(filename)).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        let top = filename.trim_end_matches(".zip");
        writer
            .start_file(format!("{top}/manifest.json"), options)
            .unwrap();
        writer.write_all(manifest.as_bytes()).unwrap();
        writer
            .start_file(format!("{top}/hagicode.sh"), options)
            .unwrap();
        writer.write_all(b"#!/bin/sh\nsleep 30\n").unwrap();
        writer.finish().unwrap();
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = DataLayout::new(tmp.path().join("root"));
        layout.ensure_dirs().unwrap();
        let packages = tmp.path().join("packages");
        std::fs::create_dir_all(&packages).unwrap();

        let config = Arc::new(ConfigStore::open(layout.config_path()).unwrap());
        let sources = SourceStore::new(Arc::clone(&config), Client::new());
        sources
            .add(
                "Local",
                SourceKind::LocalFolder {
                    path: packages.display().to_string(),
                },
            )
            .unwrap();

        let manager =
            VersionManager::new(layout.clone(), config, sources, DependencyResolver::new());
        Fixture {
            _tmp: tmp,
            layout,
            packages,
            manager,
        }
    }

    #[tokio::test]
    async fn local_folder_install_becomes_active_and_incomplete() {
        let fx = fixture();
        write_release(&fx.packages, "hagicode-1.2.0-linux-x64-nort.zip", MANIFEST);
        let progress = Mutex::new(Vec::new());

        let installed = fx
            .manager
            .install("hagicode-1.2.0-linux", &|p| progress.lock().unwrap().push(p.progress))
            .await
            .unwrap();

        let dir = fx.layout.root().join("apps/installed/hagicode-1.2.0-linux");
        assert!(dir.join("manifest.json").is_file());
        assert_eq!(installed.status, VersionStatus::Incomplete);
        assert!(installed.is_active);
        assert_eq!(installed.dependencies.len(), 1);
        assert!(!installed.dependencies[0].installed);

        let progress = progress.lock().unwrap();
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        use std::os::unix::fs::PermissionsExt as _;
        let mode = std::fs::metadata(dir.join("hagicode.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[tokio::test]
    async fn second_install_does_not_steal_active() {
        let fx = fixture();
        write_release(&fx.packages, "hagicode-1.2.0-linux.zip", READY_MANIFEST);
        write_release(&fx.packages, "hagicode-1.3.0-linux.zip", READY_MANIFEST);

        fx.manager.install("hagicode-1.2.0-linux", &|_| {}).await.unwrap();
        let second = fx
            .manager
            .install("hagicode-1.3.0-linux", &|_| {})
            .await
            .unwrap();

        assert_eq!(second.status, VersionStatus::Ready);
        assert!(!second.is_active);
        assert_eq!(
            fx.manager.active().map(|v| v.id),
            Some("hagicode-1.2.0-linux".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_version_is_not_available() {
        let fx = fixture();
        let err = fx
            .manager
            .install("hagicode-9.9.9-linux", &|_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionNotAvailable);
        assert!(fx.manager.list().is_empty());
    }

    #[tokio::test]
    async fn broken_archive_leaves_nothing_behind() {
        let fx = fixture();
        std::fs::write(fx.packages.join("hagicode-1.2.0-linux.zip"), b"not a zip").unwrap();
        let err = fx
            .manager
            .install("hagicode-1.2.0-linux", &|_| {})
            .await
            .unwrap_err();
        assert_eq!(
            err.payload().get("version_id").map(String::as_str),
            Some("hagicode-1.2.0-linux")
        );
        assert!(!fx.layout.version_dir("hagicode-1.2.0-linux").exists());
        assert!(fx.manager.list().is_empty());
    }

    #[tokio::test]
    async fn uninstall_respects_active_pointer() {
        let fx = fixture();
        write_release(&fx.packages, "hagicode-1.2.0-linux.zip", READY_MANIFEST);
        write_release(&fx.packages, "hagicode-1.3.0-linux.zip", READY_MANIFEST);
        fx.manager.install("hagicode-1.2.0-linux", &|_| {}).await.unwrap();
        fx.manager.install("hagicode-1.3.0-linux", &|_| {}).await.unwrap();

        let err = fx.manager.uninstall("hagicode-1.2.0-linux").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionActive);
        assert!(fx.layout.version_dir("hagicode-1.2.0-linux").exists());

        let mut events = fx.manager.subscribe();
        fx.manager.uninstall("hagicode-1.3.0-linux").await.unwrap();
        assert!(!fx.layout.version_dir("hagicode-1.3.0-linux").exists());
        assert_eq!(fx.manager.list().len(), 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            VersionEvent::Uninstalled { id } if id == "hagicode-1.3.0-linux"
        ));
    }

    #[tokio::test]
    async fn switch_to_incomplete_warns() {
        let fx = fixture();
        write_release(&fx.packages, "hagicode-1.2.0-linux.zip", READY_MANIFEST);
        write_release(&fx.packages, "hagicode-1.3.0-linux.zip", MANIFEST);
        fx.manager.install("hagicode-1.2.0-linux", &|_| {}).await.unwrap();
        fx.manager.install("hagicode-1.3.0-linux", &|_| {}).await.unwrap();

        let outcome = fx.manager.switch_version("hagicode-1.3.0-linux").unwrap();
        assert!(outcome.version.is_active);
        let warning = outcome.warning.unwrap();
        assert_eq!(warning.missing, vec!["runtime".to_string()]);
        assert!(warning.mismatched.is_empty());

        let back = fx.manager.switch_version("hagicode-1.2.0-linux").unwrap();
        assert!(back.warning.is_none());
        assert_eq!(
            fx.manager.switch_version("hagicode-0.0.1-linux").unwrap_err().kind(),
            ErrorKind::VersionNotFound
        );
    }

    #[tokio::test]
    async fn reinstall_keeps_active() {
        let fx = fixture();
        write_release(&fx.packages, "hagicode-1.2.0-linux.zip", READY_MANIFEST);
        fx.manager.install("hagicode-1.2.0-linux", &|_| {}).await.unwrap();
        let marker = fx.layout.version_dir("hagicode-1.2.0-linux").join("stale.txt");
        std::fs::write(&marker, b"x").unwrap();

        let reinstalled = fx
            .manager
            .reinstall_version("hagicode-1.2.0-linux", &|_| {})
            .await
            .unwrap();
        assert!(reinstalled.is_active);
        assert!(!marker.exists());
        assert!(!fx.layout.version_staging_dir("hagicode-1.2.0-linux").exists());
    }

    #[tokio::test]
    async fn failed_reinstall_restores_previous_install() {
        let fx = fixture();
        write_release(&fx.packages, "hagicode-1.2.0-linux.zip", READY_MANIFEST);
        fx.manager.install("hagicode-1.2.0-linux", &|_| {}).await.unwrap();
        std::fs::remove_file(fx.packages.join("hagicode-1.2.0-linux.zip")).unwrap();

        let err = fx
            .manager
            .reinstall_version("hagicode-1.2.0-linux", &|_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionNotAvailable);

        let restored = fx.manager.get("hagicode-1.2.0-linux").unwrap();
        assert!(restored.is_active);
        assert!(fx
            .layout
            .version_dir("hagicode-1.2.0-linux")
            .join("manifest.json")
            .is_file());
    }

    #[tokio::test]
    async fn dependency_install_makes_version_ready() {
        let fx = fixture();
        write_release(&fx.packages, "hagicode-1.2.0-linux.zip", MANIFEST);
        fx.manager.install("hagicode-1.2.0-linux", &|_| {}).await.unwrap();

        let pending = fx
            .manager
            .get_dependency_list_from_manifest("hagicode-1.2.0-linux")
            .unwrap();
        assert!(pending.iter().all(|d| d.is_checking));

        let result = fx
            .manager
            .install_version_dependencies("hagicode-1.2.0-linux", &|_| {})
            .await
            .unwrap();
        assert_eq!(result.success, vec!["runtime".to_string()]);
        assert_eq!(
            fx.manager.get("hagicode-1.2.0-linux").unwrap().status,
            VersionStatus::Ready
        );
    }

    #[tokio::test]
    async fn concurrent_install_of_same_id_is_busy() {
        let fx = fixture();
        write_release(&fx.packages, "hagicode-1.2.0-linux.zip", READY_MANIFEST);

        let (a, b) = tokio::join!(
            fx.manager.install("hagicode-1.2.0-linux", &|_| {}),
            fx.manager.install("hagicode-1.2.0-linux", &|_| {}),
        );
        let busy = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::VersionBusy))
            .count();
        assert_eq!(busy, 1);
        assert!(a.is_ok() || b.is_ok());
    }

    #[tokio::test]
    async fn entry_point_resolves_inside_install_dir() {
        let fx = fixture();
        write_release(&fx.packages, "hagicode-1.2.0-linux.zip", MANIFEST);
        fx.manager.install("hagicode-1.2.0-linux", &|_| {}).await.unwrap();
        let entry = fx.manager.resolve_entry_point("hagicode-1.2.0-linux").unwrap();
        assert!(entry.program.ends_with("hagicode.sh"));
        assert!(entry.program.is_absolute());

        write_release(&fx.packages, "hagicode-1.3.0-linux.zip", READY_MANIFEST);
        fx.manager.install("hagicode-1.3.0-linux", &|_| {}).await.unwrap();
        assert_eq!(
            fx.manager
                .resolve_entry_point("hagicode-1.3.0-linux")
                .unwrap_err()
                .kind(),
            ErrorKind::NoEntryPoint
        );
    }
}

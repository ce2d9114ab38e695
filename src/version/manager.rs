//! Installed-version registry operations: install, uninstall, switch, reinstall.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::types::{
    InstallProgress, InstallStage, InstalledVersion, SwitchOutcome, SwitchWarning,
    VersionEvent, VersionOperation, VersionStatus,
};
use crate::archive::{extract_archive, mark_executables};
use crate::config::ConfigStore;
use crate::deps::{
    BatchInstallResult, CheckContext, DependencyCheckResult, DependencyProgress,
    DependencyResolver,
};
use crate::error::{AppError, Result};
use crate::manifest::{ReleaseManifest, ResolvedEntryPoint};
use crate::paths::DataLayout;
use crate::source::{AvailableVersion, PackageSource, SourceStore};
use crate::validation::{resolve_version_dir, validate_artifact_filename, validate_version_id};

const EVENT_CAPACITY: usize = 64;

pub type InstallCallback<'a> = &'a (dyn Fn(InstallProgress) + Send + Sync);

/// Operation table entry; releases the id when dropped.
struct OperationGuard<'a> {
    table: &'a Mutex<HashMap<String, VersionOperation>>,
    id: String,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

pub struct VersionManager {
    layout: DataLayout,
    config: Arc<ConfigStore>,
    sources: SourceStore,
    resolver: DependencyResolver,
    operations: Mutex<HashMap<String, VersionOperation>>,
    events: broadcast::Sender<VersionEvent>,
}

impl VersionManager {
    pub fn new(
        layout: DataLayout,
        config: Arc<ConfigStore>,
        sources: SourceStore,
        resolver: DependencyResolver,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            layout,
            config,
            sources,
            resolver,
            operations: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VersionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: VersionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn begin(&self, id: &str, operation: VersionOperation) -> Result<OperationGuard<'_>> {
        let mut table = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = table.get(id) {
            return Err(AppError::version_busy(id, current.as_str()));
        }
        table.insert(id.to_string(), operation);
        Ok(OperationGuard {
            table: &self.operations,
            id: id.to_string(),
        })
    }

    fn ensure_idle(&self, id: &str) -> Result<()> {
        let table = self.operations.lock().unwrap_or_else(|e| e.into_inner());
        match table.get(id) {
            Some(current) => Err(AppError::version_busy(id, current.as_str())),
            None => Ok(()),
        }
    }

    /// Operation in flight for `id`, if any.
    pub fn operation(&self, id: &str) -> Option<VersionOperation> {
        self.operations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .copied()
    }

    pub fn list(&self) -> Vec<InstalledVersion> {
        self.config.load().installed_list()
    }

    pub fn get(&self, id: &str) -> Result<InstalledVersion> {
        self.config
            .load()
            .installed_version(id)
            .ok_or_else(|| AppError::version_not_found(id))
    }

    pub fn active(&self) -> Option<InstalledVersion> {
        let config = self.config.load();
        config
            .active_version
            .as_deref()
            .and_then(|id| config.installed_version(id))
    }

    /// Versions offered by the active package source.
    pub async fn list_available(&self) -> Result<Vec<AvailableVersion>> {
        self.sources.active_source()?.list_available_versions().await
    }

    /// Install `id` from the active package source.
    ///
    /// Already-registered versions are returned as-is. The first installed
    /// version becomes active.
    pub async fn install(
        &self,
        id: &str,
        on_progress: InstallCallback<'_>,
    ) -> Result<InstalledVersion> {
        validate_version_id(id)?;
        let _guard = self.begin(id, VersionOperation::Installing)?;

        if let Ok(existing) = self.get(id) {
            log::info!("Version {} is already installed", id);
            return Ok(existing);
        }

        let source = self.sources.active_source()?;
        let available = find_available(&source, id).await?;
        let record = self
            .acquire(&source, &available, on_progress)
            .await
            .map_err(|e| with_version_context(e, &available))?;

        let activated = self.config.update(|config| {
            config.installed_versions.insert(id.to_string(), record);
            let activate = config.active_version.is_none();
            if activate {
                config.active_version = Some(id.to_string());
            }
            Ok(activate)
        })?;

        let installed = self.get(id)?;
        log::info!(
            "Installed {} ({:?}){}",
            id,
            installed.status,
            if activated { ", now active" } else { "" }
        );
        self.emit(VersionEvent::Installed {
            version: installed.clone(),
        });
        if activated {
            self.emit(VersionEvent::ActiveChanged {
                id: Some(id.to_string()),
            });
        }
        report(on_progress, id, InstallStage::Done, 1.0, "Installed");
        Ok(installed)
    }

    /// Remove a non-active version from the registry and disk.
    pub async fn uninstall(&self, id: &str) -> Result<()> {
        validate_version_id(id)?;
        let _guard = self.begin(id, VersionOperation::Uninstalling)?;

        self.config.update(|config| {
            if !config.installed_versions.contains_key(id) {
                return Err(AppError::version_not_found(id));
            }
            if config.active_version.as_deref() == Some(id) {
                return Err(AppError::version_active(id));
            }
            config.installed_versions.remove(id);
            Ok(())
        })?;

        remove_dir_logged(&resolve_version_dir(&self.layout, id)?).await;
        remove_dir_logged(&self.layout.version_logs_dir(id)).await;

        log::info!("Uninstalled {}", id);
        self.emit(VersionEvent::Uninstalled { id: id.to_string() });
        Ok(())
    }

    /// Point the active version at `id`. Incomplete versions are allowed with a warning.
    pub fn switch_version(&self, id: &str) -> Result<SwitchOutcome> {
        validate_version_id(id)?;
        self.ensure_idle(id)?;

        let changed = self.config.update(|config| {
            if !config.installed_versions.contains_key(id) {
                return Err(AppError::version_not_found(id));
            }
            let changed = config.active_version.as_deref() != Some(id);
            config.active_version = Some(id.to_string());
            Ok(changed)
        })?;

        let version = self.get(id)?;
        let warning = SwitchWarning::for_version(&version);
        if let Some(w) = &warning {
            log::warn!("{}", w.message);
        }
        if changed {
            log::info!("Active version is now {}", id);
            self.emit(VersionEvent::ActiveChanged {
                id: Some(id.to_string()),
            });
        }
        Ok(SwitchOutcome { version, warning })
    }

    /// Install `id` again from the active source.
    ///
    /// The previous install is kept aside and restored, together with its
    /// registry record and the active pointer, if the fresh install fails.
    pub async fn reinstall_version(
        &self,
        id: &str,
        on_progress: InstallCallback<'_>,
    ) -> Result<InstalledVersion> {
        validate_version_id(id)?;
        let _guard = self.begin(id, VersionOperation::Reinstalling)?;

        let previous = self.get(id)?;
        let was_active = previous.is_active;
        let install_dir = resolve_version_dir(&self.layout, id)?;
        let staging_dir = self.layout.version_staging_dir(id);

        if staging_dir.exists() {
            remove_dir_logged(&staging_dir).await;
        }

        self.config.update(|config| {
            config.installed_versions.remove(id);
            if was_active {
                config.active_version = None;
            }
            Ok(())
        })?;

        if install_dir.exists() {
            if let Err(e) = tokio::fs::rename(&install_dir, &staging_dir).await {
                self.restore_record(&previous, was_active)?;
                return Err(AppError::io(format!(
                    "Failed to move {} aside: {}",
                    install_dir.display(),
                    e
                )));
            }
        }

        let result = match self.sources.active_source() {
            Ok(source) => match find_available(&source, id).await {
                Ok(available) => self
                    .acquire(&source, &available, on_progress)
                    .await
                    .map_err(|e| with_version_context(e, &available)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(record) => {
                self.config.update(|config| {
                    config.installed_versions.insert(id.to_string(), record);
                    if was_active || config.active_version.is_none() {
                        config.active_version = Some(id.to_string());
                    }
                    Ok(())
                })?;
                remove_dir_logged(&staging_dir).await;

                let installed = self.get(id)?;
                log::info!("Reinstalled {}", id);
                self.emit(VersionEvent::Installed {
                    version: installed.clone(),
                });
                report(on_progress, id, InstallStage::Done, 1.0, "Reinstalled");
                Ok(installed)
            }
            Err(e) => {
                log::error!("Reinstall of {} failed, restoring previous install: {}", id, e);
                if staging_dir.exists() {
                    remove_dir_logged(&install_dir).await;
                    if let Err(re) = tokio::fs::rename(&staging_dir, &install_dir).await {
                        log::error!(
                            "Failed to restore {}: {}",
                            install_dir.display(),
                            re
                        );
                    }
                }
                self.restore_record(&previous, was_active)?;
                Err(e)
            }
        }
    }

    fn restore_record(&self, previous: &InstalledVersion, was_active: bool) -> Result<()> {
        let mut record = previous.clone();
        record.is_active = false;
        self.config.update(move |config| {
            let id = record.id.clone();
            config.installed_versions.insert(id.clone(), record);
            if was_active {
                config.active_version = Some(id);
            }
            Ok(())
        })
    }

    /// Re-run every dependency check of `id` and persist the result.
    pub async fn check_version_dependencies(&self, id: &str) -> Result<InstalledVersion> {
        validate_version_id(id)?;
        self.ensure_idle(id)?;
        self.recheck(id).await
    }

    async fn recheck(&self, id: &str) -> Result<InstalledVersion> {
        let version = self.get(id)?;
        let manifest = ReleaseManifest::load(&version.install_path)?;
        let checks = self
            .resolver
            .check_from_manifest(
                &manifest.dependencies,
                Some(&check_context(&version.install_path)),
            )
            .await;

        let status = self.config.update(|config| {
            let record = config
                .installed_versions
                .get_mut(id)
                .ok_or_else(|| AppError::version_not_found(id))?;
            record.set_dependencies(checks);
            Ok(record.status)
        })?;

        self.emit(VersionEvent::DependenciesUpdated {
            id: id.to_string(),
            status,
        });
        self.get(id)
    }

    /// Declared dependencies of `id` as pending results, without running any command.
    pub fn get_dependency_list_from_manifest(
        &self,
        id: &str,
    ) -> Result<Vec<DependencyCheckResult>> {
        let version = self.get(id)?;
        let manifest = ReleaseManifest::load(&version.install_path)?;
        Ok(manifest
            .dependencies
            .iter()
            .map(DependencyCheckResult::pending)
            .collect())
    }

    /// Best-effort install of the unsatisfied dependencies of `id`, then re-check.
    pub async fn install_version_dependencies(
        &self,
        id: &str,
        on_progress: &(dyn Fn(DependencyProgress) + Send + Sync),
    ) -> Result<BatchInstallResult> {
        validate_version_id(id)?;
        let _guard = self.begin(id, VersionOperation::InstallingDependencies)?;

        let version = self.get(id)?;
        let manifest = ReleaseManifest::load(&version.install_path)?;
        let result = self
            .resolver
            .install_from_manifest(
                &manifest,
                &manifest.dependencies,
                Some(&check_context(&version.install_path)),
                on_progress,
            )
            .await;

        self.recheck(id).await?;
        Ok(result)
    }

    /// Entry point of installed version `id`, bound to its install directory.
    pub fn resolve_entry_point(&self, id: &str) -> Result<ResolvedEntryPoint> {
        let version = self.get(id)?;
        let manifest = ReleaseManifest::load(&version.install_path)?;
        manifest
            .entry_point
            .map(|entry| entry.resolve(&version.install_path))
            .ok_or_else(|| AppError::no_entry_point(id))
    }

    /// Download, extract and inspect `available`. Registers nothing.
    async fn acquire(
        &self,
        source: &PackageSource,
        available: &AvailableVersion,
        on_progress: InstallCallback<'_>,
    ) -> Result<InstalledVersion> {
        let id = available.id.as_str();
        validate_artifact_filename(&available.artifact_filename)?;
        let install_dir = resolve_version_dir(&self.layout, id)?;
        let artifact = self.layout.cached_artifact_path(&available.artifact_filename);

        if install_dir.exists() {
            log::warn!("Removing leftover directory {}", install_dir.display());
            tokio::fs::remove_dir_all(&install_dir).await?;
        }
        tokio::fs::create_dir_all(&install_dir).await?;

        let result = self
            .acquire_into(source, available, &install_dir, &artifact, on_progress)
            .await;

        if artifact.exists() {
            if let Err(e) = tokio::fs::remove_file(&artifact).await {
                log::warn!("Failed to remove cached artifact {:?}: {}", artifact, e);
            }
        }
        if result.is_err() {
            remove_dir_logged(&install_dir).await;
        }
        result
    }

    async fn acquire_into(
        &self,
        source: &PackageSource,
        available: &AvailableVersion,
        install_dir: &Path,
        artifact: &Path,
        on_progress: InstallCallback<'_>,
    ) -> Result<InstalledVersion> {
        let id = available.id.as_str();

        report(on_progress, id, InstallStage::Downloading, 0.0, "Downloading");
        source
            .download_package(available, artifact, &|p| {
                let fraction = p.percent.map_or(0.0, |pct| pct / 100.0);
                report(
                    on_progress,
                    id,
                    InstallStage::Downloading,
                    fraction,
                    "Downloading",
                );
            })
            .await?;

        report(on_progress, id, InstallStage::Extracting, 0.0, "Extracting");
        extract_in_background(artifact, install_dir, |done, total| {
            let fraction = if total == 0 {
                1.0
            } else {
                done as f64 / total as f64
            };
            report(on_progress, id, InstallStage::Extracting, fraction, "Extracting");
        })
        .await?;

        let manifest = ReleaseManifest::load(install_dir)?;
        let marked = mark_executables(install_dir, &manifest.executable_names())?;
        log::debug!("Marked {} executable file(s) in {}", marked, id);

        report(
            on_progress,
            id,
            InstallStage::CheckingDependencies,
            0.0,
            "Checking dependencies",
        );
        let checks = self
            .resolver
            .check_from_manifest(&manifest.dependencies, Some(&check_context(install_dir)))
            .await;
        report(
            on_progress,
            id,
            InstallStage::CheckingDependencies,
            1.0,
            "Checking dependencies",
        );

        let mut record = InstalledVersion {
            id: id.to_string(),
            version: available.version.clone(),
            platform: available.platform,
            artifact_filename: available.artifact_filename.clone(),
            install_path: install_dir.to_path_buf(),
            installed_at: chrono::Utc::now(),
            status: VersionStatus::Incomplete,
            is_active: false,
            dependencies: Vec::new(),
        };
        record.set_dependencies(checks);
        Ok(record)
    }
}

async fn find_available(source: &PackageSource, id: &str) -> Result<AvailableVersion> {
    source
        .list_available_versions()
        .await?
        .into_iter()
        .find(|v| v.id == id)
        .ok_or_else(|| AppError::version_not_available(id))
}

fn check_context(install_dir: &Path) -> CheckContext {
    CheckContext {
        working_dir: Some(install_dir.to_path_buf()),
        timeout: None,
    }
}

fn with_version_context(error: AppError, version: &AvailableVersion) -> AppError {
    error
        .with_context("version_id", version.id.as_str())
        .with_context("version", version.version.as_str())
        .with_context("platform", version.platform.as_str())
}

fn report(
    on_progress: InstallCallback<'_>,
    id: &str,
    stage: InstallStage,
    fraction: f64,
    message: &str,
) {
    on_progress(InstallProgress {
        version_id: id.to_string(),
        stage,
        progress: stage.percent(fraction),
        message: message.to_string(),
    });
}

/// Run the blocking extraction on the blocking pool, forwarding entry progress.
async fn extract_in_background<F>(archive: &Path, dest: &Path, on_entry: F) -> Result<()>
where
    F: Fn(usize, usize),
{
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let archive: PathBuf = archive.to_path_buf();
    let dest: PathBuf = dest.to_path_buf();

    let handle = tokio::task::spawn_blocking(move || {
        let mut forward = |done: usize, total: usize| {
            let _ = tx.send((done, total));
        };
        extract_archive(&archive, &dest, &mut forward)
    });

    while let Some((done, total)) = rx.recv().await {
        on_entry(done, total);
    }

    handle
        .await
        .map_err(|e| AppError::io(format!("Extraction task failed: {e}")))?
}

async fn remove_dir_logged(dir: &Path) {
    if !dir.exists() {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        log::warn!("Failed to remove {:?}: {}", dir, e);
    }
}

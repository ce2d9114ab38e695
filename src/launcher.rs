//! The launcher facade handed to the presentation layer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::broadcast;

use crate::config::{ConfigStore, ServiceSettings, ServiceSettingsPatch};
use crate::deps::{BatchInstallResult, DependencyCheckResult, DependencyProgress, DependencyResolver};
use crate::error::{AppError, Result};
use crate::paths::{default_data_dir, DataLayout};
use crate::process::{ProcessEvent, ProcessInfo, ProcessSupervisor};
use crate::source::{
    AvailableVersion, PackageSourceConfig, SourceKind, SourceStore,
    ValidationResult,
};
use crate::version::{InstallCallback, InstalledVersion, SwitchOutcome, VersionEvent, VersionManager};

const USER_AGENT: &str = "hagicode-launcher";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Launcher {
    layout: DataLayout,
    config: Arc<ConfigStore>,
    sources: SourceStore,
    versions: VersionManager,
    supervisor: ProcessSupervisor,
}

impl Launcher {
    /// Open (or initialize) the launcher rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let layout = DataLayout::new(root);
        layout.ensure_dirs()?;
        let config = Arc::new(ConfigStore::open(layout.config_path())?);

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        let sources = SourceStore::new(Arc::clone(&config), client);
        let versions = VersionManager::new(
            layout.clone(),
            Arc::clone(&config),
            sources.clone(),
            DependencyResolver::new(),
        );
        let supervisor = ProcessSupervisor::new(layout.clone(), config.load().service.clone())?;

        let launcher = Self {
            layout,
            config,
            sources,
            versions,
            supervisor,
        };
        launcher.sync_supervisor();
        log::info!("Launcher opened at {:?}", launcher.layout.root());
        Ok(launcher)
    }

    /// Open the launcher at `~/.hagicode_launcher`.
    pub fn open_default() -> Result<Self> {
        Self::open(default_data_dir()?)
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Point the supervisor at the active version's entry point.
    /// A running service keeps running until it is restarted.
    fn sync_supervisor(&self) {
        let active = self.config.load().active_version.clone();
        let entry_point = active.as_deref().and_then(|id| {
            match self.versions.resolve_entry_point(id) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Active version {} has no usable entry point: {}", id, e);
                    None
                }
            }
        });
        self.supervisor.set_active_version(active);
        self.supervisor.set_entry_point(entry_point);
    }

    // === Versions ===

    /// Versions offered by the active source; empty when the source fails.
    pub async fn list_available_versions(&self) -> Vec<AvailableVersion> {
        match self.try_list_available_versions().await {
            Ok(versions) => versions,
            Err(e) => {
                log::warn!("Failed to list available versions: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn try_list_available_versions(&self) -> Result<Vec<AvailableVersion>> {
        self.versions.list_available().await
    }

    pub fn list_installed_versions(&self) -> Vec<InstalledVersion> {
        self.versions.list()
    }

    pub fn active_version(&self) -> Option<InstalledVersion> {
        self.versions.active()
    }

    pub async fn install_version(
        &self,
        id: &str,
        on_progress: InstallCallback<'_>,
    ) -> Result<InstalledVersion> {
        let installed = self.versions.install(id, on_progress).await?;
        if installed.is_active {
            self.sync_supervisor();
        }
        Ok(installed)
    }

    /// Refuse to touch the files of the version the service runs from.
    fn ensure_not_running(&self, id: &str) -> Result<()> {
        let status = self.supervisor.get_status();
        if status.status.is_active() && status.version_id.as_deref() == Some(id) {
            return Err(AppError::version_running(id));
        }
        Ok(())
    }

    pub async fn uninstall_version(&self, id: &str) -> Result<()> {
        self.ensure_not_running(id)?;
        self.versions.uninstall(id).await
    }

    pub fn switch_version(&self, id: &str) -> Result<SwitchOutcome> {
        let outcome = self.versions.switch_version(id)?;
        self.sync_supervisor();
        Ok(outcome)
    }

    pub async fn reinstall_version(
        &self,
        id: &str,
        on_progress: InstallCallback<'_>,
    ) -> Result<InstalledVersion> {
        self.ensure_not_running(id)?;
        let result = self.versions.reinstall_version(id, on_progress).await;
        // The entry point may have changed, or the old install was restored.
        self.sync_supervisor();
        result
    }

    pub async fn check_dependencies(&self, id: &str) -> Result<InstalledVersion> {
        self.versions.check_version_dependencies(id).await
    }

    pub fn dependency_list(&self, id: &str) -> Result<Vec<DependencyCheckResult>> {
        self.versions.get_dependency_list_from_manifest(id)
    }

    pub async fn install_dependencies(
        &self,
        id: &str,
        on_progress: &(dyn Fn(DependencyProgress) + Send + Sync),
    ) -> Result<BatchInstallResult> {
        self.versions.install_version_dependencies(id, on_progress).await
    }

    // === Package sources ===

    pub fn list_sources(&self) -> Vec<PackageSourceConfig> {
        self.sources.list()
    }

    pub fn active_source(&self) -> Option<PackageSourceConfig> {
        self.sources.active()
    }

    pub fn add_source(&self, name: &str, kind: SourceKind) -> Result<PackageSourceConfig> {
        self.sources.add(name, kind)
    }

    pub fn set_active_source(&self, id: &str) -> Result<PackageSourceConfig> {
        self.sources.activate(id)
    }

    pub fn remove_source(&self, id: &str) -> Result<()> {
        self.sources.remove(id)
    }

    /// Validate a source config without saving it.
    pub fn validate_source(&self, config: &PackageSourceConfig) -> ValidationResult {
        match self.sources.validate(config) {
            Ok(()) => ValidationResult::ok(),
            Err(e) => ValidationResult::invalid(e.detail().unwrap_or("Invalid source config")),
        }
    }

    // === Service ===

    pub async fn start_service(&self) -> Result<ProcessInfo> {
        self.supervisor.start().await
    }

    pub async fn stop_service(&self) -> Result<ProcessInfo> {
        self.supervisor.stop().await
    }

    pub async fn restart_service(&self) -> Result<ProcessInfo> {
        self.sync_supervisor();
        self.supervisor.restart().await
    }

    pub fn service_status(&self) -> ProcessInfo {
        self.supervisor.get_status()
    }

    pub fn check_port_available(&self) -> bool {
        self.supervisor.check_port_available()
    }

    /// Persist a settings patch; the supervisor uses it from the next start.
    pub fn update_service_settings(&self, patch: ServiceSettingsPatch) -> Result<ServiceSettings> {
        let for_config = patch.clone();
        let settings = self.config.update(move |config| {
            config.service.apply(for_config);
            Ok(config.service.clone())
        })?;
        self.supervisor.update_config(patch);
        Ok(settings)
    }

    pub fn subscribe_versions(&self) -> broadcast::Receiver<VersionEvent> {
        self.versions.subscribe()
    }

    pub fn subscribe_process(&self) -> broadcast::Receiver<ProcessEvent> {
        self.supervisor.subscribe()
    }

    /// Stop the service if it runs. Call before exiting.
    pub async fn shutdown(&self) {
        self.supervisor.cleanup().await;
    }
}

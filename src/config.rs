use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::source::PackageSourceConfig;
use crate::version::InstalledVersion;

/// Persisted launcher state: installed-version registry, active pointers and settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Active version pointer. The only source of truth for which version is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_source_id: Option<String>,
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub installed_versions: BTreeMap<String, InstalledVersion>,
    #[serde(default)]
    pub package_sources: Vec<PackageSourceConfig>,
}

impl AppConfig {
    pub fn active_source(&self) -> Option<&PackageSourceConfig> {
        let id = self.active_source_id.as_deref()?;
        self.package_sources.iter().find(|s| s.id == id)
    }

    /// Look up an installed version with `is_active` projected from the pointer.
    pub fn installed_version(&self, id: &str) -> Option<InstalledVersion> {
        self.installed_versions
            .get(id)
            .map(|v| self.with_active_flag(v.clone()))
    }

    /// All installed versions with `is_active` projected from the pointer.
    pub fn installed_list(&self) -> Vec<InstalledVersion> {
        self.installed_versions
            .values()
            .cloned()
            .map(|v| self.with_active_flag(v))
            .collect()
    }

    fn with_active_flag(&self, mut version: InstalledVersion) -> InstalledVersion {
        version.is_active = self.active_version.as_deref() == Some(version.id.as_str());
        version
    }
}

/// Settings for the supervised service process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_host")]
    pub host: String,
    /// Fixed port; a free port is picked at start when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// HTTP path probed during the health check phase, e.g. `/api/health`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    120
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            startup_timeout_secs: default_startup_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            health_check_path: None,
        }
    }
}

/// Partial update for [`ServiceSettings`]; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSettingsPatch {
    pub host: Option<String>,
    pub port: Option<Option<u16>>,
    pub startup_timeout_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
    pub health_check_path: Option<Option<String>>,
}

impl ServiceSettings {
    pub fn apply(&mut self, patch: ServiceSettingsPatch) {
        if let Some(host) = patch.host {
            self.host = host;
        }
        if let Some(port) = patch.port {
            self.port = port;
        }
        if let Some(secs) = patch.startup_timeout_secs {
            self.startup_timeout_secs = secs;
        }
        if let Some(secs) = patch.shutdown_timeout_secs {
            self.shutdown_timeout_secs = secs;
        }
        if let Some(path) = patch.health_check_path {
            self.health_check_path = path;
        }
    }
}

/// Cached, lock-guarded access to `config.toml`.
pub struct ConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    cache: RwLock<Arc<AppConfig>>,
}

impl ConfigStore {
    /// Load the config at `path`, writing a default one if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = load_config_from_disk(&path)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(config)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current config snapshot.
    pub fn load(&self) -> Arc<AppConfig> {
        let config = self.cache.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&config)
    }

    /// Execute a read-modify-write operation on the config file while holding a lock.
    /// Nothing is written when `f` fails.
    pub fn update<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut AppConfig) -> Result<T>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut updated = (*self.load()).clone();
        let result = f(&mut updated)?;
        save_config_to_disk(&self.path, &updated)?;

        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(updated);

        Ok(result)
    }
}

fn load_config_from_disk(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        let config = AppConfig::default();
        save_config_to_disk(path, &config)?;
        return Ok(config);
    }
    let content = fs::read_to_string(path).map_err(|e| AppError::config(e.to_string()))?;
    let config: AppConfig = toml::from_str(&content)?;

    if let Some(active) = config.active_version.as_deref() {
        if !config.installed_versions.contains_key(active) {
            log::warn!("Active version {} is not in the registry", active);
        }
    }

    Ok(config)
}

fn save_config_to_disk(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::config(e.to_string()))?;
    }
    let content = toml::to_string_pretty(config)?;
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, content).map_err(|e| AppError::config(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| AppError::config(e.to_string()))
}

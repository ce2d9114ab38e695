//! Package source configuration management on top of the config store.

use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;

use super::{PackageSource, PackageSourceConfig, SourceKind};
use crate::config::ConfigStore;
use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct SourceStore {
    config: Arc<ConfigStore>,
    client: Client,
}

impl SourceStore {
    pub fn new(config: Arc<ConfigStore>, client: Client) -> Self {
        Self { config, client }
    }

    pub fn list(&self) -> Vec<PackageSourceConfig> {
        self.config.load().package_sources.clone()
    }

    pub fn active(&self) -> Option<PackageSourceConfig> {
        self.config.load().active_source().cloned()
    }

    /// Build the active source, failing with `no_active_source` when none is set.
    pub fn active_source(&self) -> Result<PackageSource> {
        let config = self.active().ok_or_else(AppError::no_active_source)?;
        config.check_fields()?;
        Ok(PackageSource::from_config(&config, &self.client))
    }

    /// Validate `config` structurally and against its origin.
    pub fn validate(&self, config: &PackageSourceConfig) -> Result<()> {
        config.check_fields()?;
        let result = PackageSource::from_config(config, &self.client).validate_config();
        if !result.valid {
            return Err(AppError::invalid_source_config(
                result.error.unwrap_or_else(|| "Source validation failed".to_string()),
            ));
        }
        Ok(())
    }

    /// Register a new source. The first source added becomes active.
    pub fn add(&self, name: &str, kind: SourceKind) -> Result<PackageSourceConfig> {
        let source = PackageSourceConfig::new(name, kind);
        self.validate(&source)?;

        let added = source.clone();
        self.config.update(move |config| {
            if config.active_source_id.is_none() {
                config.active_source_id = Some(source.id.clone());
            }
            config.package_sources.push(source);
            Ok(())
        })?;

        log::info!(
            "Added {} package source {} ({})",
            added.kind.type_name(),
            added.name,
            added.id
        );
        Ok(added)
    }

    /// Remove a source. The active source cannot be removed.
    pub fn remove(&self, id: &str) -> Result<()> {
        self.config.update(|config| {
            if config.active_source_id.as_deref() == Some(id) {
                return Err(AppError::invalid_source_config(
                    "Cannot remove the active package source",
                )
                .with_context("id", id));
            }
            let before = config.package_sources.len();
            config.package_sources.retain(|s| s.id != id);
            if config.package_sources.len() == before {
                return Err(AppError::invalid_source_config("Unknown package source")
                    .with_context("id", id));
            }
            Ok(())
        })
    }

    /// Make `id` the active source after validating it.
    pub fn activate(&self, id: &str) -> Result<PackageSourceConfig> {
        let candidate = self
            .list()
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| {
                AppError::invalid_source_config("Unknown package source").with_context("id", id)
            })?;
        self.validate(&candidate)?;

        let activated = self.config.update(|config| {
            let source = config
                .package_sources
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| {
                    AppError::invalid_source_config("Unknown package source")
                        .with_context("id", id)
                })?;
            source.last_used_at = Some(Utc::now());
            let activated = source.clone();
            config.active_source_id = Some(activated.id.clone());
            Ok(activated)
        })?;

        log::info!("Active package source is now {}", activated.name);
        Ok(activated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn store(tmp: &tempfile::TempDir) -> SourceStore {
        let config = Arc::new(ConfigStore::open(tmp.path().join("config.toml")).unwrap());
        SourceStore::new(config, Client::new())
    }

    fn local(tmp: &tempfile::TempDir) -> SourceKind {
        SourceKind::LocalFolder {
            path: tmp.path().display().to_string(),
        }
    }

    #[test]
    fn first_source_becomes_active() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store(&tmp);
        let first = store.add("Local", local(&tmp)).unwrap();
        let second = store.add("Other", local(&tmp)).unwrap();

        assert_eq!(store.list().len(), 2);
        assert_eq!(store.active().map(|s| s.id), Some(first.id));
        assert_ne!(second.id, store.active().unwrap().id);
    }

    #[test]
    fn add_rejects_missing_folder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store(&tmp);
        let err = store
            .add(
                "Broken",
                SourceKind::LocalFolder {
                    path: tmp.path().join("nope").display().to_string(),
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSourceConfig);
        assert!(store.list().is_empty());
    }

    #[test]
    fn activate_touches_last_used_and_blocks_removal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store(&tmp);
        let first = store.add("Local", local(&tmp)).unwrap();
        let second = store.add("Other", local(&tmp)).unwrap();

        let activated = store.activate(&second.id).unwrap();
        assert!(activated.last_used_at.is_some());
        assert_eq!(store.active().map(|s| s.id), Some(second.id.clone()));

        assert!(store.remove(&second.id).is_err());
        store.remove(&first.id).unwrap();
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn no_active_source_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = store(&tmp).active_source().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoActiveSource);
    }
}

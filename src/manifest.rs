//! Release manifest (`manifest.json`) shipped inside every release archive.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::deps::DependencySpec;
use crate::error::{AppError, Result};
use crate::paths::MANIFEST_FILE_NAME;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub entry_point: Option<EntryPoint>,
}

/// How to launch (and optionally provision) the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Install script run for dependencies lacking their own install command.
    #[serde(default)]
    pub install: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

/// An entry point bound to a concrete install directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEntryPoint {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl ReleaseManifest {
    /// Read `manifest.json` from an install directory.
    pub fn load(install_dir: &Path) -> Result<Self> {
        let path = install_dir.join(MANIFEST_FILE_NAME);
        if !path.is_file() {
            return Err(AppError::manifest_missing(&path.display().to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(content.trim_start_matches('\u{feff}'))
            .map_err(|e| AppError::manifest_invalid(e.to_string()))?;

        let mut keys = std::collections::HashSet::new();
        for dep in &manifest.dependencies {
            if !keys.insert(dep.key.as_str()) {
                return Err(AppError::manifest_invalid(format!(
                    "duplicate dependency key: {}",
                    dep.key
                )));
            }
        }
        Ok(manifest)
    }

    /// File names that must be executable after extraction.
    pub fn executable_names(&self) -> Vec<String> {
        let Some(entry) = &self.entry_point else {
            return Vec::new();
        };
        [Some(entry.command.as_str()), entry.install.as_deref()]
            .into_iter()
            .flatten()
            .filter_map(|cmd| cmd.split_whitespace().next())
            .filter_map(|cmd| Path::new(cmd).file_name())
            .filter_map(|name| name.to_str())
            .map(str::to_string)
            .collect()
    }
}

impl EntryPoint {
    /// Bind to `install_dir`: relative commands that exist inside it become absolute,
    /// anything else is left for `PATH` lookup.
    pub fn resolve(&self, install_dir: &Path) -> ResolvedEntryPoint {
        let working_dir = match self.working_directory.as_deref() {
            Some(dir) if !dir.is_empty() && !Path::new(dir).is_absolute() => install_dir.join(dir),
            _ => install_dir.to_path_buf(),
        };

        let command = Path::new(&self.command);
        let in_dir = install_dir.join(command);
        let program = if !command.is_absolute() && in_dir.is_file() {
            in_dir
        } else {
            command.to_path_buf()
        };

        ResolvedEntryPoint {
            program,
            args: self.args.clone(),
            working_dir,
        }
    }
}

impl ResolvedEntryPoint {
    /// Args with `{host}` and `{port}` substituted.
    pub fn render_args(&self, host: &str, port: u16) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{host}", host)
                    .replace("{port}", &port.to_string())
            })
            .collect()
    }
}

//! Version lifecycle type definitions.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deps::DependencyCheckResult;
use crate::platform::Platform;

/// Readiness of an installed version, derived from its dependency checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Ready,
    Incomplete,
}

impl VersionStatus {
    /// `Ready` iff every dependency is installed at an acceptable version.
    pub fn from_checks(checks: &[DependencyCheckResult]) -> Self {
        if checks.iter().all(DependencyCheckResult::is_satisfied) {
            Self::Ready
        } else {
            Self::Incomplete
        }
    }
}

/// A registry entry for a version extracted under `apps/installed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledVersion {
    pub id: String,
    pub version: String,
    pub platform: Platform,
    pub artifact_filename: String,
    pub install_path: PathBuf,
    pub installed_at: DateTime<Utc>,
    pub status: VersionStatus,
    /// Projection of the active pointer; never read back from disk.
    #[serde(skip_deserializing, default)]
    pub is_active: bool,
    #[serde(default)]
    pub dependencies: Vec<DependencyCheckResult>,
}

impl InstalledVersion {
    /// Dependencies that are missing or at the wrong version.
    pub fn unsatisfied_dependencies(&self) -> Vec<&DependencyCheckResult> {
        self.dependencies
            .iter()
            .filter(|d| !d.is_satisfied())
            .collect()
    }

    pub(crate) fn set_dependencies(&mut self, checks: Vec<DependencyCheckResult>) {
        self.status = VersionStatus::from_checks(&checks);
        self.dependencies = checks;
    }
}

/// Result of moving the active pointer.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchOutcome {
    pub version: InstalledVersion,
    /// Set when the new active version is incomplete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<SwitchWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchWarning {
    pub missing: Vec<String>,
    pub mismatched: Vec<String>,
    pub message: String,
}

impl SwitchWarning {
    pub(crate) fn for_version(version: &InstalledVersion) -> Option<Self> {
        let unsatisfied = version.unsatisfied_dependencies();
        if unsatisfied.is_empty() {
            return None;
        }
        let (mismatched, missing): (Vec<_>, Vec<_>) =
            unsatisfied.into_iter().partition(|d| d.installed);
        let missing: Vec<String> = missing.into_iter().map(|d| d.key.clone()).collect();
        let mismatched: Vec<String> = mismatched.into_iter().map(|d| d.key.clone()).collect();

        let mut parts = Vec::new();
        if !missing.is_empty() {
            parts.push(format!("missing: {}", missing.join(", ")));
        }
        if !mismatched.is_empty() {
            parts.push(format!("version mismatch: {}", mismatched.join(", ")));
        }
        Some(Self {
            message: format!("{} has unmet dependencies ({})", version.id, parts.join("; ")),
            missing,
            mismatched,
        })
    }
}

/// Stage of an install, with the percentage band it reports in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStage {
    Downloading,
    Extracting,
    CheckingDependencies,
    Done,
}

impl InstallStage {
    /// `(start, end)` percentage band.
    pub fn band(self) -> (u8, u8) {
        match self {
            Self::Downloading => (0, 70),
            Self::Extracting => (70, 85),
            Self::CheckingDependencies => (85, 99),
            Self::Done => (100, 100),
        }
    }

    /// Map a 0.0..=1.0 fraction of this stage onto the overall percentage.
    pub fn percent(self, fraction: f64) -> u8 {
        let (start, end) = self.band();
        let fraction = fraction.clamp(0.0, 1.0);
        start + ((f64::from(end - start)) * fraction).round() as u8
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallProgress {
    pub version_id: String,
    pub stage: InstallStage,
    pub progress: u8,
    pub message: String,
}

/// Mutating operation currently holding a version id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOperation {
    Installing,
    Uninstalling,
    Reinstalling,
    InstallingDependencies,
}

impl VersionOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Uninstalling => "uninstalling",
            Self::Reinstalling => "reinstalling",
            Self::InstallingDependencies => "installing_dependencies",
        }
    }
}

impl fmt::Display for VersionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast notification about registry changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VersionEvent {
    Installed { version: InstalledVersion },
    Uninstalled { id: String },
    ActiveChanged { id: Option<String> },
    DependenciesUpdated { id: String, status: VersionStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::DependencyType;

    fn check(key: &str, installed: bool, mismatch: bool) -> DependencyCheckResult {
        DependencyCheckResult {
            key: key.to_string(),
            name: key.to_string(),
            dep_type: DependencyType::Runtime,
            installed,
            version: None,
            required_version: None,
            version_mismatch: mismatch,
            is_checking: false,
        }
    }

    #[test]
    fn status_requires_all_satisfied() {
        assert_eq!(VersionStatus::from_checks(&[]), VersionStatus::Ready);
        assert_eq!(
            VersionStatus::from_checks(&[check("a", true, false)]),
            VersionStatus::Ready
        );
        assert_eq!(
            VersionStatus::from_checks(&[check("a", true, false), check("b", true, true)]),
            VersionStatus::Incomplete
        );
        assert_eq!(
            VersionStatus::from_checks(&[check("a", false, false)]),
            VersionStatus::Incomplete
        );
    }

    #[test]
    fn stage_percent_bands() {
        assert_eq!(InstallStage::Downloading.percent(0.5), 35);
        assert_eq!(InstallStage::Extracting.percent(0.0), 70);
        assert_eq!(InstallStage::Extracting.percent(1.0), 85);
        assert_eq!(InstallStage::CheckingDependencies.percent(2.0), 99);
        assert_eq!(InstallStage::Done.percent(0.0), 100);
    }

    #[test]
    fn warning_lists_exactly_unsatisfied() {
        let version = InstalledVersion {
            id: "hagicode-1.2.0-linux".to_string(),
            version: "1.2.0".to_string(),
            platform: Platform::Linux,
            artifact_filename: "hagicode-1.2.0-linux.zip".to_string(),
            install_path: PathBuf::from("/tmp/x"),
            installed_at: Utc::now(),
            status: VersionStatus::Incomplete,
            dependencies: vec![
                check("dotnet", false, false),
                check("node", true, true),
                check("git", true, false),
            ],
            is_active: false,
        };
        let warning = SwitchWarning::for_version(&version).unwrap();
        assert_eq!(warning.missing, vec!["dotnet".to_string()]);
        assert_eq!(warning.mismatched, vec!["node".to_string()]);
    }
}

//! Dependency-related type definitions.

use serde::{Deserialize, Serialize};

/// Category of a declared dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    Runtime,
    SystemRequirement,
    Npm,
    Pip,
    Dotnet,
    #[serde(other)]
    Other,
}

/// Version requirement on a dependency. `exact` wins when both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
}

impl VersionConstraints {
    /// The version string a check result should report as required.
    pub fn required_version(&self) -> Option<String> {
        self.exact
            .clone()
            .or_else(|| self.min.as_ref().map(|min| format!(">={min}")))
    }
}

/// A runtime prerequisite declared by a release manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
    pub check_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_constraints: Option<VersionConstraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Outcome of running a dependency's check command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCheckResult {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub dep_type: DependencyType,
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_version: Option<String>,
    pub version_mismatch: bool,
    #[serde(default)]
    pub is_checking: bool,
}

impl DependencyCheckResult {
    /// Placeholder shown before the real check has run.
    pub fn pending(spec: &DependencySpec) -> Self {
        Self {
            key: spec.key.clone(),
            name: spec.name.clone(),
            dep_type: spec.dep_type,
            installed: false,
            version: None,
            required_version: spec
                .version_constraints
                .as_ref()
                .and_then(VersionConstraints::required_version),
            version_mismatch: false,
            is_checking: true,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.installed && !self.version_mismatch
    }
}

/// Where and how dependency commands run.
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    /// Working directory, normally the version's install directory.
    pub working_dir: Option<std::path::PathBuf>,
    /// Per-command timeout; unlimited when `None`.
    pub timeout: Option<std::time::Duration>,
}

/// Structured classification of an install command's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Success,
    PartialFailure,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedInstallResult {
    pub status: InstallStatus,
    pub exit_code: Option<i32>,
    pub errors: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub success: bool,
    pub parsed: ParsedInstallResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDependency {
    pub dependency: String,
    pub error: String,
}

/// Partition of a best-effort batch install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInstallResult {
    pub success: Vec<String>,
    pub failed: Vec<FailedDependency>,
}

impl BatchInstallResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Progress event for batch dependency installation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum DependencyProgress {
    Checking { key: String, index: usize, total: usize },
    Skipped { key: String, index: usize, total: usize },
    Installing { key: String, index: usize, total: usize },
    Output { key: String, line: String },
    Finished { key: String, index: usize, total: usize, success: bool },
}

/// Progress event for [`execute_commands_with_progress`](super::execute_commands_with_progress).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandProgress {
    Started { index: usize, total: usize, command: String },
    Output { index: usize, line: String, is_stderr: bool },
    Finished { index: usize, total: usize, exit_code: Option<i32> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandBatchResult {
    pub success: bool,
    /// Number of commands that ran to a successful exit.
    pub completed: usize,
    pub failed_command: Option<String>,
    pub exit_code: Option<i32>,
    pub output: Vec<String>,
}

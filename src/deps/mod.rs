//! Dependency resolution for release manifests.
//!
//! Checks run each spec's `checkCommand` through the host shell inside the
//! install directory. Installs are best-effort per dependency: a failed
//! dependency never aborts the rest of a batch.

mod check;
mod install;
mod shell;
mod types;

use std::time::Duration;

use futures_util::future::join_all;

use crate::error::{AppError, Result};
use crate::manifest::{EntryPoint, ReleaseManifest};

use check::check_dependency;
use install::parse_install_output;
use shell::run_shell;

pub use install::execute_commands_with_progress;
pub(crate) use check::parse_lenient as parse_lenient_version;
pub use types::{
    BatchInstallResult, CheckContext, CommandBatchResult, CommandProgress, DependencyCheckResult,
    DependencyProgress, DependencySpec, DependencyType, FailedDependency, InstallOutcome,
    InstallStatus, ParsedInstallResult, VersionConstraints,
};

/// Timeout applied to check commands when the context does not set one.
const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout applied to install commands.
const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct DependencyResolver {
    check_timeout: Duration,
    install_timeout: Duration,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self {
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
        }
    }

    pub fn with_timeouts(check_timeout: Duration, install_timeout: Duration) -> Self {
        Self {
            check_timeout,
            install_timeout,
        }
    }

    fn check_context(&self, context: Option<&CheckContext>) -> CheckContext {
        let mut ctx = context.cloned().unwrap_or_default();
        ctx.timeout.get_or_insert(self.check_timeout);
        ctx
    }

    /// Run every spec's check concurrently; results keep the order of `specs`.
    pub async fn check_from_manifest(
        &self,
        specs: &[DependencySpec],
        context: Option<&CheckContext>,
    ) -> Vec<DependencyCheckResult> {
        let ctx = self.check_context(context);
        join_all(specs.iter().map(|spec| check_dependency(spec, &ctx))).await
    }

    /// Install one dependency and re-check it.
    ///
    /// Uses the spec's `installCommand`, falling back to the entry point's
    /// install script invoked with the dependency key.
    pub async fn install_single_dependency(
        &self,
        spec: &DependencySpec,
        entry_point: Option<&EntryPoint>,
        context: Option<&CheckContext>,
        on_line: &(dyn Fn(&str, bool) + Send + Sync),
    ) -> Result<InstallOutcome> {
        let command = match (&spec.install_command, entry_point.and_then(|e| e.install.as_ref())) {
            (Some(cmd), _) => cmd.clone(),
            (None, Some(script)) => format!("{} {}", script, spec.key),
            (None, None) => {
                return Err(AppError::dependency(format!(
                    "No install command declared for {}",
                    spec.key
                )))
            }
        };

        let ctx = self.check_context(context);
        log::info!("Installing dependency {} via `{}`", spec.key, command);
        let output = run_shell(
            &command,
            ctx.working_dir.as_deref(),
            Some(self.install_timeout),
            on_line,
        )
        .await?;

        let mut parsed = parse_install_output(&output);
        if parsed.status != InstallStatus::Success {
            log::warn!(
                "Dependency {} install reported {:?}: {}",
                spec.key,
                parsed.status,
                parsed.summary
            );
            return Ok(InstallOutcome {
                success: false,
                parsed,
            });
        }

        let verified = check_dependency(spec, &ctx).await;
        if !verified.is_satisfied() {
            let reason = if verified.installed {
                format!(
                    "{} is installed but version {:?} does not satisfy {:?}",
                    spec.key, verified.version, verified.required_version
                )
            } else {
                format!("{} check still fails after install", spec.key)
            };
            parsed.status = InstallStatus::PartialFailure;
            parsed.errors.push(reason);
            return Ok(InstallOutcome {
                success: false,
                parsed,
            });
        }

        Ok(InstallOutcome {
            success: true,
            parsed,
        })
    }

    /// Best-effort install of every unsatisfied spec.
    ///
    /// The manifest supplies the entry point install script fallback.
    pub async fn install_from_manifest(
        &self,
        manifest: &ReleaseManifest,
        specs: &[DependencySpec],
        context: Option<&CheckContext>,
        on_progress: &(dyn Fn(DependencyProgress) + Send + Sync),
    ) -> BatchInstallResult {
        let ctx = self.check_context(context);
        let total = specs.len();
        let mut result = BatchInstallResult::default();

        for (index, spec) in specs.iter().enumerate() {
            let key = spec.key.clone();
            on_progress(DependencyProgress::Checking {
                key: key.clone(),
                index,
                total,
            });

            if check_dependency(spec, &ctx).await.is_satisfied() {
                on_progress(DependencyProgress::Skipped {
                    key: key.clone(),
                    index,
                    total,
                });
                result.success.push(key);
                continue;
            }

            on_progress(DependencyProgress::Installing {
                key: key.clone(),
                index,
                total,
            });

            let sink = |line: &str, _is_stderr: bool| {
                on_progress(DependencyProgress::Output {
                    key: spec.key.clone(),
                    line: line.to_string(),
                });
            };
            let outcome = self
                .install_single_dependency(spec, manifest.entry_point.as_ref(), Some(&ctx), &sink)
                .await;

            let success = match outcome {
                Ok(outcome) if outcome.success => {
                    result.success.push(key.clone());
                    true
                }
                Ok(outcome) => {
                    let error = outcome
                        .parsed
                        .errors
                        .last()
                        .cloned()
                        .unwrap_or(outcome.parsed.summary);
                    result.failed.push(FailedDependency {
                        dependency: key.clone(),
                        error,
                    });
                    false
                }
                Err(e) => {
                    result.failed.push(FailedDependency {
                        dependency: key.clone(),
                        error: e.to_string(),
                    });
                    false
                }
            };

            on_progress(DependencyProgress::Finished {
                key,
                index,
                total,
                success,
            });
        }

        if !result.failed.is_empty() {
            log::warn!(
                "Dependency install finished with {} failure(s): {:?}",
                result.failed.len(),
                result
                    .failed
                    .iter()
                    .map(|f| f.dependency.as_str())
                    .collect::<Vec<_>>()
            );
        }

        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec(key: &str, check: &str, install: Option<&str>) -> DependencySpec {
        DependencySpec {
            key: key.to_string(),
            name: key.to_uppercase(),
            dep_type: DependencyType::Runtime,
            check_command: check.to_string(),
            version_constraints: None,
            install_command: install.map(str::to_string),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn check_keeps_spec_order() {
        let resolver = DependencyResolver::new();
        let specs = vec![spec("a", "exit 1", None), spec("b", "echo 1.0.0", None)];
        let results = resolver.check_from_manifest(&specs, None).await;
        assert_eq!(results[0].key, "a");
        assert!(!results[0].installed);
        assert_eq!(results[1].key, "b");
        assert!(results[1].installed);
    }

    #[tokio::test]
    async fn batch_install_is_best_effort() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = CheckContext {
            working_dir: Some(tmp.path().to_path_buf()),
            timeout: None,
        };
        let specs = vec![
            spec("present", "true", None),
            spec("fixable", "test -f fixable.ok", Some("touch fixable.ok")),
            spec("broken", "test -f broken.ok", Some("echo 'ERROR: mirror unreachable'")),
            spec("no-installer", "exit 1", None),
        ];
        let events = std::sync::Mutex::new(Vec::new());
        let result = DependencyResolver::new()
            .install_from_manifest(&ReleaseManifest::default(), &specs, Some(&ctx), &|p| {
                events.lock().unwrap().push(p);
            })
            .await;

        assert_eq!(result.success, vec!["present".to_string(), "fixable".to_string()]);
        let failed: Vec<&str> = result.failed.iter().map(|f| f.dependency.as_str()).collect();
        assert_eq!(failed, vec!["broken", "no-installer"]);
        assert!(!result.is_complete());
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, DependencyProgress::Skipped { key, .. } if key == "present")));
    }

    #[tokio::test]
    async fn falls_back_to_entry_point_install_script() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = CheckContext {
            working_dir: Some(tmp.path().to_path_buf()),
            timeout: None,
        };
        let entry = EntryPoint {
            command: "./hagicode".to_string(),
            args: Vec::new(),
            install: Some("touch".to_string()),
            working_directory: None,
        };
        let dep = spec("runtime.ok", "test -f runtime.ok", None);
        let outcome = DependencyResolver::new()
            .install_single_dependency(&dep, Some(&entry), Some(&ctx), &|_, _| {})
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(tmp.path().join("runtime.ok").exists());
    }

    #[tokio::test]
    async fn install_that_does_not_fix_check_fails() {
        let dep = spec("stubborn", "exit 1", Some("echo installed"));
        let outcome = DependencyResolver::new()
            .install_single_dependency(&dep, None, None, &|_, _| {})
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.parsed.status, InstallStatus::PartialFailure);
    }
}

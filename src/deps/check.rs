//! Dependency checks: run the declared command and compare the detected version.

use std::sync::OnceLock;

use regex::Regex;
use semver::Version;

use super::shell::run_shell;
use super::types::{CheckContext, DependencyCheckResult, DependencySpec, VersionConstraints};

#[allow(clippy::expect_used)]
fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?(?:-([0-9A-Za-z][0-9A-Za-z.]*))?")
            .expect("version pattern is valid")
    })
}

/// Find the first dotted version number in command output.
pub(crate) fn extract_version(output: &str) -> Option<String> {
    version_pattern()
        .find(output)
        .map(|m| m.as_str().to_string())
}

/// Lenient semver parse: `v` prefix stripped, missing patch filled with zero.
pub(crate) fn parse_lenient(raw: &str) -> Option<Version> {
    let caps = version_pattern().captures(raw.trim().trim_start_matches('v'))?;
    let number = |i: usize| {
        caps.get(i)
            .map(|m| m.as_str().parse::<u64>())
            .transpose()
            .ok()
            .flatten()
    };
    let mut version = Version::new(number(1)?, number(2)?, number(3).unwrap_or(0));
    if let Some(pre) = caps.get(4) {
        version.pre = semver::Prerelease::new(pre.as_str()).ok()?;
    }
    Some(version)
}

/// Whether `detected` violates `constraints`. Unparseable versions never count as a mismatch.
pub(crate) fn is_version_mismatch(detected: &str, constraints: &VersionConstraints) -> bool {
    let Some(found) = parse_lenient(detected) else {
        return false;
    };

    if let Some(exact) = constraints.exact.as_deref() {
        return match parse_lenient(exact) {
            Some(required) => found != required,
            None => detected.trim() != exact.trim(),
        };
    }

    if let Some(min) = constraints.min.as_deref() {
        if let Some(required) = parse_lenient(min) {
            return found < required;
        }
    }

    false
}

/// Run one dependency's check command and interpret the result.
pub(crate) async fn check_dependency(
    spec: &DependencySpec,
    context: &CheckContext,
) -> DependencyCheckResult {
    let output = run_shell(
        &spec.check_command,
        context.working_dir.as_deref(),
        context.timeout,
        &|_, _| {},
    )
    .await;

    let required_version = spec
        .version_constraints
        .as_ref()
        .and_then(VersionConstraints::required_version);

    let (installed, version) = match output {
        Ok(output) if output.success => (true, extract_version(&output.combined())),
        Ok(output) => {
            log::debug!(
                "Dependency {} check exited with {:?}",
                spec.key,
                output.exit_code
            );
            (false, None)
        }
        Err(e) => {
            log::warn!("Dependency {} check could not run: {}", spec.key, e);
            (false, None)
        }
    };

    let version_mismatch = match (&version, &spec.version_constraints) {
        (Some(found), Some(constraints)) if installed => is_version_mismatch(found, constraints),
        (None, Some(_)) if installed => {
            log::warn!(
                "Dependency {} is installed but reported no version; constraint not verified",
                spec.key
            );
            false
        }
        _ => false,
    };

    DependencyCheckResult {
        key: spec.key.clone(),
        name: spec.name.clone(),
        dep_type: spec.dep_type,
        installed,
        version,
        required_version,
        version_mismatch,
        is_checking: false,
    }
}

//! Dependency installation and output classification.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use super::shell::{run_shell, CommandOutput};
use super::types::{
    CommandBatchResult, CommandProgress, InstallStatus, ParsedInstallResult,
};

const MAX_REPORTED_ERRORS: usize = 20;

/// Structured report an installer may print as its last JSON line.
#[derive(Debug, Deserialize)]
struct InstallerReport {
    success: bool,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    message: Option<String>,
}

#[allow(clippy::expect_used)]
fn error_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:\[?(?:error|fatal|failed)\]?[:\s]|npm ERR!|E: )")
            .expect("error line pattern is valid")
    })
}

fn find_report(lines: &[String]) -> Option<InstallerReport> {
    lines
        .iter()
        .rev()
        .map(|line| line.trim())
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .find_map(|line| serde_json::from_str::<InstallerReport>(line).ok())
}

fn last_meaningful_line(output: &CommandOutput) -> String {
    output
        .stdout
        .iter()
        .chain(output.stderr.iter())
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty() && !l.starts_with('{'))
        .unwrap_or_default()
        .to_string()
}

/// Classify installer output. Exit code 0 alone is not trusted: a JSON report
/// or error-looking lines can turn it into a partial failure.
pub(crate) fn parse_install_output(output: &CommandOutput) -> ParsedInstallResult {
    let exited_ok = output.success;

    let all_lines: Vec<String> = output
        .stdout
        .iter()
        .chain(output.stderr.iter())
        .cloned()
        .collect();

    if let Some(report) = find_report(&output.stdout) {
        let status = match (exited_ok, report.success) {
            (true, true) => InstallStatus::Success,
            (true, false) => InstallStatus::PartialFailure,
            (false, _) => InstallStatus::Failure,
        };
        return ParsedInstallResult {
            status,
            exit_code: output.exit_code,
            errors: report.errors,
            summary: report
                .message
                .unwrap_or_else(|| last_meaningful_line(output)),
        };
    }

    let errors: Vec<String> = all_lines
        .iter()
        .filter(|line| error_line_pattern().is_match(line))
        .take(MAX_REPORTED_ERRORS)
        .map(|line| line.trim().to_string())
        .collect();

    let status = if !exited_ok {
        InstallStatus::Failure
    } else if errors.is_empty() {
        InstallStatus::Success
    } else {
        InstallStatus::PartialFailure
    };

    ParsedInstallResult {
        status,
        exit_code: output.exit_code,
        errors,
        summary: last_meaningful_line(output),
    }
}

/// Run `commands` in order inside `workdir`, streaming output. Stops at the first failure.
pub async fn execute_commands_with_progress(
    commands: &[String],
    workdir: &Path,
    on_progress: &(dyn Fn(CommandProgress) + Send + Sync),
) -> CommandBatchResult {
    let total = commands.len();
    let mut collected = Vec::new();

    for (index, command) in commands.iter().enumerate() {
        on_progress(CommandProgress::Started {
            index,
            total,
            command: command.clone(),
        });

        let sink = |line: &str, is_stderr: bool| {
            on_progress(CommandProgress::Output {
                index,
                line: line.to_string(),
                is_stderr,
            });
        };

        let result = run_shell(command, Some(workdir), None, &sink).await;
        let (exit_code, ok) = match result {
            Ok(output) => {
                collected.extend(output.stdout.iter().cloned());
                collected.extend(output.stderr.iter().cloned());
                (output.exit_code, output.success)
            }
            Err(e) => {
                collected.push(e.to_string());
                (None, false)
            }
        };

        on_progress(CommandProgress::Finished {
            index,
            total,
            exit_code,
        });

        if !ok {
            log::warn!("Command `{}` failed with exit code {:?}", command, exit_code);
            return CommandBatchResult {
                success: false,
                completed: index,
                failed_command: Some(command.clone()),
                exit_code,
                output: collected,
            };
        }
    }

    CommandBatchResult {
        success: true,
        completed: total,
        failed_command: None,
        exit_code: Some(0),
        output: collected,
    }
}

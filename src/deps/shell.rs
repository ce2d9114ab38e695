//! Host shell command execution with line streaming.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;

use crate::error::{AppError, Result};

/// Captured result of a finished shell command.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    /// stdout followed by stderr, the order version banners usually appear in.
    pub fn combined(&self) -> String {
        let mut all = self.stdout.clone();
        all.extend(self.stderr.iter().cloned());
        all.join("\n")
    }
}

/// Line sink: `(line, is_stderr)`.
pub(crate) type LineSink<'a> = &'a (dyn Fn(&str, bool) + Send + Sync);

fn shell_command(command: &str) -> Command {
    #[cfg(target_os = "windows")]
    {
        use windows::Win32::System::Threading::CREATE_NO_WINDOW;

        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd.creation_flags(CREATE_NO_WINDOW.0);
        cmd
    }

    #[cfg(not(target_os = "windows"))]
    {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

/// Run `command` through the host shell, streaming each output line to `on_line`.
///
/// The child is killed if `timeout` elapses or the future is dropped.
pub(crate) async fn run_shell(
    command: &str,
    working_dir: Option<&Path>,
    timeout: Option<Duration>,
    on_line: LineSink<'_>,
) -> Result<CommandOutput> {
    let mut cmd = shell_command(command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::dependency(format!("Failed to run `{command}`: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::dependency("Failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::dependency("Failed to capture stderr"))?;

    let run = async {
        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                on_line(&line, false);
                collected.push(line);
            }
            collected
        };
        let read_stderr = async {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                on_line(&line, true);
                collected.push(line);
            }
            collected
        };
        let (stdout, stderr) = tokio::join!(read_stdout, read_stderr);
        let status = child
            .wait()
            .await
            .map_err(|e| AppError::dependency(format!("Failed to wait for `{command}`: {e}")))?;
        Ok::<_, AppError>(CommandOutput {
            exit_code: status.code(),
            success: status.success(),
            stdout,
            stderr,
        })
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
            AppError::dependency(format!(
                "`{command}` timed out after {}s",
                limit.as_secs()
            ))
        })?,
        None => run.await,
    }
}

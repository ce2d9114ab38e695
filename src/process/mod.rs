//! Service process supervision.

mod control;
mod health;
mod supervisor;

#[cfg(target_os = "windows")]
pub(crate) mod win_api;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use control::{check_port_available, find_available_port, force_kill, is_process_alive};
pub use supervisor::ProcessSupervisor;

/// Poll interval while waiting for the service to accept connections.
const LISTEN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Poll interval between health probes.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long to wait for a force-killed process to be reaped.
const FORCE_KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ProcessStatus {
    /// Whether a child may currently exist.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// Sub-state of [`ProcessStatus::Starting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPhase {
    CheckingPort,
    Spawning,
    WaitingListening,
    HealthCheck,
    Running,
}

/// Point-in-time view of the supervised service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub uptime_secs: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub restart_count: u32,
    pub phase: Option<StartupPhase>,
    pub port: Option<u16>,
    pub version_id: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcessEvent {
    StatusChanged { status: ProcessStatus },
    PhaseChanged { phase: StartupPhase },
    /// The chosen port already had a listener when startup began.
    PortBusy { port: u16 },
    Exited { code: Option<i32>, expected: bool },
}

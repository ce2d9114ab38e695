//! Supervisor for the single Hagicode service process.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::process::Stdio;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::io::{AsyncBufReadExt as _, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use super::control::{check_port_available, find_available_port, force_kill, graceful_signal};
use super::health::{check_health, is_listening, service_url};
use super::{
    ProcessEvent, ProcessInfo, ProcessStatus, StartupPhase, EVENT_CAPACITY,
    FORCE_KILL_REAP_TIMEOUT, HEALTH_POLL_INTERVAL, LISTEN_POLL_INTERVAL,
};
use crate::config::{ServiceSettings, ServiceSettingsPatch};
use crate::error::{AppError, ErrorKind, Result};
use crate::manifest::ResolvedEntryPoint;
use crate::paths::DataLayout;

const SERVICE_LOG_FILE: &str = "service.log";

#[derive(Debug, Clone)]
struct ExitRecord {
    code: Option<i32>,
    detail: String,
}

type ExitWatch = watch::Receiver<Option<ExitRecord>>;

/// What the supervisor launches.
#[derive(Debug, Clone)]
struct Inputs {
    version_id: Option<String>,
    entry_point: Option<ResolvedEntryPoint>,
    settings: ServiceSettings,
}

#[derive(Debug)]
struct RunState {
    status: ProcessStatus,
    phase: Option<StartupPhase>,
    pid: Option<u32>,
    port: Option<u16>,
    url: Option<String>,
    start_time: Option<DateTime<Utc>>,
    started_at: Option<Instant>,
    restart_count: u32,
    version_id: Option<String>,
    last_error: Option<String>,
    /// Bumped on every start so stale exit reports can be told apart.
    generation: u64,
    exit_rx: Option<ExitWatch>,
}

impl RunState {
    fn new() -> Self {
        Self {
            status: ProcessStatus::Stopped,
            phase: None,
            pid: None,
            port: None,
            url: None,
            start_time: None,
            started_at: None,
            restart_count: 0,
            version_id: None,
            last_error: None,
            generation: 0,
            exit_rx: None,
        }
    }

    fn snapshot(&self) -> ProcessInfo {
        let uptime_secs = match (self.status, self.started_at) {
            (ProcessStatus::Running, Some(at)) => at.elapsed().as_secs(),
            _ => 0,
        };
        ProcessInfo {
            status: self.status,
            pid: self.pid,
            uptime_secs,
            start_time: self.start_time,
            url: self.url.clone(),
            restart_count: self.restart_count,
            phase: self.phase,
            port: self.port,
            version_id: self.version_id.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn is_starting(&self, generation: u64) -> bool {
        self.generation == generation && self.status == ProcessStatus::Starting
    }

    /// `Ok(true)` while start `generation` should continue, `Ok(false)` once it was
    /// superseded or stopped, and an error if its child died first.
    fn startup_check(&self, generation: u64) -> Result<bool> {
        if self.is_starting(generation) {
            return Ok(true);
        }
        if self.generation == generation && self.status == ProcessStatus::Error {
            let detail = self
                .last_error
                .clone()
                .unwrap_or_else(|| "Service exited during startup".to_string());
            return Err(AppError::process(detail));
        }
        Ok(false)
    }

    fn clear_run(&mut self) {
        self.phase = None;
        self.pid = None;
        self.url = None;
        self.start_time = None;
        self.started_at = None;
    }
}

struct Inner {
    layout: DataLayout,
    health_client: Client,
    inputs: RwLock<Inputs>,
    state: RwLock<RunState>,
    /// Serializes stop and restart.
    lifecycle: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ProcessEvent>,
}

impl Inner {
    fn emit(&self, event: ProcessEvent) {
        let _ = self.events.send(event);
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, RunState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, RunState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn on_exit(&self, generation: u64, record: &ExitRecord) {
        let (expected, crashed) = {
            let mut state = self.write_state();
            if state.generation != generation {
                return;
            }
            let crashed = matches!(
                state.status,
                ProcessStatus::Starting | ProcessStatus::Running
            );
            state.clear_run();
            if crashed {
                state.status = ProcessStatus::Error;
                state.last_error = Some(format!("Service {}", record.detail));
            }
            (!crashed, crashed)
        };

        if crashed {
            log::error!("Service process {}", record.detail);
        } else {
            log::info!("Service process {}", record.detail);
        }
        self.emit(ProcessEvent::Exited {
            code: record.code,
            expected,
        });
        if crashed {
            self.emit(ProcessEvent::StatusChanged {
                status: ProcessStatus::Error,
            });
        }
    }
}

/// Starts, monitors and stops the service of the active version.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(layout: DataLayout, settings: ServiceSettings) -> Result<Self> {
        let health_client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(5))
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                layout,
                health_client,
                inputs: RwLock::new(Inputs {
                    version_id: None,
                    entry_point: None,
                    settings,
                }),
                state: RwLock::new(RunState::new()),
                lifecycle: tokio::sync::Mutex::new(()),
                events,
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.inner.events.subscribe()
    }

    pub fn get_status(&self) -> ProcessInfo {
        self.inner.read_state().snapshot()
    }

    pub fn set_active_version(&self, version_id: Option<String>) {
        self.inner
            .inputs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .version_id = version_id;
    }

    pub fn set_entry_point(&self, entry_point: Option<ResolvedEntryPoint>) {
        self.inner
            .inputs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry_point = entry_point;
    }

    /// Apply a settings patch; it takes effect on the next start.
    pub fn update_config(&self, patch: ServiceSettingsPatch) {
        self.inner
            .inputs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .settings
            .apply(patch);
    }

    pub fn settings(&self) -> ServiceSettings {
        self.inner
            .inputs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .settings
            .clone()
    }

    /// Whether the configured (or current) port can be bound. Nothing is left listening.
    pub fn check_port_available(&self) -> bool {
        let settings = self.settings();
        let port = settings.port.or(self.inner.read_state().port);
        match port {
            Some(port) => check_port_available(&settings.host, port),
            None => true,
        }
    }

    /// Start the service. A start while one is already starting or running
    /// returns the current snapshot without spawning.
    pub async fn start(&self) -> Result<ProcessInfo> {
        self.start_run(true).await
    }

    /// Stop the service and reap it: graceful signal, grace period, then force kill.
    pub async fn stop(&self) -> Result<ProcessInfo> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked().await
    }

    /// Stop, then start again. Only the stop half holds the lifecycle lock, so a
    /// `stop()` during the new startup cancels it.
    pub async fn restart(&self) -> Result<ProcessInfo> {
        {
            let _lifecycle = self.inner.lifecycle.lock().await;
            match self.stop_locked().await {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::ProcessNotRunning => {}
                Err(e) => return Err(e),
            }
        }
        self.start_run(false).await
    }

    /// Stop the service if it is running. Used on shutdown.
    pub async fn cleanup(&self) {
        match self.stop().await {
            Ok(_) => log::info!("Service stopped during cleanup"),
            Err(e) if e.kind() == ErrorKind::ProcessNotRunning => {}
            Err(e) => log::error!("Failed to stop service during cleanup: {}", e),
        }
    }

    async fn start_run(&self, fresh: bool) -> Result<ProcessInfo> {
        let (version_id, entry_point, settings) = {
            let inputs = self.inner.inputs.read().unwrap_or_else(|e| e.into_inner());
            let version_id = inputs
                .version_id
                .clone()
                .ok_or_else(AppError::no_active_version)?;
            let entry_point = inputs
                .entry_point
                .clone()
                .ok_or_else(|| AppError::no_entry_point(&version_id))?;
            (version_id, entry_point, inputs.settings.clone())
        };

        let generation = {
            let mut state = self.inner.write_state();
            if state.status.is_active() {
                return Ok(state.snapshot());
            }
            state.generation += 1;
            state.clear_run();
            state.status = ProcessStatus::Starting;
            state.phase = Some(StartupPhase::CheckingPort);
            state.port = None;
            state.last_error = None;
            state.exit_rx = None;
            state.version_id = Some(version_id.clone());
            if fresh {
                state.restart_count = 0;
            } else {
                state.restart_count += 1;
            }
            state.generation
        };
        log::info!("Starting service for {}", version_id);
        self.inner.emit(ProcessEvent::StatusChanged {
            status: ProcessStatus::Starting,
        });
        self.inner.emit(ProcessEvent::PhaseChanged {
            phase: StartupPhase::CheckingPort,
        });

        match self
            .run_startup(generation, &version_id, &entry_point, &settings)
            .await
        {
            Ok(()) => Ok(self.get_status()),
            Err(e) => {
                self.fail(generation, &e.to_string());
                Err(e)
            }
        }
    }

    fn fail(&self, generation: u64, message: &str) {
        let changed = {
            let mut state = self.inner.write_state();
            if state.generation != generation
                || !matches!(
                    state.status,
                    ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Error
                )
            {
                return;
            }
            let changed = state.status != ProcessStatus::Error;
            state.status = ProcessStatus::Error;
            state.phase = None;
            state.url = None;
            state.last_error = Some(message.to_string());
            changed
        };
        log::error!("Service failed to start: {}", message);
        if changed {
            self.inner.emit(ProcessEvent::StatusChanged {
                status: ProcessStatus::Error,
            });
        }
    }

    /// Move to `phase` if this start is still current.
    fn enter_phase(&self, generation: u64, phase: StartupPhase) -> Result<bool> {
        {
            let mut state = self.inner.write_state();
            if !state.startup_check(generation)? {
                return Ok(false);
            }
            state.phase = Some(phase);
        }
        log::debug!("Service startup phase: {:?}", phase);
        self.inner.emit(ProcessEvent::PhaseChanged { phase });
        Ok(true)
    }

    async fn run_startup(
        &self,
        generation: u64,
        version_id: &str,
        entry_point: &ResolvedEntryPoint,
        settings: &ServiceSettings,
    ) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(settings.startup_timeout_secs);
        let host = settings.host.as_str();

        let port = match settings.port {
            Some(port) => port,
            None => find_available_port()?,
        };
        {
            let mut state = self.inner.write_state();
            if !state.is_starting(generation) {
                return Ok(());
            }
            state.port = Some(port);
        }
        if !check_port_available(host, port) {
            log::warn!("Port {} is already in use; starting anyway", port);
            self.inner.emit(ProcessEvent::PortBusy { port });
        }

        if !self.enter_phase(generation, StartupPhase::Spawning)? {
            return Ok(());
        }
        let mut child = spawn_service(entry_point, host, port)?;
        let pid = child
            .id()
            .ok_or_else(|| AppError::process("Failed to get process ID"))?;

        let (exit_tx, exit_rx) = watch::channel(None);
        let registered = {
            let mut state = self.inner.write_state();
            let current = state.is_starting(generation);
            if current {
                state.pid = Some(pid);
                state.exit_rx = Some(exit_rx.clone());
            }
            current
        };
        if !registered {
            log::info!("Start of {} was cancelled; killing PID {}", version_id, pid);
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill cancelled service PID {}: {}", pid, e);
            }
            return Ok(());
        }
        log::info!("Service {} spawned with PID {} on port {}", version_id, pid, port);

        let log_file = self.open_service_log(version_id);
        if let Some(stdout) = child.stdout.take() {
            pipe_output(stdout, version_id, "stdout", log_file.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            pipe_output(stderr, version_id, "stderr", log_file);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let record = match child.wait().await {
                Ok(status) => ExitRecord {
                    code: status.code(),
                    detail: format!("exited with {}", status),
                },
                Err(e) => ExitRecord {
                    code: None,
                    detail: format!("could not be waited on: {}", e),
                },
            };
            inner.on_exit(generation, &record);
            let _ = exit_tx.send(Some(record));
        });

        if !self.enter_phase(generation, StartupPhase::WaitingListening)? {
            return Ok(());
        }
        let probe_host = if host == "0.0.0.0" { "127.0.0.1" } else { host };
        loop {
            // The exit task updates state before publishing, so a stop that
            // caused this exit is already visible here.
            if !self.inner.read_state().startup_check(generation)? {
                return Ok(());
            }
            let exited = exit_rx.borrow().clone();
            if let Some(exit) = exited {
                return Err(AppError::process(format!(
                    "Service {} during startup",
                    exit.detail
                )));
            }
            if is_listening(probe_host, port).await {
                break;
            }
            if Instant::now() >= deadline {
                self.kill_and_reap(pid, Some(exit_rx.clone())).await;
                return Err(AppError::startup_timeout(settings.startup_timeout_secs));
            }
            tokio::time::sleep(LISTEN_POLL_INTERVAL).await;
        }

        if !self.enter_phase(generation, StartupPhase::HealthCheck)? {
            return Ok(());
        }
        if let Some(path) = settings.health_check_path.as_deref() {
            let url = service_url(host, port, Some(path));
            loop {
                if !self.inner.read_state().startup_check(generation)? {
                    return Ok(());
                }
                if check_health(&self.inner.health_client, &url).await {
                    break;
                }
                if Instant::now() >= deadline {
                    self.kill_and_reap(pid, Some(exit_rx.clone())).await;
                    return Err(AppError::startup_timeout(settings.startup_timeout_secs)
                        .with_context("health_url", url));
                }
                tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
            }
        }

        if !self.enter_phase(generation, StartupPhase::Running)? {
            return Ok(());
        }
        let url = service_url(host, port, None);
        {
            let mut state = self.inner.write_state();
            if !state.startup_check(generation)? {
                return Ok(());
            }
            state.status = ProcessStatus::Running;
            state.phase = None;
            state.url = Some(url.clone());
            state.start_time = Some(Utc::now());
            state.started_at = Some(Instant::now());
        }
        log::info!("Service {} is running at {}", version_id, url);
        self.inner.emit(ProcessEvent::StatusChanged {
            status: ProcessStatus::Running,
        });
        Ok(())
    }

    async fn stop_locked(&self) -> Result<ProcessInfo> {
        let (pid, exit_rx) = {
            let mut state = self.inner.write_state();
            match state.status {
                ProcessStatus::Stopped => return Err(AppError::process_not_running()),
                ProcessStatus::Error if state.pid.is_none() => {
                    state.status = ProcessStatus::Stopped;
                    state.clear_run();
                    let snapshot = state.snapshot();
                    drop(state);
                    self.inner.emit(ProcessEvent::StatusChanged {
                        status: ProcessStatus::Stopped,
                    });
                    return Ok(snapshot);
                }
                _ => {}
            }
            state.status = ProcessStatus::Stopping;
            state.phase = None;
            (state.pid, state.exit_rx.clone())
        };
        self.inner.emit(ProcessEvent::StatusChanged {
            status: ProcessStatus::Stopping,
        });

        if let Some(pid) = pid {
            let shutdown_timeout = Duration::from_secs(self.settings().shutdown_timeout_secs);
            let already_exited = exit_rx.as_ref().is_some_and(|rx| rx.borrow().is_some());
            if !already_exited {
                log::info!("Stopping service PID {}", pid);
                match graceful_signal(pid) {
                    Ok(()) => {
                        if !wait_exit(exit_rx.clone(), shutdown_timeout).await {
                            log::warn!(
                                "PID {} did not exit within {}s, force killing",
                                pid,
                                shutdown_timeout.as_secs()
                            );
                            self.kill_and_reap(pid, exit_rx).await;
                        }
                    }
                    Err(e) => {
                        log::warn!("Graceful signal failed for PID {}: {}, force killing", pid, e);
                        self.kill_and_reap(pid, exit_rx).await;
                    }
                }
            }
        }

        let snapshot = {
            let mut state = self.inner.write_state();
            state.status = ProcessStatus::Stopped;
            state.clear_run();
            state.exit_rx = None;
            state.snapshot()
        };
        log::info!("Service stopped");
        self.inner.emit(ProcessEvent::StatusChanged {
            status: ProcessStatus::Stopped,
        });
        Ok(snapshot)
    }

    async fn kill_and_reap(&self, pid: u32, exit_rx: Option<ExitWatch>) {
        if let Err(e) = force_kill(pid) {
            log::error!("Failed to force kill PID {}: {}", pid, e);
        }
        if !wait_exit(exit_rx, FORCE_KILL_REAP_TIMEOUT).await {
            log::error!("PID {} was not reaped after force kill", pid);
        }
    }

    fn open_service_log(&self, version_id: &str) -> Option<Arc<Mutex<File>>> {
        let dir = self.inner.layout.version_logs_dir(version_id);
        let opened = std::fs::create_dir_all(&dir).and_then(|()| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join(SERVICE_LOG_FILE))
        });
        match opened {
            Ok(file) => Some(Arc::new(Mutex::new(file))),
            Err(e) => {
                log::warn!("Cannot open service log in {:?}: {}", dir, e);
                None
            }
        }
    }
}

fn spawn_service(entry_point: &ResolvedEntryPoint, host: &str, port: u16) -> Result<Child> {
    let mut cmd = Command::new(&entry_point.program);
    cmd.args(entry_point.render_args(host, port))
        .current_dir(&entry_point.working_dir)
        .env("HOST", host)
        .env("PORT", port.to_string())
        .env("HAGICODE_URLS", format!("http://{}:{}", host, port))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(target_os = "windows")]
    {
        use windows::Win32::System::Threading::{CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW};
        cmd.creation_flags(CREATE_NO_WINDOW.0 | CREATE_NEW_PROCESS_GROUP.0);
    }

    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    cmd.spawn().map_err(|e| {
        AppError::process(format!(
            "Failed to start {}: {}",
            entry_point.program.display(),
            e
        ))
    })
}

fn pipe_output<R>(reader: R, version_id: &str, stream: &'static str, log_file: Option<Arc<Mutex<File>>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let version_id = version_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stream == "stderr" {
                log::warn!("[hagicode {} {}] {}", version_id, stream, line);
            } else {
                log::info!("[hagicode {} {}] {}", version_id, stream, line);
            }
            if let Some(file) = &log_file {
                let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
                let _ = writeln!(file, "[{}] {}", stream, line);
            }
        }
    });
}

/// Wait until the exit watch reports an exit. `None` means there is nothing to wait for.
async fn wait_exit(exit_rx: Option<ExitWatch>, timeout: Duration) -> bool {
    let Some(mut rx) = exit_rx else {
        return true;
    };
    let exited = matches!(
        tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await,
        Ok(Ok(_))
    );
    exited
}

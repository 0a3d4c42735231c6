//! Lifecycle orchestration for one observed service
//!
//! The coordinator owns the observed [`ServiceState`], the admin flag, the
//! standalone process and the log tail, and is the only place that changes
//! them. Every operation is an [`Action`] with a precondition; a presentation
//! layer asks [`ObserverCoordinator::precondition`] to decide what to offer and
//! calls [`ObserverCoordinator::execute`] (or the named method) to run it.
//! Changes are published as [`ObserverEvent`]s on a broadcast channel.
//!
//! All operations take `&mut self`, so one coordinator never runs two
//! operations at once. Share it behind [`SharedCoordinator`] when several
//! tasks trigger operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::control::{InstallOptions, ServiceControl};
use crate::error::{ObserverError, Result};
use crate::log_line::LogLine;
use crate::service::ServiceState;
use crate::settings::ServiceObserverSettings;
use crate::standalone::{ProcessHandle, StandaloneRunner};
use crate::tail::{LogTail, TailOptions, TailStream};

/// Wait after start/stop before re-querying, the controller reports pending states until then
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);

const EVENT_CAPACITY: usize = 256;

pub type SharedCoordinator = Arc<Mutex<ObserverCoordinator>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Action {
    Install,
    Uninstall,
    StartService,
    StopService,
    StartStandalone,
    StopStandalone,
    StartObservingLog,
    StopObservingLog,
    ClearLog,
    RestartElevated,
    Refresh,
}

impl Action {
    /// Presentation order
    pub const ALL: [Action; 11] = [
        Action::StartService,
        Action::StopService,
        Action::Install,
        Action::Uninstall,
        Action::StartStandalone,
        Action::StopStandalone,
        Action::StartObservingLog,
        Action::StopObservingLog,
        Action::ClearLog,
        Action::RestartElevated,
        Action::Refresh,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Install => "Install",
            Self::Uninstall => "Uninstall",
            Self::StartService => "Start service",
            Self::StopService => "Stop service",
            Self::StartStandalone => "Start standalone",
            Self::StopStandalone => "Stop standalone",
            Self::StartObservingLog => "Start observing log",
            Self::StopObservingLog => "Stop observing log",
            Self::ClearLog => "Clear log",
            Self::RestartElevated => "Restart as administrator",
            Self::Refresh => "Refresh",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActionInfo {
    pub action: Action,
    pub name: &'static str,
    pub enabled: bool,
}

/// Point-in-time view of the coordinator for presentation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub title: String,
    pub settings: ServiceObserverSettings,
    pub state: ServiceState,
    pub admin_mode: bool,
    pub installed: bool,
    pub running: bool,
    pub standalone_running: bool,
    pub observing_log: bool,
    pub unchanged_secs: u64,
    pub log_len: usize,
}

#[derive(Clone, Debug)]
pub enum ObserverEvent {
    StateChanged(Snapshot),
    LogAppended(LogLine),
    LogCleared,
    /// Seconds since the last tailed line changed
    Heartbeat { unchanged_secs: u64 },
    /// An elevated copy took over; the host should exit now
    ExitRequested,
}

/// Relaunches the current program with elevated privilege
#[async_trait]
pub trait Elevator: Send + Sync {
    async fn relaunch(&self, args: &[String]) -> Result<()>;
}

/// [`Elevator`] for hosts that cannot elevate
pub struct NoElevation;

#[async_trait]
impl Elevator for NoElevation {
    async fn relaunch(&self, _args: &[String]) -> Result<()> {
        Err(ObserverError::Elevation {
            reason: "elevation is not supported on this host".into(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    pub settle_delay: Duration,
    pub tail: TailOptions,
    pub install: InstallOptions,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            tail: TailOptions::default(),
            install: InstallOptions::default(),
        }
    }
}

pub struct ObserverCoordinator {
    control: Arc<dyn ServiceControl>,
    elevator: Arc<dyn Elevator>,
    runner: StandaloneRunner,
    options: CoordinatorOptions,

    available: Vec<ServiceObserverSettings>,
    loaded: ServiceObserverSettings,

    admin_mode: bool,
    state: ServiceState,
    standalone: Option<ProcessHandle>,

    tail: LogTail,
    tail_stream: Option<TailStream>,
    last_heartbeat: u64,
    log_text: Vec<LogLine>,

    event_tx: broadcast::Sender<ObserverEvent>,
}

impl ObserverCoordinator {
    /// `admin_mode` is decided once by the host from the process privilege
    pub fn new(
        available: Vec<ServiceObserverSettings>,
        admin_mode: bool,
        control: Arc<dyn ServiceControl>,
        elevator: Arc<dyn Elevator>,
        options: CoordinatorOptions,
    ) -> Result<Self> {
        let loaded = available
            .first()
            .cloned()
            .ok_or(ObserverError::MissingSetting { field: "settings" })?;
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            control,
            elevator,
            runner: StandaloneRunner::new(),
            tail: LogTail::with_options(options.tail),
            options,
            available,
            loaded,
            admin_mode,
            state: ServiceState::NotInstalled,
            standalone: None,
            tail_stream: None,
            last_heartbeat: 0,
            log_text: Vec::new(),
            event_tx,
        })
    }

    pub fn with_runner(mut self, runner: StandaloneRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn shared(self) -> SharedCoordinator {
        Arc::new(Mutex::new(self))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.event_tx.subscribe()
    }

    // ─────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_admin_mode(&self) -> bool {
        self.admin_mode
    }

    pub fn is_service_installed(&self) -> bool {
        self.state.is_installed()
    }

    pub fn is_service_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_standalone_running(&self) -> bool {
        self.standalone.is_some()
    }

    pub fn is_observing_log(&self) -> bool {
        self.tail.is_active()
    }

    pub fn observing_log_unchanged_secs(&self) -> u64 {
        self.tail.unchanged_secs()
    }

    pub fn log_text(&self) -> &[LogLine] {
        &self.log_text
    }

    pub fn loaded_settings(&self) -> &ServiceObserverSettings {
        &self.loaded
    }

    pub fn available_settings(&self) -> &[ServiceObserverSettings] {
        &self.available
    }

    pub fn title(&self) -> String {
        format!(
            "Observer: {}{}",
            self.loaded.display_name(),
            if self.admin_mode { " (Administrator)" } else { "" }
        )
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            title: self.title(),
            settings: self.loaded.clone(),
            state: self.state,
            admin_mode: self.admin_mode,
            installed: self.is_service_installed(),
            running: self.is_service_running(),
            standalone_running: self.is_standalone_running(),
            observing_log: self.is_observing_log(),
            unchanged_secs: self.observing_log_unchanged_secs(),
            log_len: self.log_text.len(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────

    pub fn precondition(&self, action: Action) -> bool {
        let admin = self.admin_mode;
        let installed = self.is_service_installed();
        let running = self.is_service_running();
        let standalone = self.is_standalone_running();
        let has_name = self.loaded.service_name.is_some();
        let has_path = self.loaded.executable_path.is_some();

        match action {
            Action::Install => admin && !installed && !standalone && has_name && has_path,
            Action::Uninstall => admin && installed && !running && has_name,
            Action::StartService => admin && installed && !running && !standalone && has_name,
            Action::StopService => admin && installed && running && has_name,
            Action::StartStandalone => !running && !standalone && has_path,
            Action::StopStandalone => standalone,
            Action::StartObservingLog => !self.is_observing_log() && self.loaded.log_path.is_some(),
            Action::StopObservingLog => self.is_observing_log(),
            Action::ClearLog => !self.log_text.is_empty(),
            Action::RestartElevated => !admin,
            Action::Refresh => has_name,
        }
    }

    pub fn actions(&self) -> Vec<ActionInfo> {
        Action::ALL
            .iter()
            .map(|&action| ActionInfo {
                action,
                name: action.name(),
                enabled: self.precondition(action),
            })
            .collect()
    }

    pub async fn execute(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Install => self.install().await,
            Action::Uninstall => self.uninstall().await,
            Action::StartService => self.start_service().await,
            Action::StopService => self.stop_service().await,
            Action::StartStandalone => self.start_standalone(),
            Action::StopStandalone => self.stop_standalone().await,
            Action::StartObservingLog => self.start_observing_log(),
            Action::StopObservingLog => self.stop_observing_log().await,
            Action::ClearLog => self.clear_log(),
            Action::RestartElevated => self.restart_elevated().await,
            Action::Refresh => self.refresh().await,
        }
    }

    fn ensure(&self, action: Action) -> Result<()> {
        if self.precondition(action) {
            Ok(())
        } else {
            warn!(action = action.name(), state = %self.state, "action rejected");
            Err(ObserverError::Rejected {
                action: action.name(),
            })
        }
    }

    fn service_name(&self) -> Result<String> {
        self.loaded
            .service_name
            .clone()
            .ok_or(ObserverError::MissingSetting { field: "name" })
    }

    fn executable_path(&self) -> Result<PathBuf> {
        self.loaded
            .executable_path
            .clone()
            .ok_or(ObserverError::MissingSetting { field: "executable" })
    }

    pub async fn install(&mut self) -> Result<()> {
        self.ensure(Action::Install)?;
        let name = self.service_name()?;
        let binary = absolute(&self.executable_path()?)?;

        info!(service = %name, binary = %binary.display(), "installing service");
        let result = self
            .control
            .install(&name, &binary, self.options.install)
            .await;
        self.refresh_after(result).await
    }

    pub async fn uninstall(&mut self) -> Result<()> {
        self.ensure(Action::Uninstall)?;
        let name = self.service_name()?;

        info!(service = %name, "uninstalling service");
        let result = self.control.uninstall(&name).await;
        self.refresh_after(result).await
    }

    pub async fn start_service(&mut self) -> Result<()> {
        self.ensure(Action::StartService)?;
        let name = self.service_name()?;

        info!(service = %name, "starting service");
        let result = self.control.start(&name).await.map(|_| ());
        if result.is_ok() {
            tokio::time::sleep(self.options.settle_delay).await;
        }
        self.refresh_after(result).await?;
        self.open_tail()
    }

    pub async fn stop_service(&mut self) -> Result<()> {
        self.ensure(Action::StopService)?;
        let name = self.service_name()?;

        info!(service = %name, "stopping service");
        let result = self.control.stop(&name).await.map(|_| ());
        let stopped = result.is_ok();
        if stopped {
            tokio::time::sleep(self.options.settle_delay).await;
        }
        let refreshed = self.refresh_after(result).await;
        // Close even when the refresh failed
        if stopped {
            self.close_tail().await;
        }
        refreshed
    }

    pub fn start_standalone(&mut self) -> Result<()> {
        self.ensure(Action::StartStandalone)?;
        let path = self.executable_path()?;

        let handle = self
            .runner
            .start(&path, self.loaded.executable_args.as_deref())?;
        self.standalone = Some(handle);
        self.emit_state();

        self.open_tail()
    }

    pub async fn stop_standalone(&mut self) -> Result<()> {
        self.ensure(Action::StopStandalone)?;

        let result = match self.standalone.take() {
            Some(handle) => self.runner.stop(handle).await,
            None => Ok(()),
        };
        self.emit_state();
        self.close_tail().await;
        result
    }

    pub fn start_observing_log(&mut self) -> Result<()> {
        self.ensure(Action::StartObservingLog)?;
        self.open_tail()
    }

    pub async fn stop_observing_log(&mut self) -> Result<()> {
        self.ensure(Action::StopObservingLog)?;
        self.close_tail().await;
        Ok(())
    }

    pub fn clear_log(&mut self) -> Result<()> {
        self.ensure(Action::ClearLog)?;
        self.reset_log();
        Ok(())
    }

    /// Stop the standalone run and hand over to an elevated copy with the same settings.
    ///
    /// On success an [`ObserverEvent::ExitRequested`] is published; the host
    /// must terminate the current process.
    pub async fn restart_elevated(&mut self) -> Result<()> {
        self.ensure(Action::RestartElevated)?;

        if let Some(handle) = self.standalone.take() {
            self.runner.stop(handle).await?;
            self.close_tail().await;
        }

        let args = self.loaded.to_args();
        info!(args = ?args, "relaunching elevated");
        self.elevator.relaunch(&args).await?;

        let _ = self.event_tx.send(ObserverEvent::ExitRequested);
        Ok(())
    }

    pub async fn refresh(&mut self) -> Result<()> {
        self.ensure(Action::Refresh)?;
        self.refresh_state().await
    }

    // ─────────────────────────────────────────────────────────────
    // Settings lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Initial load: query the service and start tailing its log
    pub async fn load(&mut self) -> Result<()> {
        self.refresh_state().await?;
        self.open_tail()
    }

    /// Tear down everything tied to the loaded settings
    pub async fn unload(&mut self) {
        self.force_stop_standalone();
        self.close_tail().await;
        self.reset_log();
    }

    /// Switch to another configured settings set
    pub async fn select(&mut self, index: usize) -> Result<()> {
        let Some(settings) = self.available.get(index).cloned() else {
            return Err(ObserverError::MissingSetting { field: "settings" });
        };

        self.unload().await;
        info!(settings = %settings.display_name(), "switching settings");
        self.loaded = settings;
        self.state = ServiceState::NotInstalled;
        self.emit_state();
        self.load().await
    }

    /// Teardown for exit: kill the standalone run and stop tailing
    pub async fn shutdown(&mut self) {
        self.force_stop_standalone();
        self.close_tail().await;
    }

    /// Take over lines the tail worker produced since the last call.
    ///
    /// Also notices a tail that ended on its own and a standalone process that
    /// exited by itself. Returns the number of appended lines.
    pub fn pump(&mut self) -> usize {
        let lines = self
            .tail_stream
            .as_mut()
            .map(TailStream::drain)
            .unwrap_or_default();
        let count = lines.len();
        for line in lines {
            self.push_line(line);
        }

        if self.tail_stream.is_some() && !self.tail.is_active() {
            let rest = self
                .tail_stream
                .take()
                .map(|mut s| s.drain())
                .unwrap_or_default();
            for line in rest {
                self.push_line(line);
            }
            warn!("log tail ended");
            self.emit_state();
        }

        if let Some(handle) = self.standalone.as_mut() {
            if let Some(code) = handle.exit_code() {
                info!(code = ?code, "standalone process exited");
                self.standalone = None;
                self.emit_state();
            }
        }

        let heartbeat = self.tail.unchanged_secs();
        if heartbeat != self.last_heartbeat {
            self.last_heartbeat = heartbeat;
            let _ = self.event_tx.send(ObserverEvent::Heartbeat {
                unchanged_secs: heartbeat,
            });
        }

        count
    }

    // ─────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────

    /// Re-query the state whatever the outcome of a mutating call, then report
    /// the call's own error first.
    async fn refresh_after(&mut self, result: Result<()>) -> Result<()> {
        let refreshed = self.refresh_state().await;
        result?;
        refreshed
    }

    async fn refresh_state(&mut self) -> Result<()> {
        let Some(name) = self.loaded.service_name.clone() else {
            return Ok(());
        };

        let state = match self.control.query(&name).await {
            Ok(state) => state,
            Err(e) if e.is_not_installed() => ServiceState::NotInstalled,
            Err(e) => return Err(e),
        };

        if state != self.state {
            debug!(service = %name, from = %self.state, to = %state, "service state changed");
        }
        self.state = state;
        self.emit_state();
        Ok(())
    }

    fn open_tail(&mut self) -> Result<()> {
        let Some(path) = self.loaded.log_path.clone() else {
            return Ok(());
        };

        if let Some(stream) = self.tail.open(&path)? {
            self.tail_stream = Some(stream);
            self.emit_state();
        }
        Ok(())
    }

    async fn close_tail(&mut self) {
        if self.tail_stream.is_none() && !self.tail.is_active() {
            return;
        }

        self.tail.stop().await;
        if let Some(mut stream) = self.tail_stream.take() {
            for line in stream.drain() {
                self.push_line(line);
            }
        }
        self.last_heartbeat = 0;
        self.emit_state();
    }

    fn force_stop_standalone(&mut self) {
        if let Some(handle) = self.standalone.take() {
            self.runner.force_stop(handle);
            self.emit_state();
        }
    }

    fn push_line(&mut self, line: LogLine) {
        let _ = self.event_tx.send(ObserverEvent::LogAppended(line.clone()));
        self.log_text.push(line);
    }

    fn reset_log(&mut self) {
        if self.log_text.is_empty() {
            return;
        }
        self.log_text.clear();
        let _ = self.event_tx.send(ObserverEvent::LogCleared);
    }

    fn emit_state(&self) {
        let _ = self.event_tx.send(ObserverEvent::StateChanged(self.snapshot()));
    }
}

impl Drop for ObserverCoordinator {
    fn drop(&mut self) {
        self.force_stop_standalone();
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

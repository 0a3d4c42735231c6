//! Service controller client
//!
//! Drives the OS service-control executable (`sc.exe` by default) with one
//! verb per call and turns its line-oriented output into a [`ServiceState`].
//! The output grammar and the "does not exist" exit code are those of the
//! Windows service controller.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ERROR_SERVICE_DOES_NOT_EXIST, ObserverError, Result};
use crate::service::ServiceState;

/// Token marking the state line in controller output
const STATE_TOKEN: &str = "STATE";

pub const DEFAULT_CONTROL_PROGRAM: &str = "sc.exe";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlVerb {
    Create,
    Delete,
    Start,
    Stop,
    Query,
}

impl ControlVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Query => "query",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// Register the service with `start= auto`
    pub auto_start: bool,
}

/// One call to the service controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlInvocation {
    pub verb: ControlVerb,
    pub service: String,
    pub bin_path: Option<PathBuf>,
    pub auto_start: bool,
}

impl ControlInvocation {
    pub fn new(verb: ControlVerb, service: impl Into<String>) -> Self {
        Self {
            verb,
            service: service.into(),
            bin_path: None,
            auto_start: false,
        }
    }

    pub fn create(service: impl Into<String>, bin_path: &Path, options: InstallOptions) -> Self {
        Self {
            verb: ControlVerb::Create,
            service: service.into(),
            bin_path: Some(bin_path.to_path_buf()),
            auto_start: options.auto_start,
        }
    }

    /// Argument vector, unquoted
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.verb.as_str().to_string(), self.service.clone()];
        if let Some(path) = &self.bin_path {
            args.push("binpath=".into());
            args.push(path.to_string_lossy().into_owned());
        }
        if self.auto_start {
            args.push("start=".into());
            args.push("auto".into());
        }
        args
    }

    /// `<verb> "<service>" [binpath= "<path>"] [start= auto]`
    pub fn command_line(&self) -> String {
        let mut line = format!("{} \"{}\"", self.verb.as_str(), self.service);
        if let Some(path) = &self.bin_path {
            line.push_str(&format!(" binpath= \"{}\"", path.display()));
        }
        if self.auto_start {
            line.push_str(" start= auto");
        }
        line
    }
}

/// Captured result of a finished controller process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlOutput {
    pub stdout: String,
    pub code: i32,
}

impl ControlOutput {
    pub fn new(stdout: impl Into<String>, code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            code,
        }
    }
}

/// Read the service state from `query`/`start`/`stop` output.
///
/// The first line containing `STATE` wins; its last whitespace-delimited
/// token is the state label.
pub fn parse_state(service: &str, output: &ControlOutput) -> Result<ServiceState> {
    if output.code == ERROR_SERVICE_DOES_NOT_EXIST {
        return Err(ObserverError::not_installed(service));
    }

    let Some(line) = output.stdout.lines().find(|l| l.contains(STATE_TOKEN)) else {
        if output.code != 0 {
            return Err(ObserverError::ServiceControl {
                message: output.stdout.clone(),
                code: output.code,
            });
        }
        return Err(ObserverError::Parse {
            line: format!("no {} line in output", STATE_TOKEN),
        });
    };

    line.split_whitespace()
        .last()
        .and_then(ServiceState::from_label)
        .ok_or_else(|| ObserverError::Parse {
            line: line.trim().to_string(),
        })
}

/// Success check for `create`/`delete`: exit code 0
pub fn check_success(service: &str, output: &ControlOutput) -> Result<()> {
    match output.code {
        0 => Ok(()),
        ERROR_SERVICE_DOES_NOT_EXIST => Err(ObserverError::not_installed(service)),
        code => Err(ObserverError::ServiceControl {
            message: output.stdout.clone(),
            code,
        }),
    }
}

/// Lifecycle operations against the OS service manager
#[async_trait]
pub trait ServiceControl: Send + Sync {
    /// Human-readable name of this backend
    fn name(&self) -> &'static str;

    async fn install(
        &self,
        service: &str,
        binary_path: &Path,
        options: InstallOptions,
    ) -> Result<()>;

    async fn uninstall(&self, service: &str) -> Result<()>;

    async fn start(&self, service: &str) -> Result<ServiceState>;

    async fn stop(&self, service: &str) -> Result<ServiceState>;

    async fn query(&self, service: &str) -> Result<ServiceState>;
}

/// [`ServiceControl`] backed by the service-control executable
#[derive(Clone, Debug)]
pub struct ScControl {
    program: PathBuf,
}

impl ScControl {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_CONTROL_PROGRAM),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn invoke(&self, invocation: &ControlInvocation) -> Result<ControlOutput> {
        let mut cmd = Command::new(&self.program);

        #[cfg(windows)]
        cmd.raw_arg(invocation.command_line());
        #[cfg(not(windows))]
        cmd.args(invocation.args());

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| ObserverError::process_launch(&self.program, e))?;

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            stdout.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        // Killed by a signal: no exit code
        let code = output.status.code().unwrap_or(-1);

        debug!(
            verb = invocation.verb.as_str(),
            service = %invocation.service,
            code,
            "service control finished"
        );
        if code != 0 && code != ERROR_SERVICE_DOES_NOT_EXIST {
            warn!(
                verb = invocation.verb.as_str(),
                service = %invocation.service,
                code,
                "service control returned an error"
            );
        }

        Ok(ControlOutput { stdout, code })
    }

    async fn invoke_for_state(&self, verb: ControlVerb, service: &str) -> Result<ServiceState> {
        let output = self.invoke(&ControlInvocation::new(verb, service)).await?;
        parse_state(service, &output)
    }
}

impl Default for ScControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceControl for ScControl {
    fn name(&self) -> &'static str {
        "sc"
    }

    async fn install(
        &self,
        service: &str,
        binary_path: &Path,
        options: InstallOptions,
    ) -> Result<()> {
        let output = self
            .invoke(&ControlInvocation::create(service, binary_path, options))
            .await?;
        check_success(service, &output)
    }

    async fn uninstall(&self, service: &str) -> Result<()> {
        let output = self
            .invoke(&ControlInvocation::new(ControlVerb::Delete, service))
            .await?;
        check_success(service, &output)
    }

    async fn start(&self, service: &str) -> Result<ServiceState> {
        self.invoke_for_state(ControlVerb::Start, service).await
    }

    async fn stop(&self, service: &str) -> Result<ServiceState> {
        self.invoke_for_state(ControlVerb::Stop, service).await
    }

    async fn query(&self, service: &str) -> Result<ServiceState> {
        self.invoke_for_state(ControlVerb::Query, service).await
    }
}

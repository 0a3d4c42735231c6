//! Process privilege detection and elevated relaunch

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use observer_core::coordinator::Elevator;
use observer_core::{ObserverError, Result};

/// Whether this process already runs with administrator privilege
pub fn is_elevated() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(windows)]
    {
        // `net session` is refused for non-elevated tokens
        std::process::Command::new("net")
            .arg("session")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    {
        false
    }
}

/// Relaunches the running executable through the platform's elevation prompt
pub struct SystemElevator {
    program: PathBuf,
}

impl SystemElevator {
    pub fn current() -> io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
        })
    }
}

#[async_trait]
impl Elevator for SystemElevator {
    async fn relaunch(&self, args: &[String]) -> Result<()> {
        relaunch_elevated(&self.program, args).await
    }
}

#[cfg(unix)]
async fn relaunch_elevated(program: &Path, args: &[String]) -> Result<()> {
    use std::os::unix::process::CommandExt;

    info!(program = %program.display(), "re-executing through sudo");
    // exec only returns on failure; the elevated copy takes over this terminal
    let err = std::process::Command::new("sudo")
        .arg(program)
        .args(args)
        .exec();

    Err(ObserverError::Elevation {
        reason: format!("sudo: {}", err),
    })
}

#[cfg(windows)]
async fn relaunch_elevated(program: &Path, args: &[String]) -> Result<()> {
    let mut script = format!(
        "Start-Process -FilePath {} -Verb RunAs",
        powershell_quote(&program.to_string_lossy())
    );
    if !args.is_empty() {
        script.push_str(" -ArgumentList ");
        script.push_str(&powershell_quote(&join_command_line(args)));
    }

    info!(program = %program.display(), "relaunching through UAC");
    let status = tokio::process::Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", &script])
        .status()
        .await
        .map_err(|e| ObserverError::Elevation {
            reason: format!("powershell: {}", e),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(ObserverError::Elevation {
            reason: format!("elevation declined or failed ({})", status),
        })
    }
}

#[cfg(not(any(unix, windows)))]
async fn relaunch_elevated(_program: &Path, _args: &[String]) -> Result<()> {
    Err(ObserverError::Elevation {
        reason: "elevation is not supported on this platform".into(),
    })
}

/// Join argv into one command line, double-quoting elements with spaces
#[cfg_attr(not(windows), allow(dead_code))]
fn join_command_line(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("\"{}\"", arg.replace('"', "\\\""))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg_attr(not(windows), allow(dead_code))]
fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

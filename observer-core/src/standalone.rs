use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{ObserverError, Result};

/// A running standalone instance of the service executable
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pgid: i32,
    path: PathBuf,
    started_at: Instant,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// `Some(code)` once the process has exited on its own
    pub fn exit_code(&mut self) -> Option<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            _ => None,
        }
    }

    fn kill_group(&mut self) {
        #[cfg(unix)]
        if self.pgid > 0 {
            unsafe {
                libc::killpg(self.pgid, libc::SIGKILL);
            }
            return;
        }

        let _ = self.child.start_kill();
    }
}

/// Starts and kills standalone runs of the service executable
#[derive(Clone, Debug, Default)]
pub struct StandaloneRunner {
    cwd: Option<PathBuf>,
}

impl StandaloneRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Spawn `path` in its own process group.
    ///
    /// `args` is one command-line string; double quotes group words that contain spaces.
    pub fn start(&self, path: &Path, args: Option<&str>) -> Result<ProcessHandle> {
        let mut cmd = Command::new(path);
        if let Some(args) = args {
            cmd.args(split_args(args));
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ObserverError::process_launch(path, e))?;
        let pgid = child.id().map(|pid| pid as i32).unwrap_or(-1);

        info!(path = %path.display(), pid = pgid, "standalone process started");

        Ok(ProcessHandle {
            child,
            pgid,
            path: path.to_path_buf(),
            started_at: Instant::now(),
        })
    }

    /// Kill, wait for exit, release
    pub async fn stop(&self, mut handle: ProcessHandle) -> Result<()> {
        handle.kill_group();
        let status = handle.child.wait().await?;
        info!(
            path = %handle.path.display(),
            code = ?status.code(),
            "standalone process stopped"
        );
        Ok(())
    }

    /// Kill without waiting, for teardown paths
    pub fn force_stop(&self, mut handle: ProcessHandle) {
        handle.kill_group();
        if let Err(e) = handle.child.start_kill() {
            // Already gone
            debug!(path = %handle.path.display(), "force stop: {}", e);
        }
        warn!(path = %handle.path.display(), "standalone process force-stopped");
    }
}

/// Split a command-line string on whitespace outside double quotes, dropping the quotes
pub fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }

    args
}

//! Settings for one observed service
//!
//! A settings set names the OS service, the executable behind it (used both as
//! the service binary and for standalone runs) and the log file to tail. It can
//! be written to a flag-based argument vector and read back, which is how the
//! elevated relaunch carries the active settings into the new process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const NAME_FLAGS: (&str, &str) = ("-n", "--name");
const EXECUTABLE_FLAGS: (&str, &str) = ("-e", "--executable");
const LOG_FLAGS: (&str, &str) = ("-l", "--log");

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceObserverSettings {
    /// OS service name
    #[serde(default, rename = "name")]
    pub service_name: Option<String>,

    /// Service binary, also launched directly in standalone mode
    #[serde(default, rename = "executable")]
    pub executable_path: Option<PathBuf>,

    /// Extra arguments for standalone runs
    #[serde(default, rename = "args")]
    pub executable_args: Option<String>,

    /// Log file written by the service
    #[serde(default, rename = "log")]
    pub log_path: Option<PathBuf>,
}

impl ServiceObserverSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_path = Some(path.into());
        self
    }

    pub fn with_executable_args(mut self, args: impl Into<String>) -> Self {
        self.executable_args = Some(args.into());
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// A settings set is usable when it names a service or a log file
    pub fn is_meaningful(&self) -> bool {
        self.service_name.is_some() || self.log_path.is_some()
    }

    /// Service name, else the log file name
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.service_name {
            return name.clone();
        }

        self.log_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "observer".to_string())
    }

    /// Flag vector: `-n <name> -e "<path> <args>" -l <log>`, unset fields omitted
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(name) = &self.service_name {
            args.push(NAME_FLAGS.0.to_string());
            args.push(name.clone());
        }

        if let Some(path) = &self.executable_path {
            let mut value = path.to_string_lossy().into_owned();
            if let Some(extra) = &self.executable_args {
                value.push(' ');
                value.push_str(extra);
            }
            args.push(EXECUTABLE_FLAGS.0.to_string());
            args.push(value);
        }

        if let Some(log) = &self.log_path {
            args.push(LOG_FLAGS.0.to_string());
            args.push(log.to_string_lossy().into_owned());
        }

        args
    }

    /// Single command line with every value double-quoted
    pub fn to_command_line(&self) -> String {
        self.to_args()
            .chunks(2)
            .map(|pair| match pair {
                [flag, value] => format!("{} \"{}\"", flag, value),
                other => other.join(" "),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse a flag vector, accepting `-n/-e/-l` and `--name/--executable/--log`.
    ///
    /// The executable value is split on its first space into path and
    /// standalone arguments.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut settings = Self::default();

        if let Some(name) = find_param(args, NAME_FLAGS) {
            settings.service_name = Some(name);
        }

        if let Some(value) = find_param(args, EXECUTABLE_FLAGS) {
            let (path, extra) = split_executable(&value);
            settings.executable_path = Some(PathBuf::from(path));
            settings.executable_args = extra;
        }

        if let Some(log) = find_param(args, LOG_FLAGS) {
            settings.log_path = Some(PathBuf::from(log));
        }

        settings
    }
}

fn find_param<S: AsRef<str>>(args: &[S], (short, long): (&str, &str)) -> Option<String> {
    let idx = args
        .iter()
        .position(|a| a.as_ref() == short)
        .or_else(|| args.iter().position(|a| a.as_ref() == long))?;

    args.get(idx + 1).map(|v| unquote(v.as_ref()).to_string())
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn split_executable(value: &str) -> (String, Option<String>) {
    match value.split_once(' ') {
        Some((path, extra)) => (path.to_string(), Some(extra.to_string())),
        None => (value.to_string(), None),
    }
}

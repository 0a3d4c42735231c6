use std::fmt;

use serde::Serialize;

use crate::settings::ServiceObserverSettings;

/// Lifecycle state reported by the service controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    NotInstalled,
    Stopped,
    StopPending,
    StartPending,
    Running,
}

impl ServiceState {
    /// Map a controller state label (`stopped`, `stop_pending`, ...) case-insensitively
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "stopped" => Some(Self::Stopped),
            "stop_pending" => Some(Self::StopPending),
            "start_pending" => Some(Self::StartPending),
            "running" => Some(Self::Running),
            _ => None,
        }
    }

    pub fn is_installed(self) -> bool {
        !matches!(self, Self::NotInstalled)
    }

    /// A pending start counts as running, a pending stop does not
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::StartPending)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotInstalled => "not installed",
            Self::Stopped => "stopped",
            Self::StopPending => "stop pending",
            Self::StartPending => "start pending",
            Self::Running => "running",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A configured service paired with its last observed state
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceStateEntry {
    pub settings: ServiceObserverSettings,
    pub state: ServiceState,
}

impl ServiceStateEntry {
    pub fn new(settings: ServiceObserverSettings, state: ServiceState) -> Self {
        Self { settings, state }
    }

    pub fn service_name(&self) -> Option<&str> {
        self.settings.service_name.as_deref()
    }
}

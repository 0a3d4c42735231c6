//! Periodic state polling across every configured service
//!
//! Backs a tray-style overview: one entry per settings set that names a
//! service. The next pass is scheduled only after the previous one finished,
//! so slow controller calls never overlap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::ServiceControl;
use crate::error::Result;
use crate::service::{ServiceState, ServiceStateEntry};
use crate::settings::ServiceObserverSettings;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub enum PollerEvent {
    StateChanged {
        index: usize,
        entry: ServiceStateEntry,
    },
}

pub struct ServicePoller {
    control: Arc<dyn ServiceControl>,
    entries: Vec<ServiceStateEntry>,
    interval: Duration,
}

impl ServicePoller {
    pub fn new(control: Arc<dyn ServiceControl>) -> Self {
        Self {
            control,
            entries: Vec::new(),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn entries(&self) -> &[ServiceStateEntry] {
        &self.entries
    }

    /// Query every settings set with a service name and build the entry list
    pub async fn init(&mut self, settings: &[ServiceObserverSettings]) -> Result<()> {
        self.entries.clear();

        for s in settings {
            let Some(name) = s.service_name.as_deref() else {
                continue;
            };
            let state = query_absorbing(self.control.as_ref(), name).await?;
            self.entries.push(ServiceStateEntry::new(s.clone(), state));
        }

        info!(count = self.entries.len(), "service poller initialized");
        Ok(())
    }

    /// One pass over all entries; returns the indices whose state changed.
    ///
    /// A failing query is logged and leaves that entry as it was.
    pub async fn refresh(&mut self) -> Vec<usize> {
        let mut changed = Vec::new();

        for (index, entry) in self.entries.iter_mut().enumerate() {
            let Some(name) = entry.settings.service_name.as_deref() else {
                continue;
            };

            match query_absorbing(self.control.as_ref(), name).await {
                Ok(state) if state != entry.state => {
                    debug!(service = %name, from = %entry.state, to = %state, "polled state changed");
                    entry.state = state;
                    changed.push(index);
                }
                Ok(_) => {}
                Err(e) => warn!(service = %name, "state query failed: {}", e),
            }
        }

        changed
    }

    /// Poll until cancelled, publishing every change
    pub async fn run(&mut self, cancel: CancellationToken, event_tx: broadcast::Sender<PollerEvent>) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            for index in self.refresh().await {
                let _ = event_tx.send(PollerEvent::StateChanged {
                    index,
                    entry: self.entries[index].clone(),
                });
            }
        }
        debug!("service poller stopped");
    }
}

async fn query_absorbing(control: &dyn ServiceControl, name: &str) -> Result<ServiceState> {
    match control.query(name).await {
        Ok(state) => Ok(state),
        Err(e) if e.is_not_installed() => Ok(ServiceState::NotInstalled),
        Err(e) => Err(e),
    }
}

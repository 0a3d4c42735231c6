#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use observer_core::control::{InstallOptions, ServiceControl};
use observer_core::coordinator::{CoordinatorOptions, Elevator, ObserverCoordinator};
use observer_core::tail::TailOptions;
use observer_core::{ObserverError, Result, ServiceObserverSettings, ServiceState};

/// Scripted service controller that records every call
pub struct FakeControl {
    state: Mutex<ServiceState>,
    calls: Mutex<Vec<String>>,
    fail_next: Mutex<Option<ObserverError>>,
    fail_next_query: Mutex<Option<ObserverError>>,
    query_delay: Mutex<Duration>,
    queries_in_flight: AtomicUsize,
    max_queries_in_flight: AtomicUsize,
}

impl FakeControl {
    pub fn new(state: ServiceState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            fail_next_query: Mutex::new(None),
            query_delay: Mutex::new(Duration::ZERO),
            queries_in_flight: AtomicUsize::new(0),
            max_queries_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than `query`
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("query"))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn set_state(&self, state: ServiceState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn fail_next(&self, err: ObserverError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    /// Fail only the next `query`, leaving mutating calls alone
    pub fn fail_next_query(&self, err: ObserverError) {
        *self.fail_next_query.lock().unwrap() = Some(err);
    }

    /// Every `query` sleeps this long before answering
    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = delay;
    }

    pub fn query_count(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("query")).count()
    }

    /// Highest number of queries that were running at the same time
    pub fn max_queries_in_flight(&self) -> usize {
        self.max_queries_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.fail_next.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn current(&self) -> ServiceState {
        *self.state.lock().unwrap()
    }
}

#[async_trait]
impl ServiceControl for FakeControl {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn install(&self, service: &str, binary_path: &Path, _options: InstallOptions) -> Result<()> {
        self.record(format!("install {} {}", service, binary_path.display()))?;
        self.set_state(ServiceState::Stopped);
        Ok(())
    }

    async fn uninstall(&self, service: &str) -> Result<()> {
        self.record(format!("uninstall {}", service))?;
        self.set_state(ServiceState::NotInstalled);
        Ok(())
    }

    async fn start(&self, service: &str) -> Result<ServiceState> {
        self.record(format!("start {}", service))?;
        self.set_state(ServiceState::Running);
        Ok(ServiceState::StartPending)
    }

    async fn stop(&self, service: &str) -> Result<ServiceState> {
        self.record(format!("stop {}", service))?;
        self.set_state(ServiceState::Stopped);
        Ok(ServiceState::StopPending)
    }

    async fn query(&self, service: &str) -> Result<ServiceState> {
        self.record(format!("query {}", service))?;

        let running = self.queries_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_queries_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.query_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.queries_in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.fail_next_query.lock().unwrap().take() {
            return Err(err);
        }
        match self.current() {
            ServiceState::NotInstalled => Err(ObserverError::not_installed(service)),
            state => Ok(state),
        }
    }
}

#[derive(Default)]
pub struct FakeElevator {
    pub relaunched: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Elevator for FakeElevator {
    async fn relaunch(&self, args: &[String]) -> Result<()> {
        self.relaunched.lock().unwrap().push(args.to_vec());
        Ok(())
    }
}

pub fn fast_options() -> CoordinatorOptions {
    CoordinatorOptions {
        settle_delay: Duration::ZERO,
        tail: TailOptions {
            poll_interval: Duration::from_millis(50),
            backlog_bytes: 2048,
        },
        ..CoordinatorOptions::default()
    }
}

pub fn coordinator(
    settings: Vec<ServiceObserverSettings>,
    admin: bool,
    control: Arc<FakeControl>,
) -> (ObserverCoordinator, Arc<FakeElevator>) {
    let elevator = Arc::new(FakeElevator::default());
    let coordinator =
        ObserverCoordinator::new(settings, admin, control, elevator.clone(), fast_options())
            .unwrap();
    (coordinator, elevator)
}

pub fn demo_settings() -> ServiceObserverSettings {
    ServiceObserverSettings::new()
        .with_service_name("Demo")
        .with_executable("/opt/demo/demo")
}

/// Pump until `count` lines are buffered or the timeout expires
pub async fn pump_until(coordinator: &mut ObserverCoordinator, count: usize) {
    for _ in 0..100 {
        coordinator.pump();
        if coordinator.log_text().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

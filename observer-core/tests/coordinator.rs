mod common;

use std::io::Write;
use std::time::Duration;

use observer_core::ObserverError;
use observer_core::ServiceState;
use observer_core::coordinator::{Action, ObserverEvent};

use common::{FakeControl, coordinator, demo_settings, pump_until};

fn append(path: &std::path::Path, text: &str) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

#[tokio::test]
async fn test_mutations_rejected_without_admin() {
    let control = FakeControl::new(ServiceState::Stopped);
    let (mut c, _) = coordinator(vec![demo_settings()], false, control.clone());
    c.load().await.unwrap();
    control.clear_calls();

    for action in [
        Action::Install,
        Action::Uninstall,
        Action::StartService,
        Action::StopService,
    ] {
        assert!(!c.precondition(action));
        let err = c.execute(action).await.unwrap_err();
        assert!(matches!(err, ObserverError::Rejected { .. }), "{:?}", action);
    }
    assert!(control.calls().is_empty());
}

#[tokio::test]
async fn test_state_gates_admin_operations() {
    // Not installed: only install is offered
    let control = FakeControl::new(ServiceState::NotInstalled);
    let (mut c, _) = coordinator(vec![demo_settings()], true, control.clone());
    c.load().await.unwrap();
    control.clear_calls();

    assert!(c.precondition(Action::Install));
    for action in [Action::Uninstall, Action::StartService, Action::StopService] {
        assert!(c.execute(action).await.is_err());
    }
    assert!(control.calls().is_empty());

    // Running: only stop is offered
    control.set_state(ServiceState::Running);
    c.refresh().await.unwrap();
    control.clear_calls();

    assert!(c.precondition(Action::StopService));
    for action in [Action::Install, Action::Uninstall, Action::StartService] {
        assert!(c.execute(action).await.is_err());
    }
    assert!(control.calls().is_empty());
}

#[tokio::test]
async fn test_install_needs_name_and_path() {
    let control = FakeControl::new(ServiceState::NotInstalled);
    let settings = observer_core::ServiceObserverSettings::new().with_service_name("Demo");
    let (mut c, _) = coordinator(vec![settings], true, control.clone());
    c.load().await.unwrap();
    control.clear_calls();

    assert!(matches!(
        c.install().await,
        Err(ObserverError::Rejected { .. })
    ));
    assert!(control.calls().is_empty());
}

#[tokio::test]
async fn test_install_then_uninstall_refreshes() {
    let control = FakeControl::new(ServiceState::NotInstalled);
    let (mut c, _) = coordinator(vec![demo_settings()], true, control.clone());
    c.load().await.unwrap();
    assert!(!c.is_service_installed());
    control.clear_calls();

    c.install().await.unwrap();
    assert_eq!(control.calls(), vec!["install Demo /opt/demo/demo", "query Demo"]);
    assert_eq!(c.state(), ServiceState::Stopped);
    assert!(c.is_service_installed());
    assert!(!c.is_service_running());

    control.clear_calls();
    c.execute(Action::Uninstall).await.unwrap();
    assert_eq!(control.calls(), vec!["uninstall Demo", "query Demo"]);
    assert_eq!(c.state(), ServiceState::NotInstalled);
}

#[tokio::test]
async fn test_start_stop_service_drive_log_tail() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("demo.log");
    std::fs::write(&log, "").unwrap();

    let control = FakeControl::new(ServiceState::Stopped);
    let settings = demo_settings().with_log_path(&log);
    let (mut c, _) = coordinator(vec![settings], true, control.clone());
    c.load().await.unwrap();
    c.stop_observing_log().await.unwrap();
    control.clear_calls();

    c.start_service().await.unwrap();
    assert_eq!(control.calls(), vec!["start Demo", "query Demo"]);
    assert_eq!(c.state(), ServiceState::Running);
    assert!(c.is_observing_log());

    append(&log, "service up\n");
    pump_until(&mut c, 1).await;
    assert_eq!(c.log_text()[0].text, "service up");

    control.clear_calls();
    c.stop_service().await.unwrap();
    assert_eq!(control.calls(), vec!["stop Demo", "query Demo"]);
    assert_eq!(c.state(), ServiceState::Stopped);
    assert!(!c.is_observing_log());
}

#[tokio::test]
async fn test_failed_start_still_refreshes() {
    let control = FakeControl::new(ServiceState::Stopped);
    let (mut c, _) = coordinator(vec![demo_settings()], true, control.clone());
    c.load().await.unwrap();
    control.clear_calls();

    control.fail_next(ObserverError::ServiceControl {
        message: "[SC] StartService FAILED 1053".into(),
        code: 1053,
    });
    let err = c.start_service().await.unwrap_err();
    assert!(matches!(err, ObserverError::ServiceControl { code: 1053, .. }));
    assert_eq!(control.calls(), vec!["start Demo", "query Demo"]);
    assert_eq!(c.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn test_stop_closes_tail_when_refresh_fails() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("demo.log");
    std::fs::write(&log, "").unwrap();

    let control = FakeControl::new(ServiceState::Running);
    let (mut c, _) = coordinator(vec![demo_settings().with_log_path(&log)], true, control.clone());
    c.load().await.unwrap();
    assert!(c.is_observing_log());
    control.clear_calls();

    control.fail_next_query(ObserverError::ServiceControl {
        message: "[SC] OpenService FAILED 5: Access is denied.".into(),
        code: 5,
    });
    let err = c.stop_service().await.unwrap_err();
    assert!(matches!(err, ObserverError::ServiceControl { code: 5, .. }));
    assert_eq!(control.calls(), vec!["stop Demo", "query Demo"]);
    assert!(!c.is_observing_log());
}

#[tokio::test]
async fn test_failed_stop_keeps_tail() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("demo.log");
    std::fs::write(&log, "").unwrap();

    let control = FakeControl::new(ServiceState::Running);
    let (mut c, _) = coordinator(vec![demo_settings().with_log_path(&log)], true, control.clone());
    c.load().await.unwrap();

    control.fail_next(ObserverError::ServiceControl {
        message: "[SC] ControlService FAILED 1061".into(),
        code: 1061,
    });
    assert!(c.stop_service().await.is_err());
    assert_eq!(c.state(), ServiceState::Running);
    assert!(c.is_observing_log());
    c.shutdown().await;
}

#[tokio::test]
async fn test_refresh_absorbs_not_installed() {
    let control = FakeControl::new(ServiceState::Running);
    let (mut c, _) = coordinator(vec![demo_settings()], true, control.clone());
    c.load().await.unwrap();
    assert!(c.is_service_running());

    control.set_state(ServiceState::NotInstalled);
    c.refresh().await.unwrap();
    assert_eq!(c.state(), ServiceState::NotInstalled);
    assert!(!c.is_service_installed());
    assert!(!c.is_service_running());
}

#[tokio::test]
async fn test_refresh_requires_name() {
    let control = FakeControl::new(ServiceState::Stopped);
    let settings = observer_core::ServiceObserverSettings::new().with_log_path("/tmp/x.log");
    let (mut c, _) = coordinator(vec![settings], true, control.clone());

    assert!(!c.precondition(Action::Refresh));
    assert!(c.refresh().await.is_err());
    assert!(control.calls().is_empty());
}

#[tokio::test]
async fn test_missing_log_file_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let control = FakeControl::new(ServiceState::Stopped);
    let settings = demo_settings().with_log_path(dir.path().join("not-yet.log"));
    let (mut c, _) = coordinator(vec![settings], true, control);

    c.load().await.unwrap();
    assert!(!c.is_observing_log());
    c.start_observing_log().unwrap();
    assert!(!c.is_observing_log());
}

#[tokio::test]
async fn test_stop_observing_appends_nothing_afterwards() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("demo.log");
    std::fs::write(&log, "").unwrap();

    let control = FakeControl::new(ServiceState::Stopped);
    let (mut c, _) = coordinator(vec![demo_settings().with_log_path(&log)], true, control);
    c.load().await.unwrap();

    for i in 0..3 {
        append(&log, &format!("entry {}\n", i));
        tokio::time::sleep(Duration::from_millis(80)).await;
    }
    pump_until(&mut c, 3).await;
    c.stop_observing_log().await.unwrap();
    let after_stop = c.log_text().len();
    assert_eq!(after_stop, 3);

    append(&log, "late entry\n");
    tokio::time::sleep(Duration::from_millis(200)).await;
    c.pump();
    assert_eq!(c.log_text().len(), after_stop);
    assert!(!c.is_observing_log());
}

#[tokio::test]
async fn test_clear_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("demo.log");
    std::fs::write(&log, "one\ntwo\n").unwrap();

    let control = FakeControl::new(ServiceState::Stopped);
    let (mut c, _) = coordinator(vec![demo_settings().with_log_path(&log)], true, control);
    let mut events = c.subscribe();
    c.load().await.unwrap();
    pump_until(&mut c, 2).await;

    assert!(c.precondition(Action::ClearLog));
    c.clear_log().unwrap();
    assert!(c.log_text().is_empty());
    assert!(!c.precondition(Action::ClearLog));

    let mut saw_clear = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ObserverEvent::LogCleared) {
            saw_clear = true;
        }
    }
    assert!(saw_clear);
    c.shutdown().await;
}

#[tokio::test]
async fn test_restart_elevated_passes_settings() {
    let control = FakeControl::new(ServiceState::Stopped);
    let settings = demo_settings()
        .with_executable_args("--console")
        .with_log_path("/var/log/demo.log");
    let (mut c, elevator) = coordinator(vec![settings.clone()], false, control);
    let mut events = c.subscribe();

    c.restart_elevated().await.unwrap();

    let relaunched = elevator.relaunched.lock().unwrap().clone();
    assert_eq!(relaunched, vec![settings.to_args()]);
    assert_eq!(
        observer_core::ServiceObserverSettings::from_args(&relaunched[0]),
        settings
    );

    let mut exit_requested = false;
    while let Ok(event) = events.try_recv() {
        exit_requested |= matches!(event, ObserverEvent::ExitRequested);
    }
    assert!(exit_requested);
}

#[tokio::test]
async fn test_restart_elevated_rejected_in_admin_mode() {
    let control = FakeControl::new(ServiceState::Stopped);
    let (mut c, elevator) = coordinator(vec![demo_settings()], true, control);

    assert!(c.restart_elevated().await.is_err());
    assert!(elevator.relaunched.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_select_switches_settings() {
    let dir = tempfile::tempdir().unwrap();
    let first_log = dir.path().join("first.log");
    let second_log = dir.path().join("second.log");
    std::fs::write(&first_log, "first line\n").unwrap();
    std::fs::write(&second_log, "").unwrap();

    let control = FakeControl::new(ServiceState::Stopped);
    let first = demo_settings().with_log_path(&first_log);
    let second = observer_core::ServiceObserverSettings::new()
        .with_service_name("Other")
        .with_log_path(&second_log);
    let (mut c, _) = coordinator(vec![first, second], true, control.clone());

    c.load().await.unwrap();
    pump_until(&mut c, 1).await;
    assert_eq!(c.log_text().len(), 1);
    control.clear_calls();

    c.select(1).await.unwrap();
    assert_eq!(c.loaded_settings().service_name.as_deref(), Some("Other"));
    assert!(c.log_text().is_empty());
    assert!(c.is_observing_log());
    assert_eq!(control.calls(), vec!["query Other"]);
    assert_eq!(c.title(), "Observer: Other (Administrator)");

    assert!(c.select(7).await.is_err());
    c.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_standalone_blocks_service_start() {
    let control = FakeControl::new(ServiceState::Stopped);
    let settings = observer_core::ServiceObserverSettings::new()
        .with_service_name("Demo")
        .with_executable("sleep")
        .with_executable_args("30");
    let (mut c, _) = coordinator(vec![settings], true, control.clone());
    c.load().await.unwrap();

    c.start_standalone().unwrap();
    assert!(c.is_standalone_running());
    assert!(!c.precondition(Action::StartStandalone));
    assert!(!c.precondition(Action::Install));

    control.clear_calls();
    assert!(c.start_service().await.is_err());
    assert!(control.mutating_calls().is_empty());

    c.stop_standalone().await.unwrap();
    assert!(!c.is_standalone_running());
    assert!(c.precondition(Action::StartService));
}

#[cfg(unix)]
#[tokio::test]
async fn test_standalone_rejected_while_service_runs() {
    let control = FakeControl::new(ServiceState::Running);
    let settings = observer_core::ServiceObserverSettings::new()
        .with_service_name("Demo")
        .with_executable("sleep");
    let (mut c, _) = coordinator(vec![settings], true, control);
    c.load().await.unwrap();

    assert!(matches!(
        c.start_standalone(),
        Err(ObserverError::Rejected { .. })
    ));
    assert!(!c.is_standalone_running());
}

#[tokio::test]
async fn test_standalone_launch_failure_surfaces() {
    let control = FakeControl::new(ServiceState::NotInstalled);
    let settings = observer_core::ServiceObserverSettings::new()
        .with_executable("/nonexistent/demo-binary");
    let (mut c, _) = coordinator(vec![settings], false, control);

    assert!(matches!(
        c.start_standalone(),
        Err(ObserverError::ProcessLaunch { .. })
    ));
    assert!(!c.is_standalone_running());
}

#[tokio::test]
async fn test_actions_listing_matches_preconditions() {
    let control = FakeControl::new(ServiceState::Stopped);
    let (mut c, _) = coordinator(vec![demo_settings()], true, control);
    c.load().await.unwrap();

    let actions = c.actions();
    assert_eq!(actions.len(), Action::ALL.len());
    for info in actions {
        assert_eq!(info.enabled, c.precondition(info.action), "{}", info.name);
    }
    let enabled: Vec<_> = c.actions().into_iter().filter(|a| a.enabled).map(|a| a.action).collect();
    assert!(enabled.contains(&Action::StartService));
    assert!(enabled.contains(&Action::Uninstall));
    assert!(enabled.contains(&Action::StartStandalone));
    assert!(!enabled.contains(&Action::StopService));
}

//! Line-oriented front end for one coordinator

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use observer_core::ObserverError;
use observer_core::config::ObserverConfig;
use observer_core::control::ServiceControl;
use observer_core::coordinator::{Action, ObserverCoordinator, ObserverEvent, Snapshot};
use observer_core::error::error_chain;
use observer_core::log_line::{Level, LogLine};

use crate::privilege::SystemElevator;

const PUMP_INTERVAL: Duration = Duration::from_millis(200);
const STALL_REPORT_SECS: u64 = 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Run(Action),
    Select(usize),
    Actions,
    State,
    Help,
    Quit,
}

pub fn parse_command(input: &str) -> Result<ConsoleCommand, String> {
    let mut words = input.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command".to_string());
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "start" => ConsoleCommand::Run(Action::StartService),
        "stop" => ConsoleCommand::Run(Action::StopService),
        "install" => ConsoleCommand::Run(Action::Install),
        "uninstall" => ConsoleCommand::Run(Action::Uninstall),
        "run" => ConsoleCommand::Run(Action::StartStandalone),
        "kill" => ConsoleCommand::Run(Action::StopStandalone),
        "refresh" => ConsoleCommand::Run(Action::Refresh),
        "tail" => ConsoleCommand::Run(Action::StartObservingLog),
        "untail" => ConsoleCommand::Run(Action::StopObservingLog),
        "clear" => ConsoleCommand::Run(Action::ClearLog),
        "elevate" => ConsoleCommand::Run(Action::RestartElevated),
        "select" => {
            let index = words
                .next()
                .ok_or("usage: select N")?
                .parse::<usize>()
                .map_err(|_| "select expects a number".to_string())?;
            if index == 0 {
                return Err("settings are numbered from 1".to_string());
            }
            ConsoleCommand::Select(index - 1)
        }
        "actions" => ConsoleCommand::Actions,
        "state" | "status" => ConsoleCommand::State,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };

    if words.next().is_some() && !matches!(command, ConsoleCommand::Select(_)) {
        return Err(format!("'{}' takes no arguments", verb));
    }
    Ok(command)
}

pub async fn run_console(
    config: ObserverConfig,
    control: Arc<dyn ServiceControl>,
    admin_mode: bool,
) -> Result<(), String> {
    let elevator = SystemElevator::current().map_err(|e| e.to_string())?;
    let mut coordinator = ObserverCoordinator::new(
        config.services,
        admin_mode,
        control,
        Arc::new(elevator),
        config.options.coordinator_options(),
    )
    .map_err(|e| e.to_string())?;

    let mut events = coordinator.subscribe();
    if let Err(e) = coordinator.load().await {
        eprintln!("Load failed: {}", error_chain(&e));
    }

    let mut view = ConsoleView::default();
    print_help();
    print_settings(&coordinator);
    view.render_state(&coordinator.snapshot());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,

            _ = ticker.tick() => {
                coordinator.pump();
            }

            event = events.recv() => match event {
                Ok(ObserverEvent::ExitRequested) => break,
                Ok(event) => view.render(event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "console fell behind"),
                Err(RecvError::Closed) => break,
            },

            line = stdin.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let quit = handle_line(&mut coordinator, &line).await;
                    if quit {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    coordinator.shutdown().await;
                    return Err(format!("stdin: {}", e));
                }
            },
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

/// Returns true when the console should quit
async fn handle_line(coordinator: &mut ObserverCoordinator, line: &str) -> bool {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(message) => {
            println!("{}", message);
            return false;
        }
    };

    let result = match command {
        ConsoleCommand::Quit => return true,
        ConsoleCommand::Help => {
            print_help();
            Ok(())
        }
        ConsoleCommand::Actions => {
            print_actions(coordinator);
            Ok(())
        }
        ConsoleCommand::State => {
            print_state(&coordinator.snapshot());
            Ok(())
        }
        ConsoleCommand::Select(index) => coordinator.select(index).await,
        ConsoleCommand::Run(action) => coordinator.execute(action).await,
    };

    match result {
        Ok(()) => {}
        Err(ObserverError::Rejected { action }) => {
            println!("'{}' is not available right now (see 'actions')", action);
        }
        Err(e) => eprintln!("Error: {}", error_chain(&e)),
    }
    false
}

#[derive(Default)]
struct ConsoleView {
    last_status: Option<String>,
}

impl ConsoleView {
    fn render(&mut self, event: ObserverEvent) {
        match event {
            ObserverEvent::StateChanged(snapshot) => self.render_state(&snapshot),
            ObserverEvent::LogAppended(line) => println!("{}", format_log_line(&line)),
            ObserverEvent::LogCleared => println!("-- log cleared --"),
            ObserverEvent::Heartbeat { unchanged_secs } => {
                if unchanged_secs > 0 && unchanged_secs % STALL_REPORT_SECS == 0 {
                    println!("-- log unchanged for {}s --", unchanged_secs);
                }
            }
            ObserverEvent::ExitRequested => {}
        }
    }

    fn render_state(&mut self, snapshot: &Snapshot) {
        let status = status_line(snapshot);
        if self.last_status.as_deref() != Some(status.as_str()) {
            println!("{}", status);
            self.last_status = Some(status);
        }
    }
}

fn status_line(snapshot: &Snapshot) -> String {
    format!(
        "[{}] service: {} | standalone: {} | log: {}",
        snapshot.title,
        snapshot.state,
        if snapshot.standalone_running { "running" } else { "stopped" },
        if snapshot.observing_log { "tailing" } else { "idle" },
    )
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Trace | Level::Debug => "\x1b[90m",
        Level::Info => "\x1b[0m",
        Level::Warn => "\x1b[33m",
        Level::Error => "\x1b[31m",
        Level::Critical => "\x1b[1;31m",
    }
}

fn format_log_line(line: &LogLine) -> String {
    let reset = "\x1b[0m";
    let stamp = line
        .timestamp
        .map(|ts| format!("{} ", ts.format("%H:%M:%S%.3f")))
        .unwrap_or_default();

    format!(
        "{}{}{:<5} {}{}",
        level_color(line.level()),
        stamp,
        line.level().to_string(),
        line.text,
        reset
    )
}

fn print_help() {
    println!("Commands:");
    println!("  start | stop | install | uninstall   service control");
    println!("  run | kill                           standalone executable");
    println!("  tail | untail | clear                log observation");
    println!("  refresh | elevate | select N         state, privilege, settings");
    println!("  actions | state | help | quit");
    println!();
}

fn print_settings(coordinator: &ObserverCoordinator) {
    let available = coordinator.available_settings();
    if available.len() < 2 {
        return;
    }
    println!("Settings:");
    for (i, settings) in available.iter().enumerate() {
        let marker = if settings == coordinator.loaded_settings() { "*" } else { " " };
        println!("  {}{} {}", marker, i + 1, settings.display_name());
    }
    println!();
}

fn print_actions(coordinator: &ObserverCoordinator) {
    for info in coordinator.actions() {
        let icon = if info.enabled { "\x1b[32m✓\x1b[0m" } else { "\x1b[90m·\x1b[0m" };
        println!("  {} {}", icon, info.name);
    }
}

fn print_state(snapshot: &Snapshot) {
    println!("{}", snapshot.title);
    println!("  service:    {}", snapshot.state);
    println!("  installed:  {}", snapshot.installed);
    println!("  running:    {}", snapshot.running);
    println!("  standalone: {}", snapshot.standalone_running);
    println!("  tailing:    {}", snapshot.observing_log);
    println!("  unchanged:  {}s", snapshot.unchanged_secs);
    println!("  log lines:  {}", snapshot.log_len);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_words() {
        assert_eq!(
            parse_command("start"),
            Ok(ConsoleCommand::Run(Action::StartService))
        );
        assert_eq!(
            parse_command("  KILL "),
            Ok(ConsoleCommand::Run(Action::StopStandalone))
        );
        assert_eq!(
            parse_command("untail"),
            Ok(ConsoleCommand::Run(Action::StopObservingLog))
        );
        assert_eq!(
            parse_command("elevate"),
            Ok(ConsoleCommand::Run(Action::RestartElevated))
        );
        assert_eq!(parse_command("q"), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn test_parse_select_is_one_based() {
        assert_eq!(parse_command("select 2"), Ok(ConsoleCommand::Select(1)));
        assert!(parse_command("select 0").is_err());
        assert!(parse_command("select").is_err());
        assert!(parse_command("select two").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_and_extra_words() {
        assert!(parse_command("restart").is_err());
        assert!(parse_command("start now").is_err());
        assert!(parse_command("").is_err());
    }

    #[test]
    fn test_status_line_reports_flags() {
        let snapshot = Snapshot {
            title: "Observer: Demo".into(),
            settings: Default::default(),
            state: observer_core::ServiceState::Running,
            admin_mode: false,
            installed: true,
            running: true,
            standalone_running: false,
            observing_log: true,
            unchanged_secs: 0,
            log_len: 0,
        };
        assert_eq!(
            status_line(&snapshot),
            "[Observer: Demo] service: running | standalone: stopped | log: tailing"
        );
    }
}

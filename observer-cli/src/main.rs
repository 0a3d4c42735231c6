mod commands;
mod privilege;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use observer_core::ServiceObserverSettings;
use observer_core::config::{ConfigError, ObserverConfig};
use observer_core::control::{ScControl, ServiceControl};
use observer_core::coordinator::Elevator;
use observer_core::error::error_chain;

use privilege::SystemElevator;

const LOG_ENV: &str = "OBSERVER_LOG";
const DEFAULT_LOG_FILTER: &str = "observer_core=info,service_observer=info,warn";
const VERBOSE_LOG_FILTER: &str = "observer_core=debug,service_observer=debug,info";

#[derive(Parser, Debug)]
#[command(name = "service-observer")]
#[command(about = "Control a background service, run it standalone and tail its log", long_about = None)]
struct Cli {
    /// Service name as known to the service controller
    #[arg(short = 'n', long = "name", global = true)]
    name: Option<String>,

    /// Executable path, optionally followed by its arguments ("PATH ARGS")
    #[arg(short = 'e', long = "executable", global = true, allow_hyphen_values = true)]
    executable: Option<String>,

    /// Log file to tail
    #[arg(short = 'l', long = "log", global = true)]
    log: Option<PathBuf>,

    /// Start with administrator privilege, relaunching elevated if needed
    #[arg(short = 'a', long = "admin", global = true)]
    admin: bool,

    /// Start in the background poller instead of the console
    #[arg(short = 'm', long = "minimized")]
    minimized: bool,

    /// Config file to load instead of searching for observer.yaml
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Commands {
    /// Interactive console driving the loaded service (default)
    Console,
    /// Query every configured service once
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Poll every configured service and print transitions
    Poll,
    /// Check the environment and configuration
    Doctor,
}

impl Cli {
    fn settings_from_flags(&self) -> ServiceObserverSettings {
        let mut args: Vec<String> = Vec::new();
        if let Some(name) = &self.name {
            args.extend(["-n".to_string(), name.clone()]);
        }
        if let Some(executable) = &self.executable {
            args.extend(["-e".to_string(), executable.clone()]);
        }
        if let Some(log) = &self.log {
            args.extend(["-l".to_string(), log.to_string_lossy().into_owned()]);
        }
        ServiceObserverSettings::from_args(&args)
    }

    fn resolved_command(&self) -> Commands {
        match &self.command {
            Some(command) => command.clone(),
            None if self.minimized => Commands::Poll,
            None => Commands::Console,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Flags name the settings set when given; a config file still supplies options.
fn load_config(cli: &Cli) -> Result<(Option<PathBuf>, ObserverConfig), String> {
    let found = match &cli.config {
        Some(path) => {
            let config = ObserverConfig::load(path)
                .map_err(|e| format!("{}: {}", path.display(), error_chain(&e)))?;
            Some((path.clone(), config))
        }
        None => {
            let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
            match ObserverConfig::discover(&cwd) {
                Ok(found) => Some(found),
                Err(ConfigError::NotFound { .. }) => None,
                Err(e) => return Err(error_chain(&e)),
            }
        }
    };

    let flags = cli.settings_from_flags();
    match found {
        Some((path, mut config)) => {
            if flags.is_meaningful() {
                config.services = vec![flags];
            }
            Ok((Some(path), config))
        }
        None if flags.is_meaningful() => Ok((None, ObserverConfig::single(flags))),
        None => Err("no observer.yaml found; pass -n NAME and/or -l LOG".to_string()),
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loaded = load_config(&cli);
    let admin_mode = privilege::is_elevated();

    let result = match cli.resolved_command() {
        Commands::Doctor => commands::run_doctor(&loaded, admin_mode).await,
        command => run_observer(&cli, command, loaded, admin_mode).await,
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_observer(
    cli: &Cli,
    command: Commands,
    loaded: Result<(Option<PathBuf>, ObserverConfig), String>,
    admin_mode: bool,
) -> Result<(), String> {
    let (config_path, config) = loaded?;
    if let Some(path) = &config_path {
        tracing::info!(path = %path.display(), "loaded config");
    }

    if cli.admin && !admin_mode {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let elevator = SystemElevator::current().map_err(|e| e.to_string())?;
        return elevator
            .relaunch(&args)
            .await
            .map_err(|e| error_chain(&e));
    }

    let control: Arc<dyn ServiceControl> =
        Arc::new(ScControl::with_program(&config.options.control_program));

    match command {
        Commands::Status { json } => commands::run_status(&config, control, json).await,
        Commands::Poll => commands::run_poll(&config, control).await,
        _ => commands::run_console(config, control, admin_mode).await,
    }
}

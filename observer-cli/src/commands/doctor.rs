use std::path::{Path, PathBuf};

use observer_core::ServiceObserverSettings;
use observer_core::config::{ObserverConfig, ObserverOptions};
use observer_core::control::{ScControl, ServiceControl};

#[derive(Debug)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub hint: Option<String>,
}

impl Check {
    fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            hint: None,
        }
    }

    fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            hint: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

pub async fn run_doctor(
    loaded: &Result<(Option<PathBuf>, ObserverConfig), String>,
    admin_mode: bool,
) -> Result<(), String> {
    println!("Service Observer Doctor\n");

    let default_options = ObserverOptions::default();
    let options = match loaded {
        Ok((_, config)) => &config.options,
        Err(_) => &default_options,
    };

    let mut checks: Vec<Check> = Vec::new();
    let mut warnings: Vec<Check> = Vec::new();

    // === Environment ===
    println!("Environment:");
    checks.push(check_control_program(&options.control_program));
    checks.push(check_admin(admin_mode));
    for check in &checks {
        print_check(check);
    }
    println!();

    // === Configuration ===
    match loaded {
        Ok((path, config)) => {
            match path {
                Some(path) => println!("Configuration: {}", path.display()),
                None => println!("Configuration: command-line flags"),
            }
            println!();

            let control = ScControl::with_program(&options.control_program);
            for (i, settings) in config.services.iter().enumerate() {
                println!("Settings #{} ({}):", i + 1, settings.display_name());
                for check in check_settings(&control, settings).await {
                    print_check(&check);
                    if !check.passed {
                        warnings.push(check);
                    }
                }
                println!();
            }
        }
        Err(e) => {
            let check = Check::fail("Configuration", e.clone())
                .with_hint("Create observer.yaml or pass -n NAME / -l LOG");
            print_check(&check);
            println!();
            checks.push(check);
        }
    }

    // === Summary ===
    let failed: Vec<_> = checks.iter().filter(|c| !c.passed).collect();
    if failed.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    } else {
        if !failed.is_empty() {
            println!("Issues found:");
            for check in &failed {
                println!("  - {}: {}", check.name, check.message);
                if let Some(hint) = &check.hint {
                    println!("    Hint: {}", hint);
                }
            }
        }
        if !warnings.is_empty() {
            println!("\nWarnings: {} issue(s) with settings", warnings.len());
        }
    }

    Ok(())
}

fn print_check(check: &Check) {
    let icon = if check.passed { "✓" } else { "✗" };
    let color = if check.passed { "\x1b[32m" } else { "\x1b[31m" };
    let reset = "\x1b[0m";

    println!(
        "  {}{}{} {}: {}",
        color, icon, reset, check.name, check.message
    );

    if let Some(hint) = &check.hint {
        println!("    └─ {}", hint);
    }
}

fn check_control_program(program: &Path) -> Check {
    match resolve_executable(program) {
        Some(found) => Check::ok("Service control", found.display().to_string()),
        None => Check::fail(
            "Service control",
            format!("{} not found", program.display()),
        )
        .with_hint("Set options.control_program in observer.yaml"),
    }
}

fn check_admin(admin_mode: bool) -> Check {
    if admin_mode {
        Check::ok("Administrator", "yes")
    } else {
        Check::fail("Administrator", "no, install/uninstall/start/stop are unavailable")
            .with_hint("Run with -a to relaunch elevated")
    }
}

async fn check_settings(control: &dyn ServiceControl, settings: &ServiceObserverSettings) -> Vec<Check> {
    let mut checks = Vec::new();

    if let Some(name) = &settings.service_name {
        match control.query(name).await {
            Ok(state) => checks.push(Check::ok("Service", format!("{} ({})", name, state))),
            Err(e) if e.is_not_installed() => checks.push(
                Check::ok("Service", format!("{} (not installed)", name)),
            ),
            Err(e) => checks.push(Check::fail("Service", e.to_string())),
        }
    }

    if let Some(executable) = &settings.executable_path {
        match resolve_executable(executable) {
            Some(found) => checks.push(Check::ok("Executable", found.display().to_string())),
            None => checks.push(
                Check::fail("Executable", format!("{} not found", executable.display()))
                    .with_hint("Standalone runs and install need an existing binary"),
            ),
        }
    }

    if let Some(log) = &settings.log_path {
        if log.is_file() {
            checks.push(Check::ok("Log", log.display().to_string()));
        } else {
            checks.push(
                Check::fail("Log", format!("{} does not exist yet", log.display()))
                    .with_hint("Tailing starts once the file is created and observation is restarted"),
            );
        }
    }

    checks
}

/// Path as given when it names a file, otherwise looked up on `PATH` for bare names
fn resolve_executable(program: &Path) -> Option<PathBuf> {
    if program.is_file() {
        return Some(program.to_path_buf());
    }
    if program.components().count() != 1 {
        return None;
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("demo");
        std::fs::write(&exe, "").unwrap();

        assert_eq!(resolve_executable(&exe), Some(exe.clone()));
        assert_eq!(resolve_executable(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_resolve_missing_bare_name() {
        assert_eq!(
            resolve_executable(Path::new("definitely-not-an-installed-program-4242")),
            None
        );
    }

    #[test]
    fn test_admin_check_hints_relaunch() {
        assert!(check_admin(true).passed);
        let check = check_admin(false);
        assert!(!check.passed);
        assert!(check.hint.unwrap().contains("-a"));
    }
}

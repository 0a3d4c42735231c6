use std::sync::Arc;

use observer_core::ServiceStateEntry;
use observer_core::config::ObserverConfig;
use observer_core::control::ServiceControl;
use observer_core::error::error_chain;
use observer_core::poller::ServicePoller;

pub async fn run_status(
    config: &ObserverConfig,
    control: Arc<dyn ServiceControl>,
    json: bool,
) -> Result<(), String> {
    let mut poller = ServicePoller::new(control);
    poller
        .init(&config.services)
        .await
        .map_err(|e| error_chain(&e))?;

    if json {
        let rendered =
            serde_json::to_string_pretty(poller.entries()).map_err(|e| e.to_string())?;
        println!("{}", rendered);
    } else if poller.entries().is_empty() {
        println!("No named services configured");
    } else {
        print!("{}", render_table(poller.entries()));
    }

    Ok(())
}

fn render_table(entries: &[ServiceStateEntry]) -> String {
    let width = entries
        .iter()
        .map(|e| e.service_name().unwrap_or("-").len())
        .max()
        .unwrap_or(0)
        .max("SERVICE".len());

    let mut out = format!("{:<width$}  STATE\n", "SERVICE", width = width);
    for entry in entries {
        out.push_str(&format!(
            "{:<width$}  {}\n",
            entry.service_name().unwrap_or("-"),
            entry.state,
            width = width
        ));
    }
    out
}

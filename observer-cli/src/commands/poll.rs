use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use observer_core::config::ObserverConfig;
use observer_core::control::ServiceControl;
use observer_core::error::error_chain;
use observer_core::poller::{PollerEvent, ServicePoller};

/// Tray-level overview: print every state transition until Ctrl-C
pub async fn run_poll(config: &ObserverConfig, control: Arc<dyn ServiceControl>) -> Result<(), String> {
    let mut poller = ServicePoller::new(control).with_interval(config.options.poll_interval());
    poller
        .init(&config.services)
        .await
        .map_err(|e| error_chain(&e))?;

    if poller.entries().is_empty() {
        return Err("no named services configured".to_string());
    }
    for entry in poller.entries() {
        println!("{}: {}", entry.service_name().unwrap_or("-"), entry.state);
    }

    let (event_tx, mut event_rx) = broadcast::channel(64);
    let cancel = CancellationToken::new();
    let worker = {
        let cancel = cancel.clone();
        tokio::spawn(async move { poller.run(cancel, event_tx).await })
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = event_rx.recv() => match event {
                Ok(PollerEvent::StateChanged { entry, .. }) => {
                    println!("{}: {}", entry.service_name().unwrap_or("-"), entry.state);
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "poll output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    worker.await.map_err(|e| e.to_string())
}

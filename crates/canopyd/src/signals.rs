//! Termination signal routing.
//!
//! SIGINT, SIGTERM and SIGQUIT all funnel into one shutdown request
//! channel. Delivery interrupts the scheduler's idle wait immediately;
//! the daemon never waits for the next tick boundary to die.

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::info;

/// Spawn one listener task per termination signal. Each received signal
/// sends the signal's name on `trigger`; registration failures surface at
/// boot rather than being discovered at the first real signal.
pub fn spawn_signal_listeners(trigger: mpsc::Sender<&'static str>) -> Result<()> {
    let kinds = [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::quit(), "SIGQUIT"),
    ];

    for (kind, name) in kinds {
        let mut stream = signal(kind)?;
        let tx = trigger.clone();
        tokio::spawn(async move {
            loop {
                if stream.recv().await.is_none() {
                    return;
                }
                info!("[SIGNAL] {} received, requesting shutdown", name);
                let _ = tx.send(name).await;
            }
        });
    }

    Ok(())
}

//! Periodic reconciliation: self-healing re-application of desired state.
//!
//! The apply loop pushes the full model to hardware on a fixed cadence
//! whether or not anything changed; a stuck relay or external interference
//! is healed within one tick at the cost of an idempotent bus transaction
//! per output. A slower audit loop dumps the complete state for log
//! searchability, independent of change.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::info;

use crate::context::{ControlContext, ControlPlane};

pub async fn run_apply_loop(ctx: Arc<ControlContext>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(ctx.config.apply_interval_secs));
    ticker.tick().await; // first tick completes immediately

    info!(
        "[RECONCILE] apply loop running ({}s cadence)",
        ctx.config.apply_interval_secs
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut plane = ctx.plane.lock().await;
                let ControlPlane { model, driver } = &mut *plane;
                model.apply(driver, false).await;
            }
            _ = shutdown.changed() => {
                info!("[RECONCILE] apply loop stopped");
                return;
            }
        }
    }
}

pub async fn run_audit_loop(ctx: Arc<ControlContext>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(ctx.config.audit_interval_secs));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let plane = ctx.plane.lock().await;
                info!("[AUDIT] {}", plane.model.dump());
            }
            _ = shutdown.changed() => {
                info!("[RECONCILE] audit loop stopped");
                return;
            }
        }
    }
}

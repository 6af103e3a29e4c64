//! Canopy daemon - keeps greenhouse relays converged with the schedule.
//!
//! Boot order matters: instance lock before any hardware access, actuator
//! bring-up, catch-up replay of today's schedule, then steady-state
//! ticking until a termination signal runs the idempotent off-sequence.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use canopy_common::config::load_config;
use canopy_common::outputs::BANK_WIDTH;
use canopy_common::paths;
use canopy_common::schedule::ScheduleTable;
use canopyd::actuator::ActuatorDriver;
use canopyd::bus::MemoryBus;
use canopyd::catchup;
use canopyd::context::{ControlContext, ControlPlane};
use canopyd::guard::{InstanceLock, ShutdownController};
use canopyd::model::DesiredStateModel;
use canopyd::reconcile;
use canopyd::registry::OutputRegistry;
use canopyd::scheduler::ScheduleEngine;
use canopyd::signals;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("[BOOT] canopyd v{} starting", canopy_common::VERSION);

    let config = load_config(&paths::config_path());

    // Exclusive lock first: two daemons on one bus is unsafe, so this is
    // the one failure that terminates the process before touching hardware.
    let lock = match InstanceLock::acquire(&config.lock_path, Duration::from_millis(config.lock_wait_ms)) {
        Ok(lock) => lock,
        Err(e) => {
            error!("[FATAL] {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(OutputRegistry::from_config(&config).context("invalid output wiring")?);
    let table = Arc::new(ScheduleTable::new(config.schedule.clone()).context("invalid schedule table")?);
    info!(
        "[BOOT] {} output(s) across {} bank(s) of {} lines, {} schedule entries",
        registry.len(),
        config.banks.len(),
        BANK_WIDTH,
        table.len()
    );

    // Real transports implement OutputBus out of tree; the in-tree bus is
    // the recording simulation.
    let bus = MemoryBus::new();
    let mut driver = ActuatorDriver::new(Box::new(bus), registry.clone(), &config);
    let faults = driver.initialize().await;
    if !faults.is_empty() {
        warn!(
            "[BOOT] {} output(s) recorded SAFETY_FAULT during bring-up",
            faults.len()
        );
    }

    let model = DesiredStateModel::all_off(&registry);
    let ctx = Arc::new(ControlContext::new(
        config,
        registry,
        table,
        model,
        driver,
    ));

    // Replay everything that should already have fired today, then push
    // the converged state so hardware is right before the first tick.
    let replayed = {
        let mut plane = ctx.plane.lock().await;
        let ControlPlane { model, driver } = &mut *plane;
        catchup::replay(&ctx.table, &ctx.registry, model, driver, Utc::now()).await
    };

    let engine = ScheduleEngine::with_replayed(ctx.table.clone(), replayed);
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(engine.run(ctx.clone(), stop_rx.clone()));
    tokio::spawn(reconcile::run_apply_loop(ctx.clone(), stop_rx.clone()));
    tokio::spawn(reconcile::run_audit_loop(ctx.clone(), stop_rx));

    let (sig_tx, mut sig_rx) = mpsc::channel(4);
    signals::spawn_signal_listeners(sig_tx)?;

    info!("[READY] canopyd operational");

    // Park until the first termination signal.
    sig_rx.recv().await;

    let controller = ShutdownController::new();
    if controller.shutdown(&ctx, &stop_tx).await {
        drop(lock);
    }
    info!("[SHUTDOWN] complete");
    Ok(())
}

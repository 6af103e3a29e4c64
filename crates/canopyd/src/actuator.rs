//! Actuator driver: the only code that touches the bus.
//!
//! Responsibilities:
//! - bank registration and per-pin bring-up (ACTIVE mode, OFF, read-back)
//! - polarity mapping, resolved once from configuration
//! - self-healing writes: a pin observed outside ACTIVE mode is forced
//!   back before the value write proceeds
//! - failsafe shutdown: every output OFF, then every pin to SAFE mode
//!
//! Per-output state machine: UNINITIALIZED -> ACTIVE,OFF <-> ACTIVE,ON ->
//! SAFE,OFF (terminal). Bus faults are recovered at the point of use and
//! surface only in the log stream; a frozen relay is worse than a warning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use canopy_common::config::{BankConfig, CanopyConfig};
use canopy_common::error::CanopyError;
use canopy_common::outputs::{OutputId, OutputState, PinAddress, PinMode};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::bus::OutputBus;
use crate::registry::OutputRegistry;

/// Electrical levels for ON/OFF, fixed per deployment.
#[derive(Debug, Clone, Copy)]
struct Polarity {
    on_level: u8,
    off_level: u8,
}

impl Polarity {
    fn from_active_low(active_low: bool) -> Self {
        if active_low {
            // Level 0 energizes the relay coil.
            Self { on_level: 0, off_level: 1 }
        } else {
            Self { on_level: 1, off_level: 0 }
        }
    }

    fn level(&self, state: OutputState) -> u8 {
        match state {
            OutputState::On => self.on_level,
            OutputState::Off => self.off_level,
        }
    }
}

/// Observed per-pin runtime state. Fault detection only, never authoritative.
#[derive(Debug, Clone, Copy)]
pub struct PinRuntime {
    pub mode: PinMode,
    pub last_value: Option<OutputState>,
}

pub struct ActuatorDriver {
    bus: Box<dyn OutputBus>,
    registry: Arc<OutputRegistry>,
    banks: Vec<BankConfig>,
    polarity: Polarity,
    settle_delay: Duration,
    inter_write_delay: Duration,
    pins: HashMap<OutputId, PinRuntime>,
}

impl ActuatorDriver {
    pub fn new(bus: Box<dyn OutputBus>, registry: Arc<OutputRegistry>, config: &CanopyConfig) -> Self {
        Self {
            bus,
            registry,
            banks: config.banks.clone(),
            polarity: Polarity::from_active_low(config.active_low),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            inter_write_delay: Duration::from_millis(config.inter_write_delay_ms),
            pins: HashMap::new(),
        }
    }

    /// Delay callers must respect between consecutive relay writes.
    pub fn inter_write_delay(&self) -> Duration {
        self.inter_write_delay
    }

    pub fn pin_state(&self, id: &OutputId) -> Option<PinRuntime> {
        self.pins.get(id).copied()
    }

    /// Bring up every bank and output: mode ACTIVE, value OFF, then verify
    /// the mode latched. A mode mismatch or a bus fault is a SAFETY_FAULT:
    /// logged, recorded, and initialization continues with the remaining
    /// outputs. Bring-up never fails the process.
    pub async fn initialize(&mut self) -> Vec<OutputId> {
        for (index, bank) in self.banks.iter().enumerate() {
            match self.bus.init_bank(index as u8, bank.bus_address) {
                Ok(()) => info!(
                    "[ACTUATOR] bank {} registered at bus address {:#04x}",
                    index, bank.bus_address
                ),
                Err(e) => warn!(
                    "[ACTUATOR] bank {} registration at {:#04x} failed: {}",
                    index, bank.bus_address, e
                ),
            }
        }

        let ids: Vec<OutputId> = self.registry.ids().cloned().collect();
        let mut faults = Vec::new();
        for id in ids {
            let addr = match self.registry.resolve(&id) {
                Ok(entry) => entry.addr,
                Err(e) => {
                    warn!("[ACTUATOR] {}", e);
                    continue;
                }
            };
            let runtime = match self.bring_up(addr).await {
                Ok(PinMode::Active) => PinRuntime {
                    mode: PinMode::Active,
                    last_value: Some(OutputState::Off),
                },
                Ok(observed) => {
                    warn!(
                        "[ACTUATOR] SAFETY_FAULT: {} ({}) read back {:?} after init, expected Active",
                        id, addr, observed
                    );
                    faults.push(id.clone());
                    PinRuntime {
                        mode: observed,
                        last_value: Some(OutputState::Off),
                    }
                }
                Err(e) => {
                    warn!(
                        "[ACTUATOR] SAFETY_FAULT: {} ({}) bring-up failed: {}",
                        id, addr, e
                    );
                    faults.push(id.clone());
                    PinRuntime {
                        mode: PinMode::Unknown,
                        last_value: None,
                    }
                }
            };
            self.pins.insert(id, runtime);
        }

        info!(
            "[ACTUATOR] initialized {} output(s), {} fault(s)",
            self.pins.len(),
            faults.len()
        );
        faults
    }

    async fn bring_up(&mut self, addr: PinAddress) -> Result<PinMode, CanopyError> {
        self.bus.set_mode(addr, PinMode::Active)?;
        self.bus.write(addr, self.polarity.level(OutputState::Off))?;
        sleep(self.settle_delay).await;
        self.bus.read_mode(addr)
    }

    /// Write one output. The pin's mode is re-observed on every write; if
    /// it has drifted out of ACTIVE it is forced back first. Bus faults
    /// and unknown identifiers are logged and absorbed so a pass over many
    /// outputs never stops at the first bad pin. A state-change line is
    /// logged only when the value actually changes.
    pub async fn write(&mut self, id: &OutputId, state: OutputState) {
        let (addr, label) = match self.registry.resolve(id) {
            Ok(entry) => (entry.addr, entry.label.clone()),
            Err(e) => {
                warn!("[ACTUATOR] skipping write: {}", e);
                return;
            }
        };

        let observed = match self.bus.read_mode(addr) {
            Ok(mode) => mode,
            Err(e) => {
                warn!("[ACTUATOR] {} ({}) mode read failed: {}", id, addr, e);
                PinMode::Unknown
            }
        };
        if observed != PinMode::Active {
            warn!(
                "[ACTUATOR] {} observed in {:?} mode, forcing Active before write",
                id, observed
            );
            if let Err(e) = self.bus.set_mode(addr, PinMode::Active) {
                warn!("[ACTUATOR] {} ({}) mode force failed: {}", id, addr, e);
            }
        }

        let wrote = match self.bus.write(addr, self.polarity.level(state)) {
            Ok(()) => true,
            Err(e) => {
                warn!("[ACTUATOR] {} ({}) write failed: {}", id, addr, e);
                false
            }
        };

        let pin = self.pins.entry(id.clone()).or_insert(PinRuntime {
            mode: PinMode::Unknown,
            last_value: None,
        });
        if !wrote {
            // Next pass re-observes and re-forces the mode from scratch.
            pin.mode = PinMode::Unknown;
            return;
        }
        pin.mode = PinMode::Active;
        if pin.last_value != Some(state) {
            info!("[ACTUATOR] {} ({}) -> {}", id, label, state);
        } else {
            debug!("[ACTUATOR] {} re-asserted {}", id, state);
        }
        pin.last_value = Some(state);
    }

    /// Failsafe shutdown: OFF to every output with the inter-write delay
    /// (shared-rail in-rush protection), then every pin to SAFE mode. The
    /// value-off-then-mode-safe order is mandatory; flipping mode first can
    /// leave the last driven level undefined. Best effort throughout - a
    /// pin that refuses is logged and skipped, the rest still go safe.
    pub async fn shutdown_all(&mut self) {
        info!("[ACTUATOR] failsafe shutdown: all outputs OFF");
        let ids: Vec<OutputId> = self.registry.ids().cloned().collect();

        let mut first = true;
        for id in &ids {
            if !first {
                sleep(self.inter_write_delay).await;
            }
            first = false;
            self.write(id, OutputState::Off).await;
        }

        for id in &ids {
            let addr = match self.registry.resolve(id) {
                Ok(entry) => entry.addr,
                Err(e) => {
                    warn!("[ACTUATOR] {}", e);
                    continue;
                }
            };
            if let Err(e) = self.bus.set_mode(addr, PinMode::Safe) {
                warn!("[ACTUATOR] failed to set {} SAFE: {}", id, e);
                continue;
            }
            if let Some(pin) = self.pins.get_mut(id) {
                pin.mode = PinMode::Safe;
            }
        }
        info!("[ACTUATOR] all outputs in SAFE mode");
    }
}

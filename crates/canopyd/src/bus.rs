//! Hardware bus boundary.
//!
//! The actuator driver consumes this contract; wire-level protocol details
//! live behind it. `MemoryBus` is the in-tree implementation: a recording
//! simulation used by the test suite and by deployments that run without
//! hardware attached. Real transports implement [`OutputBus`] out of tree.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use canopy_common::error::CanopyError;
use canopy_common::outputs::{PinAddress, PinMode};

pub trait OutputBus: Send {
    /// Register one bank at its bus address. Must precede any pin access.
    fn init_bank(&mut self, bank: u8, bus_address: u16) -> Result<(), CanopyError>;

    fn set_mode(&mut self, addr: PinAddress, mode: PinMode) -> Result<(), CanopyError>;

    fn read_mode(&mut self, addr: PinAddress) -> Result<PinMode, CanopyError>;

    /// Write a raw electrical level. Polarity mapping is the driver's job.
    fn write(&mut self, addr: PinAddress, level: u8) -> Result<(), CanopyError>;
}

/// One operation seen by the bus, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    InitBank { bank: u8, bus_address: u16 },
    SetMode { addr: PinAddress, mode: PinMode },
    Write { addr: PinAddress, level: u8 },
}

#[derive(Default)]
struct MemoryBusState {
    ops: Vec<BusOp>,
    banks: HashMap<u8, u16>,
    modes: HashMap<PinAddress, PinMode>,
    levels: HashMap<PinAddress, u8>,
    /// Pins whose mode latch is broken: set_mode is accepted but the pin
    /// stays in input mode, as a failed expander would behave.
    stuck_safe: HashSet<PinAddress>,
    /// Pins whose value writes fail at the bus level.
    broken_writes: HashSet<PinAddress>,
}

/// In-memory bus simulation. Clones share state, so a test can hand one
/// clone to the driver and keep another for inspection.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<MemoryBusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a pin as refusing to leave SAFE mode.
    pub fn stick_safe(&self, addr: PinAddress) {
        self.lock().stuck_safe.insert(addr);
    }

    /// Simulate external interference flipping a pin's mode.
    pub fn drift_mode(&self, addr: PinAddress, mode: PinMode) {
        self.lock().modes.insert(addr, mode);
    }

    /// Make value writes to a pin fail, as a lost expander would behave.
    /// A rejected write records no op and leaves the level untouched.
    pub fn break_writes(&self, addr: PinAddress) {
        self.lock().broken_writes.insert(addr);
    }

    pub fn repair_writes(&self, addr: PinAddress) {
        self.lock().broken_writes.remove(&addr);
    }

    pub fn mode(&self, addr: PinAddress) -> PinMode {
        self.lock().modes.get(&addr).copied().unwrap_or(PinMode::Unknown)
    }

    pub fn level(&self, addr: PinAddress) -> Option<u8> {
        self.lock().levels.get(&addr).copied()
    }

    pub fn ops(&self) -> Vec<BusOp> {
        self.lock().ops.clone()
    }

    pub fn write_count(&self, addr: PinAddress) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| matches!(op, BusOp::Write { addr: a, .. } if *a == addr))
            .count()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryBusState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_bank(state: &MemoryBusState, addr: PinAddress) -> Result<(), CanopyError> {
        if state.banks.contains_key(&addr.bank) {
            Ok(())
        } else {
            Err(CanopyError::Bus(format!("{}: bank not initialized", addr)))
        }
    }
}

impl OutputBus for MemoryBus {
    fn init_bank(&mut self, bank: u8, bus_address: u16) -> Result<(), CanopyError> {
        let mut state = self.lock();
        state.banks.insert(bank, bus_address);
        state.ops.push(BusOp::InitBank { bank, bus_address });
        Ok(())
    }

    fn set_mode(&mut self, addr: PinAddress, mode: PinMode) -> Result<(), CanopyError> {
        let mut state = self.lock();
        Self::check_bank(&state, addr)?;
        state.ops.push(BusOp::SetMode { addr, mode });
        if state.stuck_safe.contains(&addr) {
            state.modes.insert(addr, PinMode::Safe);
        } else {
            state.modes.insert(addr, mode);
        }
        Ok(())
    }

    fn read_mode(&mut self, addr: PinAddress) -> Result<PinMode, CanopyError> {
        let state = self.lock();
        Self::check_bank(&state, addr)?;
        Ok(state.modes.get(&addr).copied().unwrap_or(PinMode::Unknown))
    }

    fn write(&mut self, addr: PinAddress, level: u8) -> Result<(), CanopyError> {
        let mut state = self.lock();
        Self::check_bank(&state, addr)?;
        if state.broken_writes.contains(&addr) {
            return Err(CanopyError::Bus(format!("{}: write rejected", addr)));
        }
        state.ops.push(BusOp::Write { addr, level });
        state.levels.insert(addr, level);
        Ok(())
    }
}

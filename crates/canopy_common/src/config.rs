//! Configuration management for canopyd.
//!
//! Loads settings from /etc/canopy/config.toml or uses defaults. The
//! defaults mirror the historical four-bank deployment (lights, fans, mist
//! pump on the second bank); the wiring map and schedule table are site
//! data, not code, and every field can be overridden.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::outputs::{GroupSpec, OutputId, OutputSpec};
use crate::paths;
use crate::schedule::{ActionSpec, CronSpec, ScheduledAction, DEFAULT_MISFIRE_GRACE_SECS};

/// One actuator bank, reachable via a single bus address. Bank index is
/// implied by position in the list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    pub bus_address: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanopyConfig {
    /// Instance lock file location.
    #[serde(default = "paths::default_lock_path")]
    pub lock_path: PathBuf,

    /// Bounded wait for the instance lock before giving up.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,

    /// Relay boards are active-low: electrical 0 drives the coil.
    #[serde(default = "default_active_low")]
    pub active_low: bool,

    /// Delay between mode write and mode read-back at initialization.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Delay between consecutive relay writes. Keeps in-rush current on a
    /// shared supply rail from stacking when a group switches.
    #[serde(default = "default_inter_write_delay_ms")]
    pub inter_write_delay_ms: u64,

    /// Scheduler evaluation granularity.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Cadence of the unconditional reconciliation apply.
    #[serde(default = "default_apply_interval_secs")]
    pub apply_interval_secs: u64,

    /// Cadence of the full-state audit dump.
    #[serde(default = "default_audit_interval_secs")]
    pub audit_interval_secs: u64,

    #[serde(default = "default_banks")]
    pub banks: Vec<BankConfig>,

    #[serde(default = "default_outputs")]
    pub outputs: Vec<OutputSpec>,

    #[serde(default = "default_groups")]
    pub groups: Vec<GroupSpec>,

    #[serde(default = "default_schedule")]
    pub schedule: Vec<ScheduledAction>,
}

fn default_lock_wait_ms() -> u64 {
    5_000
}

fn default_active_low() -> bool {
    true
}

fn default_settle_delay_ms() -> u64 {
    50
}

fn default_inter_write_delay_ms() -> u64 {
    200
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_apply_interval_secs() -> u64 {
    60
}

fn default_audit_interval_secs() -> u64 {
    3_600
}

fn default_banks() -> Vec<BankConfig> {
    // Four MCP-style expanders, address pins strapped 0x21..0x24.
    vec![
        BankConfig { bus_address: 0x21 },
        BankConfig { bus_address: 0x22 },
        BankConfig { bus_address: 0x23 },
        BankConfig { bus_address: 0x24 },
    ]
}

fn out(id: &str, bank: u8, offset: u8, label: &str) -> OutputSpec {
    OutputSpec {
        id: OutputId::new(id),
        bank,
        offset,
        label: label.to_string(),
    }
}

fn default_outputs() -> Vec<OutputSpec> {
    // Everything wired today sits on the second bank.
    vec![
        out("lo_volt_1", 1, 6, "low-voltage lighting circuit 1"),
        out("lo_volt_2", 1, 7, "low-voltage lighting circuit 2"),
        out("mist_pump", 1, 9, "lower 1-gang, bottom outlet"),
        out("supp_light_1", 1, 10, "2-gang, upper right"),
        out("main_light_driver", 1, 11, "2-gang, bottom left"),
        out("supp_fan", 1, 12, "2-gang, bottom right"),
        out("main_fan", 1, 13, "2-gang, upper left"),
        out("supp_light_2", 1, 14, "middle 1-gang, top outlet"),
    ]
}

fn group(name: &str, outputs: &[&str]) -> GroupSpec {
    GroupSpec {
        name: name.to_string(),
        outputs: outputs.iter().map(|o| OutputId::new(*o)).collect(),
    }
}

fn default_groups() -> Vec<GroupSpec> {
    vec![
        group("main_lights", &["main_light_driver", "lo_volt_1", "lo_volt_2"]),
        group("supp_lights", &["supp_light_1", "supp_light_2"]),
        group("main_fan", &["main_fan"]),
        group("supp_fan", &["supp_fan"]),
        group("mist", &["mist_pump"]),
        // No tier-fan relay wired yet; the mist action warns until one is.
        group("tier_fans", &[]),
    ]
}

fn entry(name: &str, hour: u32, minute: u32, action: ActionSpec) -> ScheduledAction {
    ScheduledAction {
        name: name.to_string(),
        spec: CronSpec::daily(hour, minute),
        action,
        misfire_grace_secs: DEFAULT_MISFIRE_GRACE_SECS,
    }
}

fn set_group(group: &str, state: crate::outputs::OutputState) -> ActionSpec {
    ActionSpec::SetGroup {
        group: group.to_string(),
        state,
    }
}

fn default_schedule() -> Vec<ScheduledAction> {
    use crate::outputs::OutputState::{Off, On};

    vec![
        // Midnight: re-assert the main fan so a bare startup is trivial.
        entry("ensure_main_fan", 0, 0, set_group("main_fan", On)),
        // Morning routine
        entry("main_lights_on_am", 12, 0, set_group("main_lights", On)),
        entry("supp_lights_on_am", 13, 20, set_group("supp_lights", On)),
        // Midday cooldown
        entry("supp_lights_off_cooldown", 18, 0, set_group("supp_lights", Off)),
        entry("supp_lights_on_cooldown", 18, 15, set_group("supp_lights", On)),
        // Evening routine
        entry("supp_lights_off_pm", 0, 30, set_group("supp_lights", Off)),
        entry("main_lights_off_pm", 1, 0, set_group("main_lights", Off)),
        // Misting windows
        entry("mist_on_first", 13, 0, ActionSpec::Mist { on: true }),
        entry("mist_off_first", 13, 3, ActionSpec::Mist { on: false }),
        entry("mist_on_second", 14, 30, ActionSpec::Mist { on: true }),
        entry("mist_off_second", 14, 33, ActionSpec::Mist { on: false }),
        entry("mist_on_third", 16, 0, ActionSpec::Mist { on: true }),
        entry("mist_off_third", 16, 3, ActionSpec::Mist { on: false }),
    ]
}

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            lock_path: paths::default_lock_path(),
            lock_wait_ms: default_lock_wait_ms(),
            active_low: default_active_low(),
            settle_delay_ms: default_settle_delay_ms(),
            inter_write_delay_ms: default_inter_write_delay_ms(),
            tick_interval_secs: default_tick_interval_secs(),
            apply_interval_secs: default_apply_interval_secs(),
            audit_interval_secs: default_audit_interval_secs(),
            banks: default_banks(),
            outputs: default_outputs(),
            groups: default_groups(),
            schedule: default_schedule(),
        }
    }
}

/// Load configuration, falling back to defaults when the file is missing
/// or unparseable. A bad config must not leave the greenhouse dark.
pub fn load_config(path: &Path) -> CanopyConfig {
    match fs::read_to_string(path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(config) => {
                info!("[CONFIG] loaded {}", path.display());
                config
            }
            Err(e) => {
                warn!("[CONFIG] parse error in {}: {} - using defaults", path.display(), e);
                CanopyConfig::default()
            }
        },
        Err(_) => {
            info!("[CONFIG] {} not found, using defaults", path.display());
            CanopyConfig::default()
        }
    }
}

//! Output data model: identifiers, states, pin addressing.
//!
//! An output is one relay channel. Outputs live on actuator banks
//! (addressable blocks of 16 lines each); the registry in the daemon maps
//! symbolic identifiers to (bank, offset) pairs. Polarity is a deployment
//! property and is resolved once at driver initialization, never here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of output lines per actuator bank.
pub const BANK_WIDTH: u8 = 16;

/// Symbolic name of one relay channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputId(String);

impl OutputId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical state of one output. Electrical level is derived from this via
/// the polarity table, not the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputState {
    Off,
    On,
}

impl OutputState {
    pub fn is_on(self) -> bool {
        matches!(self, OutputState::On)
    }

    pub fn label(self) -> &'static str {
        match self {
            OutputState::On => "ON",
            OutputState::Off => "OFF",
        }
    }
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Observed pin mode. Writes only take effect in `Active`; `Safe` (input
/// mode) is the shutdown state where the line cannot drive a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Active,
    Safe,
    Unknown,
}

/// Physical address of one output line: bank index plus bit offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PinAddress {
    pub bank: u8,
    pub offset: u8,
}

impl fmt::Display for PinAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bank {} line {}", self.bank, self.offset)
    }
}

/// One wired output as declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub id: OutputId,
    pub bank: u8,
    pub offset: u8,
    /// Human-readable label for log lines ("lower 1-gang, bottom outlet").
    #[serde(default)]
    pub label: String,
}

/// A named group of outputs, switched together by group actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub outputs: Vec<OutputId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_state_labels() {
        assert_eq!(OutputState::On.label(), "ON");
        assert_eq!(OutputState::Off.label(), "OFF");
        assert!(OutputState::On.is_on());
        assert!(!OutputState::Off.is_on());
    }

    #[test]
    fn output_state_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&OutputState::On).unwrap(), "\"ON\"");
        assert_eq!(serde_json::to_string(&OutputState::Off).unwrap(), "\"OFF\"");
    }

    #[test]
    fn output_ids_order_by_name() {
        let a = OutputId::new("lo_volt_1");
        let b = OutputId::new("mist_pump");
        assert!(a < b);
    }
}

//! Output registry: symbolic identifier to physical address resolution.
//!
//! Built once from configuration at startup and immutable afterwards.
//! Every OutputId maps to exactly one (bank, offset); duplicates on either
//! side are configuration errors caught before any hardware is touched.

use std::collections::{BTreeMap, HashSet};

use canopy_common::config::CanopyConfig;
use canopy_common::error::CanopyError;
use canopy_common::outputs::{GroupSpec, OutputId, OutputSpec, PinAddress, BANK_WIDTH};

#[derive(Debug, Clone)]
pub struct OutputEntry {
    pub addr: PinAddress,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct OutputRegistry {
    outputs: BTreeMap<OutputId, OutputEntry>,
    groups: BTreeMap<String, Vec<OutputId>>,
}

impl OutputRegistry {
    pub fn from_config(config: &CanopyConfig) -> Result<Self, CanopyError> {
        Self::build(&config.outputs, &config.groups, config.banks.len())
    }

    pub fn build(
        outputs: &[OutputSpec],
        groups: &[GroupSpec],
        bank_count: usize,
    ) -> Result<Self, CanopyError> {
        let mut map = BTreeMap::new();
        let mut addrs = HashSet::new();

        for spec in outputs {
            if usize::from(spec.bank) >= bank_count {
                return Err(CanopyError::Registry(format!(
                    "output '{}' references bank {} but only {} bank(s) configured",
                    spec.id, spec.bank, bank_count
                )));
            }
            if spec.offset >= BANK_WIDTH {
                return Err(CanopyError::Registry(format!(
                    "output '{}' offset {} exceeds bank width {}",
                    spec.id, spec.offset, BANK_WIDTH
                )));
            }
            let addr = PinAddress {
                bank: spec.bank,
                offset: spec.offset,
            };
            if !addrs.insert(addr) {
                return Err(CanopyError::Registry(format!(
                    "{} wired to more than one output",
                    addr
                )));
            }
            let entry = OutputEntry {
                addr,
                label: spec.label.clone(),
            };
            if map.insert(spec.id.clone(), entry).is_some() {
                return Err(CanopyError::Registry(format!(
                    "duplicate output id '{}'",
                    spec.id
                )));
            }
        }

        let mut group_map = BTreeMap::new();
        for group in groups {
            for id in &group.outputs {
                if !map.contains_key(id) {
                    return Err(CanopyError::Registry(format!(
                        "group '{}' references unknown output '{}'",
                        group.name, id
                    )));
                }
            }
            if group_map.insert(group.name.clone(), group.outputs.clone()).is_some() {
                return Err(CanopyError::Registry(format!(
                    "duplicate group name '{}'",
                    group.name
                )));
            }
        }

        Ok(Self {
            outputs: map,
            groups: group_map,
        })
    }

    pub fn resolve(&self, id: &OutputId) -> Result<&OutputEntry, CanopyError> {
        self.outputs
            .get(id)
            .ok_or_else(|| CanopyError::Registry(format!("unknown output '{}'", id)))
    }

    pub fn group(&self, name: &str) -> Option<&[OutputId]> {
        self.groups.get(name).map(|v| v.as_slice())
    }

    pub fn contains(&self, id: &OutputId) -> bool {
        self.outputs.contains_key(id)
    }

    /// All output ids in ascending order. Apply and audit passes iterate
    /// this so log output is deterministic.
    pub fn ids(&self) -> impl Iterator<Item = &OutputId> + '_ {
        self.outputs.keys()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

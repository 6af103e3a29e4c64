//! Desired state model: the authoritative target configuration.
//!
//! A plain map from output to ON/OFF, mutated only through the named
//! actions and pushed to hardware by `apply`. The dirty flag exists purely
//! to keep no-op reconciliation ticks out of the log; it never gates the
//! writes themselves, which are re-issued on every pass to heal drift.

use std::collections::BTreeMap;

use canopy_common::outputs::{OutputId, OutputState};
use tokio::time::sleep;
use tracing::info;

use crate::actuator::ActuatorDriver;
use crate::registry::OutputRegistry;

#[derive(Debug, Clone)]
pub struct DesiredStateModel {
    targets: BTreeMap<OutputId, OutputState>,
    dirty: bool,
}

impl DesiredStateModel {
    /// Initial model: every registered output OFF.
    pub fn all_off(registry: &OutputRegistry) -> Self {
        let targets = registry
            .ids()
            .map(|id| (id.clone(), OutputState::Off))
            .collect();
        Self {
            targets,
            dirty: true,
        }
    }

    pub fn set_one(&mut self, id: &OutputId, state: OutputState) {
        if let Some(target) = self.targets.get_mut(id) {
            if *target != state {
                *target = state;
                self.dirty = true;
            }
        } else {
            self.targets.insert(id.clone(), state);
            self.dirty = true;
        }
    }

    pub fn set_group(&mut self, ids: &[OutputId], state: OutputState) {
        for id in ids {
            self.set_one(id, state);
        }
    }

    /// Force every target OFF. Used once, during shutdown.
    pub fn force_all_off(&mut self) {
        let ids: Vec<OutputId> = self.targets.keys().cloned().collect();
        self.set_group(&ids, OutputState::Off);
    }

    pub fn get(&self, id: &OutputId) -> Option<OutputState> {
        self.targets.get(id).copied()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Push every entry to the driver in ascending identifier order, with
    /// the driver's inter-write spacing. The driver absorbs per-output
    /// faults, so a pass always covers the full map. Clears the dirty
    /// flag. Emits one full-state audit line when dirty or forced;
    /// returns whether it did.
    pub async fn apply(&mut self, driver: &mut ActuatorDriver, force_log: bool) -> bool {
        let mut first = true;
        for (id, state) in &self.targets {
            if !first {
                sleep(driver.inter_write_delay()).await;
            }
            first = false;
            driver.write(id, *state).await;
        }

        let logged = force_log || self.dirty;
        if logged {
            info!("[STATE] {}", self.dump());
        }
        self.dirty = false;
        logged
    }

    /// One-line JSON dump of the full target map, for audit searchability.
    pub fn dump(&self) -> String {
        serde_json::to_string(&self.targets).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use canopy_common::config::CanopyConfig;
    use canopy_common::outputs::OutputSpec;
    use std::sync::Arc;

    fn fixture() -> (MemoryBus, Arc<OutputRegistry>, ActuatorDriver) {
        let outputs = vec![
            OutputSpec { id: OutputId::new("fan"), bank: 0, offset: 1, label: String::new() },
            OutputSpec { id: OutputId::new("light"), bank: 0, offset: 2, label: String::new() },
            OutputSpec { id: OutputId::new("mist"), bank: 0, offset: 3, label: String::new() },
        ];
        let registry = Arc::new(OutputRegistry::build(&outputs, &[], 1).unwrap());
        let config = CanopyConfig {
            settle_delay_ms: 0,
            inter_write_delay_ms: 0,
            ..CanopyConfig::default()
        };
        let bus = MemoryBus::new();
        let driver = ActuatorDriver::new(Box::new(bus.clone()), registry.clone(), &config);
        (bus, registry, driver)
    }

    #[tokio::test]
    async fn apply_is_write_idempotent_but_log_once() {
        let (bus, registry, mut driver) = fixture();
        driver.initialize().await;
        let mut model = DesiredStateModel::all_off(&registry);
        bus.clear_ops();

        let first = model.apply(&mut driver, false).await;
        let second = model.apply(&mut driver, false).await;

        assert!(first, "initial model is dirty, first apply logs");
        assert!(!second, "unchanged model stays silent");
        for id in registry.ids() {
            let addr = registry.resolve(id).unwrap().addr;
            assert_eq!(bus.write_count(addr), 2, "both passes re-issue writes");
        }
    }

    #[tokio::test]
    async fn force_log_reports_even_when_clean() {
        let (_bus, registry, mut driver) = fixture();
        driver.initialize().await;
        let mut model = DesiredStateModel::all_off(&registry);

        model.apply(&mut driver, false).await;
        assert!(model.apply(&mut driver, true).await);
    }

    #[tokio::test]
    async fn setting_same_value_does_not_dirty() {
        let (_bus, registry, mut driver) = fixture();
        driver.initialize().await;
        let mut model = DesiredStateModel::all_off(&registry);
        model.apply(&mut driver, false).await;

        model.set_one(&OutputId::new("fan"), OutputState::Off);
        assert!(!model.is_dirty());
        model.set_one(&OutputId::new("fan"), OutputState::On);
        assert!(model.is_dirty());
    }

    #[tokio::test]
    async fn apply_pushes_targets_to_hardware() {
        let (bus, registry, mut driver) = fixture();
        driver.initialize().await;
        let mut model = DesiredStateModel::all_off(&registry);
        model.set_one(&OutputId::new("light"), OutputState::On);

        model.apply(&mut driver, false).await;

        let on_addr = registry.resolve(&OutputId::new("light")).unwrap().addr;
        let off_addr = registry.resolve(&OutputId::new("fan")).unwrap().addr;
        // active-low: ON = 0, OFF = 1
        assert_eq!(bus.level(on_addr), Some(0));
        assert_eq!(bus.level(off_addr), Some(1));
    }

    #[tokio::test]
    async fn apply_continues_past_failing_output() {
        let (bus, registry, mut driver) = fixture();
        driver.initialize().await;
        let mut model = DesiredStateModel::all_off(&registry);
        model.set_group(
            &[OutputId::new("fan"), OutputId::new("light"), OutputId::new("mist")],
            OutputState::On,
        );

        let light_addr = registry.resolve(&OutputId::new("light")).unwrap().addr;
        bus.break_writes(light_addr);
        bus.clear_ops();

        assert!(model.apply(&mut driver, false).await);

        // "light" sorts between the other two; both still reached.
        for name in ["fan", "mist"] {
            let addr = registry.resolve(&OutputId::new(name)).unwrap().addr;
            assert_eq!(bus.write_count(addr), 1);
            assert_eq!(bus.level(addr), Some(0)); // ON, active-low
        }
        assert_eq!(bus.write_count(light_addr), 0);
    }

    #[tokio::test]
    async fn apply_skips_targets_missing_from_the_wiring_map() {
        let (bus, registry, mut driver) = fixture();
        driver.initialize().await;
        let mut model = DesiredStateModel::all_off(&registry);
        model.set_one(&OutputId::new("ghost"), OutputState::On);
        bus.clear_ops();

        model.apply(&mut driver, false).await;

        for id in registry.ids() {
            let addr = registry.resolve(id).unwrap().addr;
            assert_eq!(bus.write_count(addr), 1);
        }
    }

    #[test]
    fn force_all_off_clears_every_target() {
        let outputs = vec![
            OutputSpec { id: OutputId::new("a"), bank: 0, offset: 0, label: String::new() },
            OutputSpec { id: OutputId::new("b"), bank: 0, offset: 1, label: String::new() },
        ];
        let registry = OutputRegistry::build(&outputs, &[], 1).unwrap();
        let mut model = DesiredStateModel::all_off(&registry);
        model.set_group(
            &[OutputId::new("a"), OutputId::new("b")],
            OutputState::On,
        );
        model.force_all_off();
        assert_eq!(model.get(&OutputId::new("a")), Some(OutputState::Off));
        assert_eq!(model.get(&OutputId::new("b")), Some(OutputState::Off));
    }

    #[test]
    fn dump_is_deterministic_json() {
        let outputs = vec![
            OutputSpec { id: OutputId::new("b"), bank: 0, offset: 1, label: String::new() },
            OutputSpec { id: OutputId::new("a"), bank: 0, offset: 0, label: String::new() },
        ];
        let registry = OutputRegistry::build(&outputs, &[], 1).unwrap();
        let model = DesiredStateModel::all_off(&registry);
        assert_eq!(model.dump(), r#"{"a":"OFF","b":"OFF"}"#);
    }
}

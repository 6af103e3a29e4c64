//! Startup catch-up reconciliation.
//!
//! Replays, in nominal-time order, the most recent occurrence of every
//! schedule entry at or before "now". Grace windows are deliberately
//! ignored here: the question is "what should be true right now", not
//! "did we miss a narrow window". Replay goes through the identical
//! action entry points as live triggering, so the resulting model equals
//! the one a continuously-running process would hold.

use canopy_common::schedule::ScheduleTable;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::actions;
use crate::actuator::ActuatorDriver;
use crate::model::DesiredStateModel;
use crate::registry::OutputRegistry;

/// The replay plan: (table index, occurrence) pairs, ascending by
/// occurrence time, ties broken by table order.
pub fn plan(table: &ScheduleTable, now: DateTime<Utc>) -> Vec<(usize, DateTime<Utc>)> {
    let mut occurrences: Vec<(usize, DateTime<Utc>)> = table
        .entries()
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| entry.spec.prev_occurrence(now).map(|t| (index, t)))
        .collect();
    occurrences.sort_by_key(|(index, t)| (*t, *index));
    occurrences
}

/// Execute the replay plan against the model, then push the converged
/// state to hardware with a forced audit line. Returns the replayed
/// (name, occurrence) pairs so the live engine can be seeded and never
/// fires the same occurrence twice.
pub async fn replay(
    table: &ScheduleTable,
    registry: &OutputRegistry,
    model: &mut DesiredStateModel,
    driver: &mut ActuatorDriver,
    now: DateTime<Utc>,
) -> Vec<(String, DateTime<Utc>)> {
    let planned = plan(table, now);
    info!("[CATCHUP] replaying {} occurrence(s) for {}", planned.len(), now.format("%Y-%m-%d %H:%M"));

    let mut replayed = Vec::with_capacity(planned.len());
    for (index, occurrence) in planned {
        let entry = &table.entries()[index];
        info!(
            "[CATCHUP] '{}' (nominal {})",
            entry.name,
            occurrence.format("%H:%M")
        );
        actions::invoke(&entry.action, registry, model);
        replayed.push((entry.name.clone(), occurrence));
    }

    model.apply(driver, true).await;
    info!("[CATCHUP] converged: {}", model.dump());
    replayed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use canopy_common::config::CanopyConfig;
    use canopy_common::outputs::{GroupSpec, OutputId, OutputSpec, OutputState};
    use canopy_common::schedule::{ActionSpec, CronSpec, ScheduledAction};
    use chrono::{NaiveDate, TimeZone};
    use std::sync::Arc;

    fn at(h: u32, min: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2024, 6, 3)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    fn registry() -> Arc<OutputRegistry> {
        let outputs = vec![
            OutputSpec { id: OutputId::new("light"), bank: 0, offset: 0, label: String::new() },
            OutputSpec { id: OutputId::new("mist_pump"), bank: 0, offset: 1, label: String::new() },
        ];
        let groups = vec![
            GroupSpec { name: "lights".into(), outputs: vec![OutputId::new("light")] },
            GroupSpec { name: "mist".into(), outputs: vec![OutputId::new("mist_pump")] },
        ];
        Arc::new(OutputRegistry::build(&outputs, &groups, 1).unwrap())
    }

    fn set(name: &str, hour: u32, minute: u32, group: &str, state: OutputState) -> ScheduledAction {
        ScheduledAction {
            name: name.into(),
            spec: CronSpec::daily(hour, minute),
            action: ActionSpec::SetGroup { group: group.into(), state },
            misfire_grace_secs: 60,
        }
    }

    /// The canonical restart scenario: LIGHT on at 12:00, MIST on at 13:00
    /// and off at 13:03; the process starts at 13:05.
    #[tokio::test]
    async fn restart_at_1305_converges_to_light_on_mist_off() {
        let registry = registry();
        let table = ScheduleTable::new(vec![
            set("light_on", 12, 0, "lights", OutputState::On),
            set("mist_on", 13, 0, "mist", OutputState::On),
            set("mist_off", 13, 3, "mist", OutputState::Off),
        ])
        .unwrap();

        let config = CanopyConfig {
            settle_delay_ms: 0,
            inter_write_delay_ms: 0,
            ..CanopyConfig::default()
        };
        let bus = MemoryBus::new();
        let mut driver = ActuatorDriver::new(Box::new(bus.clone()), registry.clone(), &config);
        driver.initialize().await;
        let mut model = DesiredStateModel::all_off(&registry);
        bus.clear_ops();

        let replayed = replay(&table, &registry, &mut model, &mut driver, at(13, 5)).await;

        assert_eq!(model.get(&OutputId::new("light")), Some(OutputState::On));
        assert_eq!(model.get(&OutputId::new("mist_pump")), Some(OutputState::Off));

        // Exactly one hardware write per output during the catch-up apply.
        for id in registry.ids() {
            let addr = registry.resolve(id).unwrap().addr;
            assert_eq!(bus.write_count(addr), 1);
        }

        // Replay is reported in occurrence order for engine seeding.
        let names: Vec<&str> = replayed.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["light_on", "mist_on", "mist_off"]);
    }

    /// A single failing relay must not stop catch-up: the rest of the
    /// outputs still converge and the engine still gets its seed.
    #[tokio::test]
    async fn replay_completes_despite_bus_fault() {
        let registry = registry();
        let table = ScheduleTable::new(vec![
            set("light_on", 12, 0, "lights", OutputState::On),
            set("mist_on", 13, 0, "mist", OutputState::On),
        ])
        .unwrap();

        let config = CanopyConfig {
            settle_delay_ms: 0,
            inter_write_delay_ms: 0,
            ..CanopyConfig::default()
        };
        let bus = MemoryBus::new();
        let mut driver = ActuatorDriver::new(Box::new(bus.clone()), registry.clone(), &config);
        driver.initialize().await;

        let light_addr = registry.resolve(&OutputId::new("light")).unwrap().addr;
        bus.break_writes(light_addr);
        bus.clear_ops();

        let mut model = DesiredStateModel::all_off(&registry);
        let replayed = replay(&table, &registry, &mut model, &mut driver, at(13, 5)).await;

        let mist_addr = registry.resolve(&OutputId::new("mist_pump")).unwrap().addr;
        assert_eq!(bus.write_count(mist_addr), 1);
        assert_eq!(bus.level(mist_addr), Some(0)); // ON, active-low
        assert_eq!(replayed.len(), 2, "seed covers every replayed entry");
    }

    #[test]
    fn plan_orders_across_midnight() {
        // Entry at 01:00 today must come after yesterday's 18:00.
        let table = ScheduleTable::new(vec![
            set("morning_off", 1, 0, "lights", OutputState::Off),
            set("evening_on", 18, 0, "lights", OutputState::On),
        ])
        .unwrap();
        let planned = plan(&table, at(13, 5));
        assert_eq!(planned[0].0, 1); // yesterday 18:00
        assert_eq!(planned[1].0, 0); // today 01:00
        assert!(planned[0].1 < planned[1].1);
    }

    #[test]
    fn plan_ignores_grace_entirely() {
        // Hours past its 60s grace, still replayed.
        let table =
            ScheduleTable::new(vec![set("stale", 6, 0, "lights", OutputState::On)]).unwrap();
        assert_eq!(plan(&table, at(23, 59)).len(), 1);
    }

    /// Catch-up equals a sequential run of every trigger from all-OFF,
    /// regardless of table order.
    #[tokio::test]
    async fn replay_is_equivalent_to_continuous_run() {
        let registry = registry();
        let entries = vec![
            set("mist_off", 13, 3, "mist", OutputState::Off),
            set("light_on", 12, 0, "lights", OutputState::On),
            set("mist_on", 13, 0, "mist", OutputState::On),
        ];
        let table = ScheduleTable::new(entries.clone()).unwrap();

        let config = CanopyConfig {
            settle_delay_ms: 0,
            inter_write_delay_ms: 0,
            ..CanopyConfig::default()
        };
        let bus = MemoryBus::new();
        let mut driver = ActuatorDriver::new(Box::new(bus.clone()), registry.clone(), &config);
        driver.initialize().await;
        let mut replayed_model = DesiredStateModel::all_off(&registry);
        replay(&table, &registry, &mut replayed_model, &mut driver, at(14, 0)).await;

        // Reference: fire the triggers in chronological order by hand.
        let mut reference = DesiredStateModel::all_off(&registry);
        let mut ordered = entries.clone();
        ordered.sort_by_key(|e| (e.spec.hour, e.spec.minute));
        for entry in &ordered {
            crate::actions::invoke(&entry.action, &registry, &mut reference);
        }

        for id in registry.ids() {
            assert_eq!(replayed_model.get(id), reference.get(id));
        }
    }
}

//! Schedule engine: minute-granularity trigger evaluation.
//!
//! Each tick asks "which entries' most recent nominal occurrence is still
//! inside its misfire grace window and has not fired yet?". An occurrence
//! beyond its grace is abandoned - never queued, never retried - because
//! firing a drastically stale action is worse than skipping it; startup
//! catch-up covers the "what should be true right now" question instead.

use std::collections::HashMap;
use std::sync::Arc;

use canopy_common::schedule::ScheduleTable;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::info;

use crate::actions;
use crate::context::{ControlContext, ControlPlane};

/// One entry due for firing at this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueAction {
    pub entry_index: usize,
    pub occurrence: DateTime<Utc>,
}

pub struct ScheduleEngine {
    table: Arc<ScheduleTable>,
    /// Last nominal occurrence fired per entry name. Guarantees each
    /// occurrence fires at most once even if ticks bunch up.
    fired: HashMap<String, DateTime<Utc>>,
}

impl ScheduleEngine {
    pub fn new(table: Arc<ScheduleTable>) -> Self {
        Self {
            table,
            fired: HashMap::new(),
        }
    }

    /// Engine pre-seeded with occurrences already covered by catch-up
    /// replay, so startup never fires the same occurrence twice.
    pub fn with_replayed(
        table: Arc<ScheduleTable>,
        replayed: impl IntoIterator<Item = (String, DateTime<Utc>)>,
    ) -> Self {
        Self {
            table,
            fired: replayed.into_iter().collect(),
        }
    }

    /// Entries due at `now`, ascending by nominal time, ties broken by
    /// table order. Marks them fired.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<DueAction> {
        let mut due = Vec::new();
        for (index, entry) in self.table.entries().iter().enumerate() {
            let Some(occurrence) = entry.spec.prev_occurrence(now) else {
                continue;
            };
            if now.signed_duration_since(occurrence) > entry.grace() {
                continue; // abandoned: outside the misfire grace window
            }
            if self.fired.get(&entry.name) == Some(&occurrence) {
                continue;
            }
            due.push(DueAction {
                entry_index: index,
                occurrence,
            });
        }
        due.sort_by_key(|d| (d.occurrence, d.entry_index));
        for d in &due {
            let name = self.table.entries()[d.entry_index].name.clone();
            self.fired.insert(name, d.occurrence);
        }
        due
    }

    /// Steady-state ticking. Fires due actions against the model and
    /// applies, all under the control-plane lock. Stops when the shutdown
    /// channel flips, interrupting the idle wait immediately.
    pub async fn run(mut self, ctx: Arc<ControlContext>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(ctx.config.tick_interval_secs));
        ticker.tick().await; // first tick completes immediately

        info!(
            "[SCHED] engine running: {} entries, {}s granularity",
            self.table.len(),
            ctx.config.tick_interval_secs
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let due = self.due(now);
                    if due.is_empty() {
                        continue;
                    }
                    let mut plane = ctx.plane.lock().await;
                    for d in &due {
                        let entry = &self.table.entries()[d.entry_index];
                        info!(
                            "[SCHED] firing '{}' (nominal {})",
                            entry.name,
                            d.occurrence.format("%H:%M")
                        );
                        actions::invoke(&entry.action, &ctx.registry, &mut plane.model);
                    }
                    let ControlPlane { model, driver } = &mut *plane;
                    model.apply(driver, false).await;
                }
                _ = shutdown.changed() => {
                    info!("[SCHED] engine stopped");
                    return;
                }
            }
        }
    }
}

//! The one explicit context object.
//!
//! Everything mutable that touches hardware - the desired state model and
//! the actuator driver - sits behind a single mutex. Scheduler ticks,
//! catch-up replay, periodic reconciliation, and shutdown all take that
//! lock, so bus writes are never concurrent and a tick in flight always
//! completes before the off-sequence runs.

use std::sync::Arc;

use canopy_common::config::CanopyConfig;
use canopy_common::schedule::ScheduleTable;
use tokio::sync::Mutex;

use crate::actuator::ActuatorDriver;
use crate::model::DesiredStateModel;
use crate::registry::OutputRegistry;

/// The mutable half: model plus driver, guarded together.
pub struct ControlPlane {
    pub model: DesiredStateModel,
    pub driver: ActuatorDriver,
}

pub struct ControlContext {
    pub config: CanopyConfig,
    pub registry: Arc<OutputRegistry>,
    pub table: Arc<ScheduleTable>,
    pub plane: Mutex<ControlPlane>,
}

impl ControlContext {
    pub fn new(
        config: CanopyConfig,
        registry: Arc<OutputRegistry>,
        table: Arc<ScheduleTable>,
        model: DesiredStateModel,
        driver: ActuatorDriver,
    ) -> Self {
        Self {
            config,
            registry,
            table,
            plane: Mutex::new(ControlPlane { model, driver }),
        }
    }
}

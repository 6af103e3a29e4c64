//! Named actions: the single mutation path for the desired state model.
//!
//! Live triggers and catch-up replay both land here, so there is exactly
//! one definition of what each action does. Actions only touch the model;
//! hardware follows on the next apply.

use canopy_common::outputs::OutputState;
use canopy_common::schedule::ActionSpec;
use tracing::warn;

use crate::model::DesiredStateModel;
use crate::registry::OutputRegistry;

/// Group driven inverse to the mist pump during misting.
pub const TIER_FANS_GROUP: &str = "tier_fans";

/// Group holding the mist pump circuit.
pub const MIST_GROUP: &str = "mist";

pub fn invoke(action: &ActionSpec, registry: &OutputRegistry, model: &mut DesiredStateModel) {
    match action {
        ActionSpec::SetOutput { output, state } => {
            if registry.contains(output) {
                model.set_one(output, *state);
            } else {
                warn!("[ACTION] unknown output '{}', ignoring", output);
            }
        }
        ActionSpec::SetGroup { group, state } => {
            set_group(group, *state, registry, model);
        }
        ActionSpec::Mist { on } => {
            // Fans off before the pump runs, back on when it stops.
            let fans = if *on { OutputState::Off } else { OutputState::On };
            set_group(TIER_FANS_GROUP, fans, registry, model);
            set_group(MIST_GROUP, if *on { OutputState::On } else { OutputState::Off }, registry, model);
        }
    }
}

fn set_group(name: &str, state: OutputState, registry: &OutputRegistry, model: &mut DesiredStateModel) {
    match registry.group(name) {
        Some(ids) if !ids.is_empty() => model.set_group(ids, state),
        Some(_) => warn!("[ACTION] group '{}' has no outputs wired", name),
        None => warn!("[ACTION] group '{}' is not defined", name),
    }
}

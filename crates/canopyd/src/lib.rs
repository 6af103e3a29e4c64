//! Canopy daemon library - exposes modules for testing.

pub mod actions;
pub mod actuator;
pub mod bus;
pub mod catchup;
pub mod context;
pub mod guard;
pub mod model;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod signals;

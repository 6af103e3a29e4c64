//! Shared types for the Canopy relay controller.
//!
//! Everything the daemon and its tests agree on lives here: the error
//! taxonomy, the output/bank data model, the cron-style schedule table,
//! configuration loading, and well-known filesystem paths.

pub mod config;
pub mod error;
pub mod outputs;
pub mod paths;
pub mod schedule;

/// Crate version, shared by daemon banners and audit lines.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

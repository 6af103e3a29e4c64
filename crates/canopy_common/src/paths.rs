//! Path helpers for Canopy.
//!
//! System installs run from /etc and /run; everything falls back to a
//! per-user /tmp location so a development daemon never needs root.

use std::path::PathBuf;

/// System config file path.
pub const CONFIG_PATH: &str = "/etc/canopy/config.toml";

/// Resolve the config path, honoring a `CANOPY_CONFIG` override.
pub fn config_path() -> PathBuf {
    match std::env::var("CANOPY_CONFIG") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(CONFIG_PATH),
    }
}

/// Default instance-lock path. The lock must live at a fixed, well-known
/// location so two daemons cannot both believe they own the bus.
pub fn default_lock_path() -> PathBuf {
    if unsafe { libc::geteuid() } == 0 {
        PathBuf::from("/run/canopy/canopyd.lock")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/canopy-{}/canopyd.lock", uid))
    }
}

//! Error types for Canopy.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CanopyError {
    #[error("instance lock {path} not acquired within {waited_ms}ms - is another canopyd running?")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("schedule error: {0}")]
    Schedule(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

//! Instance guard and shutdown controller.
//!
//! Two canopyd processes driving one bus is unsafe, so startup takes an
//! exclusive flock on a well-known path with a bounded wait and exits
//! non-zero on failure, before any hardware is touched. Shutdown is
//! idempotent: an atomic in-progress latch makes the second (signal-raced)
//! invocation log and return instead of re-running the off-sequence.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use canopy_common::error::CanopyError;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::context::{ControlContext, ControlPlane};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive process lock. Held for the daemon's lifetime; released on
/// drop. The file itself is never unlinked: removing it would let a
/// waiter still polling the old inode and a newcomer locking a fresh
/// file both succeed. The flock, not the file's existence, is what
/// enforces exclusivity.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock, polling up to `wait`. Never blocks longer.
    pub fn acquire(path: &Path, wait: Duration) -> Result<Self, CanopyError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let fd = file.as_raw_fd();
        let deadline = Instant::now() + wait;
        loop {
            let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if ret == 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(CanopyError::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms: wait.as_millis() as u64,
                });
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }

        // Record our pid for operators peeking at the lock file.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;

        info!("[LOCK] instance lock held ({})", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        info!("[LOCK] instance lock released ({})", self.path.display());
    }
}

/// Idempotent shutdown sequencing.
#[derive(Debug, Default)]
pub struct ShutdownController {
    in_progress: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Run the off-sequence exactly once. Returns true for the invocation
    /// that performed it; repeats observe the latch and return false.
    ///
    /// Order is fixed: stop scheduling (no new mutations), take the
    /// control-plane lock (a tick in flight finishes first), force the
    /// model all-OFF, run the hardware off-sequence. The caller releases
    /// the instance lock afterwards, only when this returned true.
    pub async fn shutdown(&self, ctx: &ControlContext, stop: &watch::Sender<bool>) -> bool {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            warn!("[SHUTDOWN] already in progress, ignoring repeat request");
            return false;
        }

        info!("[SHUTDOWN] stopping scheduler and reconciliation loops");
        let _ = stop.send(true);

        let mut plane = ctx.plane.lock().await;
        let ControlPlane { model, driver } = &mut *plane;
        model.force_all_off();
        driver.shutdown_all().await;
        info!("[SHUTDOWN] off-sequence complete");
        true
    }
}

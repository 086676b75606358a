//! The process-wide config file lock.
//!
//! A single advisory exclusive lock guards every read-modify-write of the
//! server config file and the apply step that follows it. The lock is a
//! plain `flock` on a sentinel file, so a human operator (or a second
//! service instance) can cooperate with it.

use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

use nix::fcntl::{Flock, FlockArg};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};

/// How long acquisition retries before giving up.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between non-blocking lock attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// An acquired exclusive lock. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    _flock: Flock<std::fs::File>,
}

impl FileLock {
    /// Acquires the exclusive lock at `path`, creating the sentinel file
    /// if needed. Retries non-blockingly so cancellation is honored
    /// between attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::WgLockAcquireFailed`] when the lock cannot be
    /// taken within the acquire window or the operation is cancelled.
    pub async fn acquire(path: &Path, cancel: &CancellationToken) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + ACQUIRE_TIMEOUT;
        let mut file = open_sentinel(path)?;
        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => {
                    debug!(path = %path.display(), "acquired config lock");
                    return Ok(Self { _flock: flock });
                }
                Err((returned, errno)) if errno == nix::errno::Errno::EWOULDBLOCK => {
                    file = returned;
                }
                Err((_, errno)) => {
                    return Err(Error::new(
                        ErrorKind::WgLockAcquireFailed,
                        format!("locking {}: {errno}", path.display()),
                    ));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(path = %path.display(), "config lock acquisition timed out");
                return Err(Error::new(
                    ErrorKind::WgLockAcquireFailed,
                    format!("timed out locking {}", path.display()),
                ));
            }
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(Error::new(
                        ErrorKind::WgLockAcquireFailed,
                        format!("cancelled while locking {}", path.display()),
                    ));
                }
                () = sleep(RETRY_INTERVAL) => {}
            }
        }
    }
}

fn open_sentinel(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| {
            Error::new(
                ErrorKind::WgLockAcquireFailed,
                format!("opening lock file {}: {e}", path.display()),
            )
        })
}

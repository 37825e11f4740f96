//! Advisory, file-based mutual exclusion for index mutation.
//!
//! The lock must hold across independent OS processes, so it is an
//! exclusive lock file rather than an in-process mutex. Acquisition spins
//! with exponential backoff up to a bounded timeout and then fails cleanly;
//! a crashed holder leaves a sentinel behind that later acquirers detect by
//! age and break.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Initial delay between acquisition attempts.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Cap for the exponential backoff between attempts.
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// A sentinel older than this is assumed to belong to a dead process and is
/// broken. Mutations hold the lock for milliseconds, so five minutes is far
/// past any legitimate hold.
const STALE_SENTINEL_AGE: Duration = Duration::from_secs(300);

/// Contents of the lock file, for diagnosing who holds it.
#[derive(Debug, Serialize, Deserialize)]
struct LockSentinel {
    pid: u32,
    /// Unix timestamp (seconds) at creation.
    created_at: u64,
}

impl LockSentinel {
    fn new() -> Self {
        Self {
            pid: std::process::id(),
            created_at: unix_now(),
        }
    }

    fn is_stale(&self) -> bool {
        let now = unix_now();
        now.saturating_sub(self.created_at)
            > STALE_SENTINEL_AGE.as_secs()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// An acquired advisory lock. Released when dropped.
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
}

impl IndexLock {
    /// Block up to `timeout` trying to create the lock file exclusively.
    ///
    /// Returns [`Error::LockTimeout`] if another process holds the lock for
    /// the whole window; that error is recoverable and the caller may retry.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(mut file) => {
                    let sentinel = LockSentinel::new();
                    let body = serde_json::to_string(&sentinel)?;
                    file.write_all(body.as_bytes())?;
                    debug!(path = %path.display(), pid = sentinel.pid, "acquired index lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::AlreadyExists =>
                {
                    if Self::break_if_stale(path) {
                        continue;
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::LockTimeout {
                            path: path.to_path_buf(),
                            timeout,
                        });
                    }
                    std::thread::sleep(backoff.min(deadline - now));
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Remove the lock file if its sentinel says the holder is long gone.
    /// Returns true when the lock was broken and can be retried immediately.
    fn break_if_stale(path: &Path) -> bool {
        let Ok(body) = std::fs::read_to_string(path) else {
            // Holder may have released between our open and this read.
            return true;
        };
        match serde_json::from_str::<LockSentinel>(&body) {
            Ok(sentinel) if sentinel.is_stale() => {
                warn!(
                    path = %path.display(),
                    pid = sentinel.pid,
                    "breaking stale index lock"
                );
                std::fs::remove_file(path).is_ok()
            }
            // Unparseable sentinels are treated as held: breaking them on
            // a parse hiccup risks two concurrent writers.
            _ => false,
        }
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed to release index lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.lock");

        {
            let _lock =
                IndexLock::acquire(&path, Duration::from_secs(1)).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists(), "lock file removed on drop");
    }

    #[test]
    fn second_acquire_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.lock");

        let _held =
            IndexLock::acquire(&path, Duration::from_secs(1)).unwrap();

        let timeout = Duration::from_millis(150);
        let started = Instant::now();
        let err = IndexLock::acquire(&path, timeout).unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(err.is_recoverable());
        assert!(elapsed >= timeout);
        // Bounded: should fail shortly after the deadline, not spin forever.
        assert!(elapsed < timeout + Duration::from_secs(1));
    }

    #[test]
    fn reacquire_after_release() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.lock");

        drop(IndexLock::acquire(&path, Duration::from_secs(1)).unwrap());
        let second = IndexLock::acquire(&path, Duration::from_millis(100));
        assert!(second.is_ok());
    }

    #[test]
    fn stale_sentinel_is_broken() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.lock");

        let sentinel = LockSentinel {
            pid: 1,
            created_at: unix_now() - STALE_SENTINEL_AGE.as_secs() - 60,
        };
        std::fs::write(&path, serde_json::to_string(&sentinel).unwrap())
            .unwrap();

        let lock = IndexLock::acquire(&path, Duration::from_millis(200));
        assert!(lock.is_ok(), "stale lock should be broken and reacquired");
    }

    #[test]
    fn fresh_foreign_sentinel_is_respected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.lock");

        let sentinel = LockSentinel {
            pid: 1,
            created_at: unix_now(),
        };
        std::fs::write(&path, serde_json::to_string(&sentinel).unwrap())
            .unwrap();

        let err = IndexLock::acquire(&path, Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
    }
}

//! Directory-based mutual exclusion for state-set files.
//!
//! A lock is an ephemeral directory under `locks/`; `create_dir` is atomic
//! on every filesystem we care about, so whoever creates it holds the lock.
//! Acquisition polls on a fixed interval up to a hard timeout, which is
//! surfaced as an error rather than waiting forever. A `stamp` file inside
//! the directory records acquisition time; a lock older than the staleness
//! bound is treated as abandoned by a crashed holder and reclaimed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Tunables for lock acquisition, sourced from [`crate::config::OvdConfig`].
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Give up and raise after waiting this long.
    pub timeout: Duration,
    /// Poll interval between acquisition attempts.
    pub retry_interval: Duration,
    /// A held lock older than this is assumed abandoned and reclaimed.
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(50),
            stale_after: Duration::from_secs(60),
        }
    }
}

/// Lock acquisition failure. Timeout is fatal to the calling operation and
/// must never be swallowed: a stuck lock means real contention or a crashed
/// holder, and operators need to see it.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out acquiring lock '{name}' after {waited_ms}ms")]
    Timeout { name: String, waited_ms: u128 },
    #[error("lock '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// A held lock. Released by removing the directory on drop.
#[derive(Debug)]
pub struct SetLock {
    dir: PathBuf,
    name: String,
}

impl SetLock {
    /// Acquire the lock named `name` under `locks_dir`.
    pub async fn acquire(locks_dir: &Path, name: &str, opts: LockOptions) -> Result<SetLock, LockError> {
        let dir = locks_dir.join(name);
        let started = Instant::now();

        loop {
            match fs::create_dir(&dir) {
                Ok(()) => {
                    write_stamp(&dir);
                    return Ok(SetLock {
                        dir,
                        name: name.to_string(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&dir, opts.stale_after) {
                        tracing::warn!("reclaiming stale lock '{}' at {}", name, dir.display());
                        // Best effort; a concurrent reclaim losing the race is fine.
                        let _ = fs::remove_dir_all(&dir);
                        continue;
                    }
                    if started.elapsed() >= opts.timeout {
                        return Err(LockError::Timeout {
                            name: name.to_string(),
                            waited_ms: started.elapsed().as_millis(),
                        });
                    }
                    tokio::time::sleep(opts.retry_interval).await;
                }
                Err(e) => {
                    return Err(LockError::Io {
                        name: name.to_string(),
                        source: e,
                    })
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SetLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            tracing::warn!("failed to release lock '{}': {}", self.name, e);
        }
    }
}

fn write_stamp(dir: &Path) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if let Err(e) = fs::write(dir.join("stamp"), now.to_string()) {
        tracing::warn!("failed to stamp lock at {}: {}", dir.display(), e);
    }
}

/// A lock with an old (or unreadable-and-old) stamp belongs to a crashed
/// holder. Falls back to directory mtime when the stamp file is missing.
fn lock_is_stale(dir: &Path, stale_after: Duration) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if let Ok(text) = fs::read_to_string(dir.join("stamp")) {
        if let Ok(stamped) = text.trim().parse::<u64>() {
            return now.saturating_sub(stamped) > stale_after.as_secs();
        }
    }

    match fs::metadata(dir).and_then(|m| m.modified()) {
        Ok(modified) => match modified.elapsed() {
            Ok(age) => age > stale_after,
            Err(_) => false,
        },
        // Raced with a release; not stale, just gone.
        Err(_) => false,
    }
}

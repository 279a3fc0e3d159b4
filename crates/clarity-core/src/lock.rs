//! Advisory `fs2` locks for shard appends and global config writes.
//!
//! Both lock kinds are plain lock files next to (never inside) the data they
//! protect; holding the guard holds the lock.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::ErrorCode;

/// Default wait for a shard or config lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const FIRST_BACKOFF: Duration = Duration::from_millis(2);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{}: {} still locked after {waited:?}", ErrorCode::LockContention.code(), path.display())]
    Timeout { path: PathBuf, waited: Duration },
    #[error("{}: lock file: {0}", ErrorCode::IoFailed.code())]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::IoFailed,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Exclusive lock on one lock file, released on drop.
#[derive(Debug)]
struct Held {
    file: File,
    path: PathBuf,
}

impl Held {
    /// Poll `try_lock_exclusive` with doubling backoff until `timeout`.
    fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        let mut backoff = FIRST_BACKOFF;
        while file.try_lock_exclusive().is_err() {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            thread::sleep(backoff.min(timeout - waited));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        debug!(path = %path.display(), "lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for Held {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Serializes appends to one replica's shard. Lives at
/// `.clarity/locks/events.<replicaId>.lock` so it never lands in a commit.
#[derive(Debug)]
pub struct ShardLock(Held);

impl ShardLock {
    /// # Errors
    ///
    /// [`LockError::Timeout`] when another writer keeps the lock past
    /// `timeout`; [`LockError::Io`] when the lock file can't be opened.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Held::acquire(path, timeout).map(Self)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0.path
    }
}

/// Serializes writers of the global `config.json`.
#[derive(Debug)]
pub struct ConfigLock(Held);

impl ConfigLock {
    /// # Errors
    ///
    /// See [`ShardLock::acquire`].
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        Held::acquire(path, timeout).map(Self)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn released_on_drop() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("locks").join("events.r1.lock");
        let lock = ShardLock::acquire(&path, Duration::from_millis(50)).expect("first");
        assert_eq!(lock.path(), path);
        drop(lock);
        ShardLock::acquire(&path, Duration::from_millis(50)).expect("second");
    }

    #[test]
    fn held_lock_times_out_with_contention_code() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("held.lock");
        let _held = ShardLock::acquire(&path, Duration::from_millis(50)).expect("held");
        let err = ShardLock::acquire(&path, Duration::from_millis(20)).expect_err("contended");
        assert!(matches!(&err, LockError::Timeout { path: p, .. } if *p == path));
        assert_eq!(err.code(), ErrorCode::LockContention);
        assert!(err.hint().is_some());
        assert!(err.to_string().starts_with("E5004"));
    }

    #[test]
    fn waiter_gets_the_lock_once_released() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.lock");
        let (locked_tx, locked_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let in_thread = path.clone();
        let holder = thread::spawn(move || {
            let _lock = ConfigLock::acquire(&in_thread, Duration::from_millis(200)).expect("holder");
            locked_tx.send(()).expect("signal");
            release_rx.recv().expect("release");
        });

        locked_rx.recv().expect("holder locked");
        assert!(ConfigLock::acquire(&path, Duration::from_millis(20)).is_err());
        release_tx.send(()).expect("release");
        holder.join().expect("join");
        ConfigLock::acquire(&path, Duration::from_millis(200)).expect("after release");
    }
}

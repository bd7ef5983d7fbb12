//! System-wide named locks.
//!
//! A lock is identified by its name alone. Two acquisition modes exist:
//! [`NamedLocks::acquire`] blocks until the lock is free and guards short
//! read-modify-write sections; [`NamedLocks::try_acquire`] returns `None`
//! immediately when the lock is held and wraps whole stage invocations, which
//! the scheduler will simply run again on its next tick.

use crate::StoreError;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

pub trait NamedLocks: Send + Sync {
    /// Wait for the named lock and take it.
    fn acquire(&self, name: &str) -> Result<LockGuard, StoreError>;

    /// Take the named lock if it is free, otherwise return None without waiting.
    fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>, StoreError>;
}

/// Holds a named lock until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    name: String,
    held: Held,
}

enum Held {
    File(File),
    Memory(Arc<MemoryState>),
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match &self.held {
            Held::File(file) => {
                // closing the descriptor would also release it
                unsafe {
                    libc::flock(file.as_raw_fd(), libc::LOCK_UN);
                }
            }
            Held::Memory(state) => state.release(&self.name),
        }
    }
}

/// `flock(2)` based locks, one lock file per name under `dir`.
///
/// Lock files are created on demand and never removed. The kernel drops the
/// lock when the holding process exits, so a crashed stage cannot leave a
/// stale lock behind.
#[derive(Debug, Clone)]
pub struct FileLocks {
    dir: PathBuf,
}

impl FileLocks {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileLocks { dir: dir.into() }
    }

    /// Path of the lock file backing `name`.
    pub fn lock_path(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| match c {
                'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '-' | '.' => c,
                _ => '_',
            })
            .collect();
        self.dir.join(format!("{safe}.lock"))
    }

    fn open(&self, name: &str) -> Result<File, StoreError> {
        let lock_err = |source| StoreError::Lock {
            name: name.to_string(),
            source,
        };
        std::fs::create_dir_all(&self.dir).map_err(lock_err)?;
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(name))
            .map_err(lock_err)
    }

    fn flock(&self, name: &str, operation: libc::c_int) -> Result<Option<File>, StoreError> {
        let file = self.open(name)?;
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
            if rc == 0 {
                return Ok(Some(file));
            }
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EWOULDBLOCK) => return Ok(None),
                _ => {
                    return Err(StoreError::Lock {
                        name: name.to_string(),
                        source: err,
                    })
                }
            }
        }
    }
}

impl NamedLocks for FileLocks {
    fn acquire(&self, name: &str) -> Result<LockGuard, StoreError> {
        match self.flock(name, libc::LOCK_EX)? {
            Some(file) => Ok(LockGuard {
                name: name.to_string(),
                held: Held::File(file),
            }),
            // a blocking flock never reports EWOULDBLOCK
            None => Err(StoreError::Lock {
                name: name.to_string(),
                source: std::io::Error::from_raw_os_error(libc::EWOULDBLOCK),
            }),
        }
    }

    fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>, StoreError> {
        Ok(self
            .flock(name, libc::LOCK_EX | libc::LOCK_NB)?
            .map(|file| LockGuard {
                name: name.to_string(),
                held: Held::File(file),
            }))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl MemoryState {
    fn release(&self, name: &str) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(name);
        self.released.notify_all();
    }
}

/// In-process locks with the same semantics as [`FileLocks`], for tests and
/// single-process embedding. Clones share the same lock table.
#[derive(Debug, Clone, Default)]
pub struct MemoryLocks {
    state: Arc<MemoryState>,
}

impl MemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    fn guard(&self, name: &str) -> LockGuard {
        LockGuard {
            name: name.to_string(),
            held: Held::Memory(self.state.clone()),
        }
    }
}

impl NamedLocks for MemoryLocks {
    fn acquire(&self, name: &str) -> Result<LockGuard, StoreError> {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while held.contains(name) {
            held = self
                .state
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(name.to_string());
        Ok(self.guard(name))
    }

    fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>, StoreError> {
        let mut held = self
            .state
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !held.insert(name.to_string()) {
            return Ok(None);
        }
        Ok(Some(self.guard(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn check_try_and_skip(locks: &dyn NamedLocks) -> anyhow::Result<()> {
        let first = locks.try_acquire("convert")?;
        assert!(first.is_some());
        assert!(locks.try_acquire("convert")?.is_none());
        // an unrelated name is independent
        assert!(locks.try_acquire("tandem")?.is_some());
        drop(first);
        assert!(locks.try_acquire("convert")?.is_some());
        Ok(())
    }

    #[test]
    fn test_file_try_and_skip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        check_try_and_skip(&FileLocks::new(dir.path().join("locks")))
    }

    #[test]
    fn test_memory_try_and_skip() -> anyhow::Result<()> {
        check_try_and_skip(&MemoryLocks::new())
    }

    #[test]
    fn test_lock_names_are_sanitized() {
        let locks = FileLocks::new("/tmp/l");
        assert_eq!(
            locks.lock_path("queue:/data/conversion list"),
            PathBuf::from("/tmp/l/queue__data_conversion_list.lock")
        );
    }

    fn check_blocking_exclusion(locks: &(dyn NamedLocks + Sync)) {
        let inside = AtomicUsize::new(0);
        let overlaps = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..5 {
                        let _guard = locks.acquire("queue").unwrap();
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_file_blocking_exclusion() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        check_blocking_exclusion(&FileLocks::new(dir.path()));
        Ok(())
    }

    #[test]
    fn test_memory_blocking_exclusion() {
        let locks = MemoryLocks::new();
        check_blocking_exclusion(&locks);
        assert!(!locks.is_held("queue"));
    }
}

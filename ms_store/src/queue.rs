//! Crash-safe FIFO queue stored as a line-per-entry text file.
//!
//! Every mutation happens under the queue's named lock, held only for the
//! read-modify-write itself. A dequeue writes the remaining lines to a
//! temporary file in the same directory and renames it over the queue, so an
//! interrupted dequeue leaves the queue byte-identical to its prior state.

use crate::file::{self, append_raw, append_records, decode_line, is_blank, split_lines};
use crate::locks::NamedLocks;
use crate::{IoContext, StoreError};
use log::warn;
use ms_types::{RecordFormat, SampleIdentity, SchemaProfile};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

#[derive(Clone)]
pub struct DurableQueue {
    path: PathBuf,
    lock_name: String,
    locks: Arc<dyn NamedLocks>,
    format: RecordFormat,
    profile: SchemaProfile,
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("path", &self.path)
            .field("lock_name", &self.lock_name)
            .field("format", &self.format)
            .field("profile", &self.profile)
            .finish()
    }
}

/// A dequeue that has been staged in a temporary file but not yet committed.
/// Dropping it without calling [`PendingDequeue::commit`] discards the
/// temporary file and leaves the queue untouched.
pub(crate) struct PendingDequeue {
    entry: Option<SampleIdentity>,
    quarantined: Vec<u8>,
    staged: NamedTempFile,
    target: PathBuf,
    quarantine: PathBuf,
}

impl PendingDequeue {
    pub(crate) fn commit(self) -> Result<Option<SampleIdentity>, StoreError> {
        // Quarantine first: a crash between the two steps duplicates a bad line
        // in the quarantine file but never loses it.
        append_raw(&self.quarantine, &self.quarantined)?;
        self.staged
            .persist(&self.target)
            .map_err(|e| StoreError::Persist {
                path: self.target.clone(),
                source: e.error,
            })?;
        if let Some(dir) = self.target.parent() {
            file::sync_dir(dir);
        }
        Ok(self.entry)
    }
}

impl DurableQueue {
    /// A queue stored at `path`, guarded by the named lock `lock_name`.
    pub fn new(
        path: impl Into<PathBuf>,
        lock_name: impl Into<String>,
        locks: Arc<dyn NamedLocks>,
        profile: SchemaProfile,
    ) -> Self {
        DurableQueue {
            path: path.into(),
            lock_name: lock_name.into(),
            locks,
            format: RecordFormat::default(),
            profile,
        }
    }

    /// Choose the format used for newly written lines. Reading accepts both.
    pub fn with_format(mut self, format: RecordFormat) -> Self {
        self.format = format;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Where lines that fail to decode are moved.
    pub fn quarantine_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".quarantine");
        PathBuf::from(name)
    }

    /// Append entries in order, creating the queue file if absent.
    pub fn enqueue(&self, entries: &[SampleIdentity]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let _guard = self.locks.acquire(&self.lock_name)?;
        append_records(&self.path, entries, self.format, self.profile)
    }

    /// Remove and return the earliest entry, or None if the queue holds none.
    ///
    /// Malformed lines met before the first valid entry are moved to the
    /// quarantine file in the same commit instead of blocking the queue.
    pub fn dequeue_one(&self) -> Result<Option<SampleIdentity>, StoreError> {
        let _guard = self.locks.acquire(&self.lock_name)?;
        match self.prepare_dequeue()? {
            Some(pending) => pending.commit(),
            None => Ok(None),
        }
    }

    /// Stage a dequeue. Caller holds the queue lock.
    /// Returns None when there is nothing to rewrite.
    pub(crate) fn prepare_dequeue(&self) -> Result<Option<PendingDequeue>, StoreError> {
        let Some(bytes) = file::read_bytes(&self.path)? else {
            return Ok(None);
        };
        if bytes.is_empty() {
            return Ok(None);
        }

        let lines = split_lines(&bytes);
        let mut entry = None;
        let mut quarantined = Vec::new();
        let mut consumed = 0;
        for line in &lines {
            consumed += 1;
            if is_blank(line) {
                continue;
            }
            match decode_line(line, self.profile) {
                Ok(id) => {
                    entry = Some(id);
                    break;
                }
                Err(reason) => {
                    warn!(
                        "quarantining malformed entry in {}: {reason}",
                        self.path.display()
                    );
                    quarantined.extend_from_slice(line);
                    if !line.ends_with(b"\n") {
                        quarantined.push(b'\n');
                    }
                }
            }
        }

        let dir = self.dir();
        let mut staged = NamedTempFile::new_in(dir).at(dir)?;
        for line in &lines[consumed..] {
            staged.write_all(line).at(staged.path().to_path_buf())?;
        }
        staged.as_file().sync_all().at(staged.path().to_path_buf())?;

        Ok(Some(PendingDequeue {
            entry,
            quarantined,
            staged,
            target: self.path.clone(),
            quarantine: self.quarantine_path(),
        }))
    }

    /// Put `entry` back in front of every queued entry, for a caller that
    /// dequeued it but could not start on it. The file is replaced atomically
    /// as in a dequeue.
    pub fn requeue_front(&self, entry: &SampleIdentity) -> Result<(), StoreError> {
        let _guard = self.locks.acquire(&self.lock_name)?;
        let rest = file::read_bytes(&self.path)?.unwrap_or_default();
        let dir = self.dir();
        std::fs::create_dir_all(dir).at(dir)?;
        let mut staged = NamedTempFile::new_in(dir).at(dir)?;
        let head = self.format.encode(entry, self.profile);
        let tmp = staged.path().to_path_buf();
        staged.write_all(head.as_bytes()).at(tmp.clone())?;
        staged.write_all(&rest).at(tmp.clone())?;
        staged.as_file().sync_all().at(tmp)?;
        staged
            .persist(&self.path)
            .map_err(|e| StoreError::Persist {
                path: self.path.clone(),
                source: e.error,
            })?;
        file::sync_dir(dir);
        Ok(())
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// All well-formed entries in FIFO order, read under the queue lock.
    pub fn entries(&self) -> Result<Vec<SampleIdentity>, StoreError> {
        let _guard = self.locks.acquire(&self.lock_name)?;
        let Some(bytes) = file::read_bytes(&self.path)? else {
            return Ok(Vec::new());
        };
        Ok(file::decode_all(&bytes, self.profile, |_, reason| {
            warn!("skipping malformed entry in {}: {reason}", self.path.display());
        }))
    }

    /// True if an entry with this (project, sample) key is queued.
    pub fn contains(&self, project: &str, sample: &str) -> Result<bool, StoreError> {
        Ok(self.entries()?.iter().any(|id| id.has_key(project, sample)))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::{FileLocks, MemoryLocks};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn queue_in(dir: &Path, locks: Arc<dyn NamedLocks>, profile: SchemaProfile) -> DurableQueue {
        DurableQueue::new(dir.join("db/conversion.list"), "DB_CONV_LOCK", locks, profile)
    }

    fn ids(n: usize) -> Vec<SampleIdentity> {
        (0..n)
            .map(|i| SampleIdentity::new("P1", format!("S{i}")))
            .collect()
    }

    #[test]
    fn test_fifo_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let q = queue_in(dir.path(), Arc::new(MemoryLocks::new()), SchemaProfile::Minimal);

        assert_eq!(q.dequeue_one()?, None);
        q.enqueue(&ids(2))?;
        q.enqueue(&[SampleIdentity::new("P2", "X")])?;
        assert_eq!(q.len()?, 3);

        assert_eq!(q.dequeue_one()?, Some(SampleIdentity::new("P1", "S0")));
        assert_eq!(q.dequeue_one()?, Some(SampleIdentity::new("P1", "S1")));
        assert_eq!(q.dequeue_one()?, Some(SampleIdentity::new("P2", "X")));
        assert_eq!(q.dequeue_one()?, None);
        assert!(q.is_empty()?);
        assert_eq!(std::fs::read(q.path())?, b"");
        Ok(())
    }

    #[test]
    fn test_uncommitted_dequeue_leaves_queue_untouched() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let q = queue_in(dir.path(), Arc::new(MemoryLocks::new()), SchemaProfile::Minimal);
        std::fs::create_dir_all(q.path().parent().unwrap())?;
        std::fs::write(q.path(), "P1\tS1\nP1\tS2\n")?;
        let before = std::fs::read(q.path())?;

        // "crash" after the temporary file was written but before the rename
        let pending = q.prepare_dequeue()?.unwrap();
        let staged = pending.staged.path().to_path_buf();
        assert!(staged.exists());
        drop(pending);

        assert_eq!(std::fs::read(q.path())?, before);
        assert!(!staged.exists());

        // the same dequeue, committed
        let pending = q.prepare_dequeue()?.unwrap();
        assert_eq!(pending.commit()?, Some(SampleIdentity::new("P1", "S1")));
        assert_eq!(std::fs::read(q.path())?, b"P1\tS2\n");
        Ok(())
    }

    #[test]
    fn test_requeue_front() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let q = queue_in(dir.path(), Arc::new(MemoryLocks::new()), SchemaProfile::Minimal);
        q.requeue_front(&SampleIdentity::new("P1", "S9"))?;
        assert_eq!(q.entries()?, vec![SampleIdentity::new("P1", "S9")]);

        q.enqueue(&ids(2))?;
        let first = q.dequeue_one()?.unwrap();
        q.requeue_front(&first)?;
        assert_eq!(
            q.entries()?,
            vec![
                SampleIdentity::new("P1", "S9"),
                SampleIdentity::new("P1", "S0"),
                SampleIdentity::new("P1", "S1")
            ]
        );
        assert_eq!(q.dequeue_one()?, Some(SampleIdentity::new("P1", "S9")));
        q.requeue_front(&SampleIdentity::new("P1", "S9"))?;
        assert_eq!(q.dequeue_one()?, Some(SampleIdentity::new("P1", "S9")));
        assert_eq!(q.dequeue_one()?, Some(SampleIdentity::new("P1", "S0")));
        Ok(())
    }

    #[test]
    fn test_malformed_entries_are_quarantined() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let q = queue_in(dir.path(), Arc::new(MemoryLocks::new()), SchemaProfile::Extended);
        std::fs::create_dir_all(q.path().parent().unwrap())?;
        std::fs::write(q.path(), "\nbroken\n~1\tP1\tS\\x\nP1\tS1\tt\th\nP1\tS2\n")?;

        assert_eq!(
            q.dequeue_one()?,
            Some(SampleIdentity::extended("P1", "S1", "t", "h"))
        );
        assert_eq!(
            std::fs::read_to_string(q.quarantine_path())?,
            "broken\n~1\tP1\tS\\x\n"
        );
        assert_eq!(std::fs::read_to_string(q.path())?, "P1\tS2\n");
        assert_eq!(q.dequeue_one()?, Some(SampleIdentity::new("P1", "S2")));
        assert_eq!(q.dequeue_one()?, None);
        Ok(())
    }

    #[test]
    fn test_queue_of_only_bad_lines_drains_to_empty() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let q = queue_in(dir.path(), Arc::new(MemoryLocks::new()), SchemaProfile::Minimal);
        std::fs::create_dir_all(q.path().parent().unwrap())?;
        std::fs::write(q.path(), "only-one-field")?;
        assert_eq!(q.dequeue_one()?, None);
        assert_eq!(std::fs::read(q.path())?, b"");
        assert_eq!(
            std::fs::read_to_string(q.quarantine_path())?,
            "only-one-field\n"
        );
        Ok(())
    }

    #[test]
    fn test_v1_and_legacy_interleave() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let q = queue_in(dir.path(), Arc::new(MemoryLocks::new()), SchemaProfile::Minimal);
        std::fs::create_dir_all(q.path().parent().unwrap())?;
        std::fs::write(q.path(), "P1\tS1\n")?;
        q.enqueue(&[SampleIdentity::new("P\t2", "S2")])?;
        assert_eq!(std::fs::read_to_string(q.path())?, "P1\tS1\n~1\tP\\t2\tS2\n");
        assert_eq!(q.dequeue_one()?, Some(SampleIdentity::new("P1", "S1")));
        assert_eq!(q.dequeue_one()?, Some(SampleIdentity::new("P\t2", "S2")));
        Ok(())
    }

    #[test]
    fn test_concurrent_dequeue_is_exactly_once() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let locks: Arc<dyn NamedLocks> = Arc::new(FileLocks::new(dir.path().join("locks")));
        let q = queue_in(dir.path(), locks, SchemaProfile::Minimal);
        let expected = ids(60);
        q.enqueue(&expected)?;

        let taken = Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for _ in 0..4 {
                // every worker opens its own handle, like a separate process would
                let q = q.clone();
                let taken = &taken;
                let expected = &expected;
                s.spawn(move || {
                    let mut mine = Vec::new();
                    while let Some(id) = q.dequeue_one().unwrap() {
                        mine.push(id);
                    }
                    // each worker sees its entries in queue order
                    let order: Vec<_> = mine
                        .iter()
                        .map(|id| expected.iter().position(|e| e == id).unwrap())
                        .collect();
                    assert!(order.windows(2).all(|w| w[0] < w[1]));
                    taken.lock().unwrap().extend(mine);
                });
            }
        });

        let taken = taken.into_inner().unwrap();
        assert_eq!(taken.len(), expected.len());
        let unique: HashSet<_> = taken.iter().collect();
        assert_eq!(unique.len(), expected.len());
        assert!(q.is_empty()?);
        Ok(())
    }
}

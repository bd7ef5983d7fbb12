//! The append-only ledger of samples already admitted into the pipeline.

use crate::file::{self, append_records};
use crate::locks::NamedLocks;
use crate::StoreError;
use log::warn;
use ms_types::{RecordFormat, SampleIdentity, SampleKey, SchemaProfile};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Set of sample keys that have entered the pipeline. It never shrinks; a key
/// is written at most once.
#[derive(Clone)]
pub struct ImportedSet {
    path: PathBuf,
    lock_name: String,
    locks: Arc<dyn NamedLocks>,
    format: RecordFormat,
    profile: SchemaProfile,
}

impl ImportedSet {
    pub fn new(
        path: impl Into<PathBuf>,
        lock_name: impl Into<String>,
        locks: Arc<dyn NamedLocks>,
        profile: SchemaProfile,
    ) -> Self {
        ImportedSet {
            path: path.into(),
            lock_name: lock_name.into(),
            locks,
            format: RecordFormat::default(),
            profile,
        }
    }

    pub fn with_format(mut self, format: RecordFormat) -> Self {
        self.format = format;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Caller holds the ledger lock.
    fn read_keys(&self) -> Result<HashSet<SampleKey>, StoreError> {
        let Some(bytes) = file::read_bytes(&self.path)? else {
            return Ok(HashSet::new());
        };
        Ok(file::decode_all(&bytes, self.profile, |_, reason| {
            warn!("ignoring malformed ledger line in {}: {reason}", self.path.display());
        })
        .iter()
        .map(SampleIdentity::key)
        .collect())
    }

    pub fn load(&self) -> Result<HashSet<SampleKey>, StoreError> {
        let _guard = self.locks.acquire(&self.lock_name)?;
        self.read_keys()
    }

    pub fn contains(&self, project: &str, sample: &str) -> Result<bool, StoreError> {
        Ok(self
            .load()?
            .contains(&(project.to_string(), sample.to_string())))
    }

    /// Record the candidates that are not yet in the ledger and return them,
    /// in input order. Membership check and append form one critical section,
    /// and duplicates within `candidates` are collapsed to their first occurrence.
    pub fn admit(&self, candidates: &[SampleIdentity]) -> Result<Vec<SampleIdentity>, StoreError> {
        let _guard = self.locks.acquire(&self.lock_name)?;
        let mut seen = self.read_keys()?;
        let fresh: Vec<SampleIdentity> = candidates
            .iter()
            .filter(|id| seen.insert(id.key()))
            .cloned()
            .collect();
        append_records(&self.path, &fresh, self.format, self.profile)?;
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::MemoryLocks;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_admit_is_idempotent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = ImportedSet::new(
            dir.path().join("imported.list"),
            "DB_IMPORTED_LOCK",
            Arc::new(MemoryLocks::new()),
            SchemaProfile::Extended,
        );
        let a = SampleIdentity::extended("P1", "S1", "trypsin", "human");
        let b = SampleIdentity::extended("P1", "S2", "trypsin", "human");

        assert_eq!(ledger.admit(&[a.clone(), b.clone(), a.clone()])?, vec![a.clone(), b.clone()]);
        assert!(ledger.contains("P1", "S1")?);
        assert!(ledger.admit(&[b.clone(), a.clone()])?.is_empty());

        // uniqueness is on (project, sample): a changed protocol is not a new sample
        let a_again = SampleIdentity::extended("P1", "S1", "lysc", "human");
        assert!(ledger.admit(&[a_again])?.is_empty());

        let lines = std::fs::read_to_string(ledger.path())?;
        assert_eq!(lines.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn test_reads_legacy_ledger() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("imported.list");
        std::fs::write(&path, "P1\tS1\ttrypsin\thuman\nnot a record\n")?;
        let ledger = ImportedSet::new(
            &path,
            "DB_IMPORTED_LOCK",
            Arc::new(MemoryLocks::new()),
            SchemaProfile::Extended,
        );
        assert_eq!(ledger.load()?.len(), 1);
        assert!(ledger.contains("P1", "S1")?);
        Ok(())
    }
}

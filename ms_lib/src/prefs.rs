//! Local caches of the board's preference tables.
//!
//! The board keeps two reference tables next to the sample list: search
//! preferences per proteolysis protocol and databases per organism. The
//! `prefs` command mirrors both to tab-separated files so the search stages
//! can resolve them without a board round trip.

use crate::context::PipelineContext;
use anyhow::{anyhow, Context, Result};
use log::info;
use ms_board::{normalize_header, Table};
use ms_store::NamedLocks;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const PREFS_LOCK: &str = "prefs";

pub const TANDEM_DB: &str = "Tandem_db";
pub const MASCOT_DB: &str = "Mascot_db";
pub const TANDEM_PREFS: &str = "Tandem_prefs";
pub const MASCOT_PREFS: &str = "Mascot_prefs";
pub const POSTPROC_PREFS: &str = "Postproc_prefs";

const PROTOCOL_CACHE: &str = "protocol.tsv";
const ORGANISM_CACHE: &str = "organism.tsv";

fn write_table(path: &Path, table: &Table) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(dir).with_context(|| dir.display().to_string())?;
    let mut tmp = NamedTempFile::new_in(dir).with_context(|| dir.display().to_string())?;
    {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(tmp.as_file_mut());
        writer.write_record(&table.header)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
    }
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| path.display().to_string())?;
    Ok(())
}

/// Mirror the protocol and organism tables to `<db_root>`, replacing each cache
/// file atomically.
pub fn refresh_prefs(ctx: &PipelineContext) -> Result<()> {
    let _guard = ctx.locks.acquire(PREFS_LOCK)?;
    let db_root = &ctx.config.paths.db_root;
    for (range, name) in [
        (&ctx.config.board.protocol_range, PROTOCOL_CACHE),
        (&ctx.config.board.organism_range, ORGANISM_CACHE),
    ] {
        let table = ctx.registry.board().fetch(range)?;
        let path = db_root.join(name);
        write_table(&path, &table)?;
        info!("cached {} rows of {range} in {}", table.rows.len(), path.display());
    }
    Ok(())
}

/// One cached table keyed by its first column.
#[derive(Debug)]
struct PrefTable {
    path: PathBuf,
    header: Vec<String>,
    rows: HashMap<String, Vec<String>>,
}

impl PrefTable {
    fn read(path: &Path) -> Result<PrefTable> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)
            .with_context(|| {
                format!(
                    "reading {}; run the prefs command to create it",
                    path.display()
                )
            })?;
        let header = reader.headers()?.iter().map(normalize_header).collect();
        let mut rows = HashMap::new();
        for record in reader.records() {
            let record = record.with_context(|| path.display().to_string())?;
            let Some(key) = record.get(0).map(str::trim).filter(|k| !k.is_empty()) else {
                continue;
            };
            rows.insert(key.to_string(), record.iter().map(String::from).collect());
        }
        Ok(PrefTable {
            path: path.to_path_buf(),
            header,
            rows,
        })
    }

    fn get(&self, key: &str, column: &str) -> Result<&str> {
        let col = self
            .header
            .iter()
            .position(|h| *h == normalize_header(column))
            .ok_or_else(|| anyhow!("no column {column} in {}", self.path.display()))?;
        self.rows
            .get(key)
            .and_then(|row| row.get(col))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow!("no {column} for '{key}' in {}", self.path.display()))
    }
}

#[derive(Debug)]
pub struct Prefs {
    prefs_dir: PathBuf,
    protocols: PrefTable,
    organisms: PrefTable,
}

impl Prefs {
    pub fn load(db_root: &Path, prefs_dir: &Path, locks: &dyn NamedLocks) -> Result<Prefs> {
        let _guard = locks.acquire(PREFS_LOCK)?;
        Ok(Prefs {
            prefs_dir: prefs_dir.to_path_buf(),
            protocols: PrefTable::read(&db_root.join(PROTOCOL_CACHE))?,
            organisms: PrefTable::read(&db_root.join(ORGANISM_CACHE))?,
        })
    }

    /// Database name for `organism` from the column `header`, e.g. [`MASCOT_DB`].
    pub fn database(&self, organism: &str, header: &str) -> Result<&str> {
        self.organisms.get(organism, header)
    }

    /// Preference file for `protocol` from the column `header`, resolved
    /// against the preference directory.
    pub fn prefs_file(&self, protocol: &str, header: &str) -> Result<PathBuf> {
        Ok(self.prefs_dir.join(self.protocols.get(protocol, header)?))
    }
}

//! Everything a stage invocation needs, built once per process and passed
//! down explicitly.

use crate::layout::Layout;
use crate::prefs::Prefs;
use crate::project_log::ProjectLog;
use anyhow::{Context, Result};
use log::warn;
use ms_board::{BoardError, Registry, SheetsBoard, StatusBoard};
use ms_config::Config;
use ms_store::{DurableQueue, FileLocks, ImportedSet, NamedLocks};
use ms_types::{RecordFormat, SampleIdentity, SampleStatus, SchemaProfile, SearchEngine};
use std::sync::Arc;

/// Name of the queue feeding the conversion stage.
pub const CONVERSION_QUEUE: &str = "conversion";

/// Lock guarding the imported-samples ledger.
pub const IMPORTED_LOCK: &str = "imported.ledger";

pub struct PipelineContext {
    pub config: Config,
    pub layout: Layout,
    pub registry: Registry,
    pub locks: Arc<dyn NamedLocks>,
}

impl PipelineContext {
    pub fn new(config: Config, board: Box<dyn StatusBoard>, locks: Arc<dyn NamedLocks>) -> Self {
        let layout = Layout::new(&config.paths);
        let registry = Registry::new(board, config.schema.layout.clone());
        PipelineContext {
            config,
            layout,
            registry,
            locks,
        }
    }

    /// Production wiring: the hosted spreadsheet and `flock` locks under the
    /// configured lock directory.
    pub fn from_config(config: Config) -> Result<Self> {
        for dir in [&config.paths.lock_dir, &config.paths.db_root] {
            std::fs::create_dir_all(dir).with_context(|| dir.display().to_string())?;
        }
        let board = SheetsBoard::from_token_file(
            &config.board.api_base,
            &config.board.spreadsheet_id,
            &config.board.token_file,
            config.board.timeout(),
        )
        .context("connecting to the status board")?;
        let locks = FileLocks::new(&config.paths.lock_dir);
        Ok(PipelineContext::new(config, Box::new(board), Arc::new(locks)))
    }

    pub fn profile(&self) -> SchemaProfile {
        self.config.schema.profile()
    }

    fn record_format(&self) -> RecordFormat {
        self.config.pipeline.record_format
    }

    /// The queue `<db_root>/<name>.list`, guarded by the lock `<name>.queue`.
    pub fn queue(&self, name: &str) -> DurableQueue {
        DurableQueue::new(
            self.config.paths.db_root.join(format!("{name}.list")),
            format!("{name}.queue"),
            Arc::clone(&self.locks),
            self.profile(),
        )
        .with_format(self.record_format())
    }

    pub fn conversion_queue(&self) -> DurableQueue {
        self.queue(CONVERSION_QUEUE)
    }

    pub fn search_queue(&self, engine: SearchEngine) -> DurableQueue {
        self.queue(engine.queue_name())
    }

    /// Queues of the enabled search engines, in configured order.
    pub fn search_queues(&self) -> Vec<DurableQueue> {
        self.config
            .pipeline
            .engines
            .iter()
            .map(|&e| self.search_queue(e))
            .collect()
    }

    pub fn imported(&self) -> ImportedSet {
        ImportedSet::new(
            self.config.paths.db_root.join("imported.list"),
            IMPORTED_LOCK,
            Arc::clone(&self.locks),
            self.profile(),
        )
        .with_format(self.record_format())
    }

    pub fn project_log(&self, project: &str) -> ProjectLog {
        ProjectLog::new(
            project,
            &self.layout.project_dir(project),
            &self.config.paths.log_name,
        )
    }

    /// Read the local preference caches written by `refresh_prefs`.
    pub fn prefs(&self) -> Result<Prefs> {
        Prefs::load(
            &self.config.paths.db_root,
            &self.config.paths.prefs_dir,
            self.locks.as_ref(),
        )
    }

    /// Fill in the configured protocol and organism where the registry row
    /// carries none, as with the minimal profile.
    pub fn complete(&self, mut id: SampleIdentity) -> SampleIdentity {
        if id.protocol.is_none() {
            id.protocol = Some(self.config.schema.default_protocol.clone());
        }
        if id.organism.is_none() {
            id.organism = Some(self.config.schema.default_organism.clone());
        }
        id
    }

    pub fn protocol<'a>(&'a self, id: &'a SampleIdentity) -> &'a str {
        id.protocol
            .as_deref()
            .unwrap_or(&self.config.schema.default_protocol)
    }

    pub fn organism<'a>(&'a self, id: &'a SampleIdentity) -> &'a str {
        id.organism
            .as_deref()
            .unwrap_or(&self.config.schema.default_organism)
    }

    /// Write a sample status. A failed write is logged and reported as false;
    /// by the time statuses are written the sample's own work is already
    /// committed to the queues.
    pub fn set_status(&self, id: &SampleIdentity, status: &SampleStatus) -> bool {
        match self.registry.set_status(id, status) {
            Ok(()) => true,
            Err(err) => {
                warn!("could not set status of {id} to '{status}': {err}");
                false
            }
        }
    }

    /// Write a status the sample's progress depends on. An unreachable board
    /// is returned so the caller can leave the work for a later run; any
    /// other write failure is logged as in [`PipelineContext::set_status`].
    pub fn set_status_or_unavailable(
        &self,
        id: &SampleIdentity,
        status: &SampleStatus,
    ) -> Result<(), BoardError> {
        match self.registry.set_status(id, status) {
            Err(err) if err.is_unavailable() => Err(err),
            Err(err) => {
                warn!("could not set status of {id} to '{status}': {err}");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Like [`PipelineContext::set_status`] for an arbitrary registry column.
    pub fn set_column(&self, id: &SampleIdentity, header: &str, value: &str) -> bool {
        match self.registry.set_column(id, header, value) {
            Ok(()) => true,
            Err(err) => {
                warn!("could not set {header} of {id} to '{value}': {err}");
                false
            }
        }
    }
}

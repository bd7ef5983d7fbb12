//! Fixtures for driving stages against a temporary deployment: a scratch
//! directory tree, an in-memory board and real `flock` locks.

use crate::context::PipelineContext;
use crate::prefs::refresh_prefs;
use anyhow::{anyhow, Context, Result};
use ms_board::MemoryBoard;
use ms_config::{Config, PathsConfig};
use ms_store::{FileLocks, NamedLocks};
use ms_types::SampleIdentity;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Header of the sample list sheet used by the fixtures.
pub const LIST_HEADER: [&str; 8] = [
    "Project title",
    "Sample ID",
    "Proteolysis protocol",
    "Organism",
    "Uploaded",
    "Status",
    "Scaffold sample",
    "Run scaffold",
];

pub const PROTOCOL: &str = "trypsin";
pub const ORGANISM: &str = "human";

pub struct TestPipeline {
    pub dir: TempDir,
    pub board: MemoryBoard,
    pub locks: Arc<dyn NamedLocks>,
    pub config: Config,
}

impl TestPipeline {
    /// Tools default to shell stand-ins: conversion touches the peak list,
    /// everything else succeeds without output.
    pub fn new() -> Result<TestPipeline> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        let mut config = Config {
            paths: PathsConfig {
                raw_root: root.join("raws"),
                data_root: root.join("proc"),
                db_root: root.join("db"),
                lock_dir: root.join("locks"),
                prefs_dir: root.join("prefs"),
                fasta_dir: root.join("fasta"),
                log_name: "msauto.log".to_string(),
            },
            ..Config::default()
        };
        config.tools.conversion_cmd = "touch {outfile}".to_string();
        config.tools.tandem_cmd = "true".to_string();
        config.tools.scaffold_cmd = "true".to_string();
        config.tools.postproc_cmd = "true".to_string();
        config.tools.timeout_secs = 30;
        config.mascot.cgi_url = "http://127.0.0.1:9/mascot/cgi".to_string();
        config.mascot.timeout_secs = 5;
        for dir in [&config.paths.raw_root, &config.paths.db_root, &config.paths.prefs_dir] {
            fs::create_dir_all(dir)?;
        }
        let locks = Arc::new(FileLocks::new(&config.paths.lock_dir));
        Ok(TestPipeline {
            dir,
            board: MemoryBoard::new(),
            locks,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// A context sharing this fixture's board, locks and directories.
    pub fn context(&self) -> PipelineContext {
        PipelineContext::new(
            self.config.clone(),
            Box::new(self.board.clone()),
            Arc::clone(&self.locks),
        )
    }

    pub fn identity(&self, project: &str, sample: &str) -> SampleIdentity {
        SampleIdentity::extended(project, sample, PROTOCOL, ORGANISM)
    }

    /// Replace the sample list. Each row is
    /// `[project, sample, uploaded, scaffold sample, run scaffold]`.
    pub fn set_list(&self, rows: &[[&str; 5]]) {
        let mut values = vec![LIST_HEADER.to_vec()];
        for &[project, sample, uploaded, scaffold_sample, run] in rows {
            values.push(vec![
                project,
                sample,
                PROTOCOL,
                ORGANISM,
                uploaded,
                "",
                scaffold_sample,
                run,
            ]);
        }
        self.board.set_sheet("List", values);
    }

    /// Current value of `header` in the sample's row.
    pub fn column(&self, project: &str, sample: &str, header: &str) -> Result<String> {
        let rows = self.context().registry.rows()?;
        rows.iter()
            .find(|r| r.identity.has_key(project, sample))
            .map(|r| r.get(header).to_string())
            .ok_or_else(|| anyhow!("no row for {project}/{sample}"))
    }

    pub fn status(&self, project: &str, sample: &str) -> Result<String> {
        self.column(project, sample, "Status")
    }

    /// Create the sample's raw instrument file.
    pub fn touch_raw(&self, project: &str, sample: &str) -> Result<PathBuf> {
        let path = self
            .context()
            .layout
            .raw_file(&self.identity(project, sample));
        touch(&path)?;
        Ok(path)
    }

    /// Create a file and its parent directories.
    pub fn touch(&self, path: &Path) -> Result<()> {
        touch(path)
    }

    /// Put preference tables for [`PROTOCOL`] and [`ORGANISM`] on the board,
    /// cache them, and create the files they name.
    pub fn seed_prefs(&self) -> Result<()> {
        self.board.set_sheet(
            "Prefs",
            vec![
                vec![
                    "Protocol",
                    "Tandem prefs",
                    "Mascot prefs",
                    "Postproc prefs",
                    "Organism",
                    "Tandem db",
                    "Mascot db",
                ],
                vec![
                    PROTOCOL,
                    "tandem_defaults.xml",
                    "mascot.par",
                    "postproc",
                    ORGANISM,
                    "hs",
                    "UniProt_HS",
                ],
            ],
        );
        refresh_prefs(&self.context())?;
        let prefs_dir = &self.config.paths.prefs_dir;
        fs::write(prefs_dir.join("tandem_defaults.xml"), "<bioml/>\n")?;
        fs::write(
            prefs_dir.join("mascot.par"),
            "CLE=Trypsin/P\nMODS=Carbamidomethyl (C)\nDB=placeholder\n",
        )?;
        fs::write(
            prefs_dir.join("postproc_scaffold_template.scafml"),
            "<Experiment name=\"{{name}}\" fasta=\"{{fasta}}\">\
             {{#samples}}<Sample name=\"{{sample.name}}\">{{#files}}<File>{{file}}</File>{{/files}}</Sample>{{/samples}}\
             </Experiment>\n",
        )?;
        Ok(())
    }
}

fn touch(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| path.display().to_string())?;
    Ok(())
}

//! ms_config
//!
//! Settings for an msflow deployment, read from `msflow.toml`. Every value has
//! a default so a partial file, or none at all, still yields a usable config.

// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms
)]
#![warn(unused)]

use anyhow::{ensure, Context, Result};
use log::{debug, warn};
use ms_board::RegistryLayout;
use ms_types::{RecordFormat, SchemaProfile, SearchEngine};
use serde::Deserialize;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "MSFLOW_CONFIG";

/// File looked up next to the running executable.
pub const CONFIG_FILE_NAME: &str = "msflow.toml";

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Instrument files, `<raw_root>/<project>/<sample>.raw`.
    pub raw_root: PathBuf,
    /// Per-project working directories.
    pub data_root: PathBuf,
    /// Queue files, the imported ledger and the preference caches.
    pub db_root: PathBuf,
    /// Lock files for the named locks.
    pub lock_dir: PathBuf,
    /// Search defaults, Mascot parameter files and aggregation templates named
    /// by the preference tables.
    pub prefs_dir: PathBuf,
    /// Protein databases, `<fasta_dir>/<database>.fasta`.
    pub fasta_dir: PathBuf,
    /// Name of the per-project log file.
    pub log_name: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            raw_root: PathBuf::from("/var/lib/msflow/raws"),
            data_root: PathBuf::from("/var/lib/msflow/proc"),
            db_root: PathBuf::from("/var/lib/msflow/db"),
            lock_dir: PathBuf::from("/var/lib/msflow/locks"),
            prefs_dir: PathBuf::from("/var/lib/msflow/prefs"),
            fasta_dir: PathBuf::from("/var/lib/msflow/fasta"),
            log_name: "msauto.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub spreadsheet_id: String,
    /// File holding an OAuth bearer token, refreshed out of band.
    pub token_file: PathBuf,
    pub api_base: String,
    pub protocol_range: String,
    pub organism_range: String,
    pub timeout_secs: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig {
            spreadsheet_id: String::new(),
            token_file: PathBuf::from("/var/lib/msflow/sheets.token"),
            api_base: "https://sheets.googleapis.com".to_string(),
            protocol_range: "Prefs!A:D".to_string(),
            organism_range: "Prefs!E:G".to_string(),
            timeout_secs: 60,
        }
    }
}

impl BoardConfig {
    pub fn timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.timeout_secs)
    }
}

/// Registry columns and the values the stages compare them against.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    #[serde(flatten)]
    pub layout: RegistryLayout,
    /// Filled in for identities read under the minimal profile.
    pub default_protocol: String,
    pub default_organism: String,
    pub scaffold_sample_header: String,
    pub run_header: String,
    pub run_flag: String,
    pub run_ok: String,
    pub run_failed: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        SchemaConfig {
            layout: RegistryLayout::default(),
            default_protocol: "default".to_string(),
            default_organism: "default".to_string(),
            scaffold_sample_header: "Scaffold_sample".to_string(),
            run_header: "Run_scaffold".to_string(),
            run_flag: "RUN".to_string(),
            run_ok: "OK".to_string(),
            run_failed: "FAILED".to_string(),
        }
    }
}

impl SchemaConfig {
    pub fn profile(&self) -> SchemaProfile {
        self.layout.profile
    }
}

/// External tool command lines. `{name}` placeholders are substituted with
/// shell-quoted values before the line is passed to `sh -c`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Placeholders: `{infile}`, `{outdir}`, `{outfile}`, `{project}`, `{sample}`.
    pub conversion_cmd: String,
    /// Placeholders: `{infile}` (the generated input descriptor).
    pub tandem_cmd: String,
    pub tandem_taxonomy: PathBuf,
    /// Placeholders: `{infile}` (the rendered job descriptor).
    pub scaffold_cmd: String,
    /// Placeholders: `{script}`, `{wd}`, `{projname}`.
    pub postproc_cmd: String,
    /// Applies to every tool run; 0 disables the limit.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig {
            conversion_cmd: "conv.sh {infile} {outdir}".to_string(),
            tandem_cmd: "tandem.exe {infile}".to_string(),
            tandem_taxonomy: PathBuf::from("/var/lib/msflow/prefs/taxonomy.xml"),
            scaffold_cmd: "ScaffoldBatch {infile}".to_string(),
            postproc_cmd: "Rscript {script} {wd} {projname}".to_string(),
            timeout_secs: 6 * 3600,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MascotConfig {
    /// Base of the Mascot CGI tree, e.g. `http://mascot.local/mascot/cgi`.
    pub cgi_url: String,
    pub user: String,
    pub password_file: Option<PathBuf>,
    /// Prefix of the search title sent as `COM`.
    pub comment_prefix: String,
    pub timeout_secs: u64,
}

impl Default for MascotConfig {
    fn default() -> Self {
        MascotConfig {
            cgi_url: "http://localhost/mascot/cgi".to_string(),
            user: String::new(),
            password_file: None,
            comment_prefix: "msauto_prot1".to_string(),
            timeout_secs: 3600,
        }
    }
}

impl MascotConfig {
    pub fn timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.timeout_secs)
    }

    /// The password from `password_file`, or "" without one.
    pub fn password(&self) -> Result<String> {
        match &self.password_file {
            None => Ok(String::new()),
            Some(path) => Ok(std::fs::read_to_string(path)
                .with_context(|| path.display().to_string())?
                .trim()
                .to_string()),
        }
    }
}

/// What a stage does when its external tool fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Write a `Failed` status and stop the sample there.
    #[default]
    MarkFailed,
    /// Log the failure, write the finished status and pass the sample on.
    Advance,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub failure_policy: FailurePolicy,
    /// Exit non-zero when a stage invocation ends in a failed outcome.
    pub failed_exit_code: bool,
    /// Search queues the conversion stage feeds.
    pub engines: Vec<SearchEngine>,
    /// Format used when writing queue and ledger records. Both are read.
    pub record_format: RecordFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            failure_policy: FailurePolicy::MarkFailed,
            failed_exit_code: false,
            engines: SearchEngine::ALL.to_vec(),
            record_format: RecordFormat::V1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub board: BoardConfig,
    pub schema: SchemaConfig,
    pub tools: ToolsConfig,
    pub mascot: MascotConfig,
    pub pipeline: PipelineConfig,
}

fn report_non_default<T: PartialEq + Default + Debug>(section: &str, value: &T) {
    if *value != T::default() {
        debug!("using non-default [{section}] = {value:?}");
    }
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Config> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the config at `path`.
    pub fn load(path: &Path) -> Result<Config> {
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        let config = Config::from_toml(&s).with_context(|| path.display().to_string())?;
        report_non_default("paths", &config.paths);
        report_non_default("board", &config.board);
        report_non_default("schema", &config.schema);
        report_non_default("tools", &config.tools);
        report_non_default("mascot", &config.mascot);
        report_non_default("pipeline", &config.pipeline);
        Ok(config)
    }

    /// Find and read the deployment config: `$MSFLOW_CONFIG` if set, else
    /// `msflow.toml` next to the running executable, else the defaults.
    pub fn locate() -> Result<Config> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Config::load(Path::new(&path))
                .with_context(|| format!("loading the config named by ${CONFIG_ENV}"));
        }
        let path = std::env::current_exe()
            .context("Unable to locate the running executable")?
            .with_file_name(CONFIG_FILE_NAME);
        if path.exists() {
            Config::load(&path)
        } else {
            warn!(
                "could not find {CONFIG_FILE_NAME} at {}, falling back to defaults",
                path.display()
            );
            Ok(Config::default())
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.pipeline.engines.is_empty(),
            "[pipeline] engines must name at least one search engine"
        );
        ensure!(
            !self.paths.log_name.is_empty() && !self.paths.log_name.contains('/'),
            "[paths] log_name must be a plain file name, got '{}'",
            self.paths.log_name
        );
        Ok(())
    }
}

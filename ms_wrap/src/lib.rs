//! ms_wrap
//!
//! The `msflow` command line: one subcommand per stage, each run once and
//! reported to the log.

// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms
)]
#![warn(unused)]

pub mod utils;

use anyhow::Result;
use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use ms_lib::{
    refresh_prefs, run_aggregate, run_import, run_queue_stage, ConvertStage, MascotStage,
    PipelineContext, TandemStage,
};
use std::fmt::{Display, Formatter};
use std::io::Write;

/// Log to stderr with timestamps at info level. `RUST_LOG` overrides the level.
pub fn init_logging() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[derive(clap::Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Admit uploaded samples whose raw file is present and queue them for conversion
    Import,
    /// Convert the next queued raw file to a peak list
    Convert,
    /// Run the next queued X!Tandem search
    Tandem,
    /// Submit the next queued Mascot search and download its result
    Mascot,
    /// Aggregate the projects flagged for a Scaffold run whose samples are all searched
    #[clap(alias = "scaffold")]
    Aggregate,
    /// Mirror the protocol and organism preference tables to the local cache
    Prefs,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Import => "import",
            Stage::Convert => "convert",
            Stage::Tandem => "tandem",
            Stage::Mascot => "mascot",
            Stage::Aggregate => "aggregate",
            Stage::Prefs => "prefs",
        })
    }
}

/// How one invocation went, for the log line and the exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub message: String,
    /// Some sample or project ended in a failed state.
    pub failed: bool,
}

impl RunSummary {
    fn ok(message: impl Into<String>) -> Self {
        RunSummary {
            message: message.into(),
            failed: false,
        }
    }

    /// Sample failures only affect the exit code when configured to.
    pub fn exit_failure(&self, failed_exit_code: bool) -> bool {
        self.failed && failed_exit_code
    }
}

const LOCKED: &str = "skipped, already running";

/// Run one invocation of `stage`.
pub fn run_stage(stage: Stage, ctx: &PipelineContext) -> Result<RunSummary> {
    let summary = match stage {
        Stage::Import => match run_import(ctx)? {
            None => RunSummary::ok(LOCKED),
            Some(report) => RunSummary {
                message: format!(
                    "{} enqueued, {} already imported, {} without raw file",
                    report.enqueued.len(),
                    report.already_imported,
                    report.missing.len()
                ),
                failed: !report.failed.is_empty(),
            },
        },
        Stage::Convert | Stage::Tandem | Stage::Mascot => {
            let outcome = match stage {
                Stage::Convert => run_queue_stage(&ConvertStage, ctx)?,
                Stage::Tandem => run_queue_stage(&TandemStage, ctx)?,
                _ => run_queue_stage(&MascotStage, ctx)?,
            };
            RunSummary {
                message: outcome.to_string(),
                failed: outcome.is_failure(),
            }
        }
        Stage::Aggregate => match run_aggregate(ctx)? {
            None => RunSummary::ok(LOCKED),
            Some(report) => RunSummary {
                message: format!(
                    "{} done, {} waiting, {} failed, {} timed out",
                    report.done.len(),
                    report.waiting.len(),
                    report.failed.len(),
                    report.timed_out.len()
                ),
                failed: !report.failed.is_empty(),
            },
        },
        Stage::Prefs => {
            refresh_prefs(ctx)?;
            RunSummary::ok("preference tables refreshed")
        }
    };
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_lib::testing::TestPipeline;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_run_stage() -> Result<()> {
        let mut pipeline = TestPipeline::new()?;
        pipeline.config.tools.conversion_cmd = "exit 1".to_string();
        pipeline.set_list(&[["P1", "S1", "TRUE", "", ""]]);
        pipeline.touch_raw("P1", "S1")?;
        let ctx = pipeline.context();

        let summary = run_stage(Stage::Import, &ctx)?;
        assert_eq!(
            summary,
            RunSummary::ok("1 enqueued, 0 already imported, 0 without raw file")
        );
        assert!(!summary.exit_failure(true));

        let summary = run_stage(Stage::Convert, &ctx)?;
        assert!(summary.failed);
        assert!(summary.exit_failure(true));
        assert!(!summary.exit_failure(false));

        assert_eq!(
            run_stage(Stage::Convert, &ctx)?,
            RunSummary::ok("skipped, nothing to do")
        );
        Ok(())
    }

    #[test]
    fn test_locked_stage() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        let ctx = pipeline.context();
        let _held = ctx.locks.try_acquire("aggregate")?;
        assert_eq!(run_stage(Stage::Aggregate, &ctx)?, RunSummary::ok(LOCKED));
        Ok(())
    }
}

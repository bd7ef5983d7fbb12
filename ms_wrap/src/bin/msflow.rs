//! msflow
#![deny(missing_docs)]

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use ms_config::Config;
use ms_lib::PipelineContext;
use ms_wrap::{init_logging, run_stage, Stage};
use std::process::ExitCode;

const CMD: &str = "msflow";

/// Run one step of the mass spectrometry pipeline. Each subcommand is meant
/// to be invoked periodically by a scheduler.
#[derive(Parser, Debug)]
#[clap(name = CMD, version)]
struct Msflow {
    #[clap(subcommand)]
    stage: Stage,
}

fn inner_main() -> Result<ExitCode> {
    let opts = Msflow::parse();
    let config = Config::locate()?;
    let failed_exit_code = config.pipeline.failed_exit_code;
    let ctx = PipelineContext::from_config(config)?;

    let summary = match run_stage(opts.stage, &ctx) {
        Ok(summary) => summary,
        Err(err) => {
            error!("{}: {err:#}", opts.stage);
            return Err(err);
        }
    };
    info!("{}: {}", opts.stage, summary.message);
    Ok(if summary.exit_failure(failed_exit_code) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn main() -> ExitCode {
    init_logging();
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            ms_wrap::utils::print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}

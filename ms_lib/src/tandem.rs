//! X!Tandem identification search.

use crate::context::PipelineContext;
use crate::prefs::{TANDEM_DB, TANDEM_PREFS};
use crate::stage::{ActResult, QueueStage};
use crate::tools::{render_command, run_tool};
use anyhow::{Context, Result};
use ms_store::DurableQueue;
use ms_types::{SampleIdentity, SampleStatus, SearchEngine};
use std::path::Path;

/// Values of the input descriptor X!Tandem is started with.
pub struct TandemInput<'a> {
    pub defaults: &'a Path,
    pub taxonomy: &'a Path,
    pub taxon: &'a str,
    pub spectra: &'a Path,
    pub output: &'a Path,
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl TandemInput<'_> {
    pub fn to_xml(&self) -> String {
        let note = |label: &str, value: &str| {
            format!("\t<note type=\"input\" label=\"{label}\">{}</note>\n", escape(value))
        };
        let mut xml = String::from("<?xml version=\"1.0\"?>\n<bioml>\n");
        xml += &note(
            "list path, default parameters",
            &self.defaults.display().to_string(),
        );
        xml += &note(
            "list path, taxonomy information",
            &self.taxonomy.display().to_string(),
        );
        xml += &note("protein, taxon", self.taxon);
        xml += &note("spectrum, path", &self.spectra.display().to_string());
        xml += &note("output, path", &self.output.display().to_string());
        xml += "</bioml>\n";
        xml
    }
}

pub struct TandemStage;

impl QueueStage for TandemStage {
    fn name(&self) -> &'static str {
        "tandem"
    }

    fn input(&self, ctx: &PipelineContext) -> DurableQueue {
        ctx.search_queue(SearchEngine::Tandem)
    }

    fn outputs(&self, _ctx: &PipelineContext) -> Vec<DurableQueue> {
        Vec::new()
    }

    fn running_status(&self, _id: &SampleIdentity) -> SampleStatus {
        SampleStatus::SearchRunning(SearchEngine::Tandem)
    }

    fn finished_status(&self, id: &SampleIdentity, ctx: &PipelineContext) -> SampleStatus {
        SampleStatus::SearchFinished(ctx.layout.finished_searches(id))
    }

    fn act(&self, id: &SampleIdentity, ctx: &PipelineContext) -> Result<ActResult> {
        let prefs = ctx.prefs()?;
        let taxon = prefs.database(ctx.organism(id), TANDEM_DB)?;
        let defaults = prefs.prefs_file(ctx.protocol(id), TANDEM_PREFS)?;
        let config_path = ctx.layout.tandem_config(id);
        let output = ctx.layout.search_output(SearchEngine::Tandem, id);
        let mgf = ctx.layout.mgf(id);

        let input = TandemInput {
            defaults: &defaults,
            taxonomy: &ctx.config.tools.tandem_taxonomy,
            taxon,
            spectra: &mgf,
            output: &output,
        };
        std::fs::write(&config_path, input.to_xml())
            .with_context(|| config_path.display().to_string())?;

        let config_str = config_path.display().to_string();
        let cmd = render_command(&ctx.config.tools.tandem_cmd, &[("infile", config_str.as_str())])?;
        let log = ctx.project_log(&id.project);
        log.record(format!("Starting X!Tandem: {cmd}"));
        let run = run_tool(&cmd, ctx.config.tools.timeout())?;
        log.record(format!("X!Tandem finished with {}", run.summary()));
        Ok(ActResult::from_tool(&run, &output))
    }
}

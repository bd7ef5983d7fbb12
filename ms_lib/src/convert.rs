//! Conversion of raw instrument files to peak lists.

use crate::context::PipelineContext;
use crate::stage::{ActResult, QueueStage};
use crate::tools::{render_command, run_tool};
use anyhow::{Context, Result};
use ms_store::DurableQueue;
use ms_types::{SampleIdentity, SampleStatus};

pub struct ConvertStage;

impl QueueStage for ConvertStage {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn input(&self, ctx: &PipelineContext) -> DurableQueue {
        ctx.conversion_queue()
    }

    fn outputs(&self, ctx: &PipelineContext) -> Vec<DurableQueue> {
        ctx.search_queues()
    }

    fn running_status(&self, _id: &SampleIdentity) -> SampleStatus {
        SampleStatus::Converting
    }

    fn finished_status(&self, _id: &SampleIdentity, _ctx: &PipelineContext) -> SampleStatus {
        SampleStatus::Converted
    }

    fn act(&self, id: &SampleIdentity, ctx: &PipelineContext) -> Result<ActResult> {
        let raw = ctx.layout.raw_file(id);
        let outdir = ctx.layout.project_dir(&id.project);
        let mgf = ctx.layout.mgf(id);
        std::fs::create_dir_all(&outdir).with_context(|| outdir.display().to_string())?;

        let raw_str = raw.display().to_string();
        let outdir_str = outdir.display().to_string();
        let mgf_str = mgf.display().to_string();
        let cmd = render_command(
            &ctx.config.tools.conversion_cmd,
            &[
                ("infile", raw_str.as_str()),
                ("outdir", outdir_str.as_str()),
                ("outfile", mgf_str.as_str()),
                ("project", id.project.as_str()),
                ("sample", id.sample.as_str()),
            ],
        )?;
        let log = ctx.project_log(&id.project);
        log.record(format!("Started converting {raw_str}"));
        let run = run_tool(&cmd, ctx.config.tools.timeout())?;
        log.record(format!("Conversion of {raw_str} ended with {}", run.summary()));
        Ok(ActResult::from_tool(&run, &mgf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{run_queue_stage, StageOutcome};
    use crate::testing::TestPipeline;
    use ms_types::SearchEngine;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_convert_feeds_search_queues() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        pipeline.set_list(&[["P1", "S1", "TRUE", "", ""]]);
        let ctx = pipeline.context();
        ctx.conversion_queue().enqueue(&[pipeline.identity("P1", "S1")])?;

        assert_eq!(run_queue_stage(&ConvertStage, &ctx)?, StageOutcome::Success);
        assert!(ctx.layout.mgf(&pipeline.identity("P1", "S1")).exists());
        assert_eq!(pipeline.status("P1", "S1")?, "Converted");
        for engine in SearchEngine::ALL {
            assert_eq!(
                ctx.search_queue(engine).entries()?,
                vec![pipeline.identity("P1", "S1")]
            );
        }
        Ok(())
    }

    #[test]
    fn test_missing_output_is_a_failure() -> Result<()> {
        let mut pipeline = TestPipeline::new()?;
        pipeline.config.tools.conversion_cmd = "echo converting {infile} >&2".to_string();
        pipeline.config.pipeline.engines = vec![SearchEngine::Tandem];
        pipeline.set_list(&[["P1", "S1", "TRUE", "", ""]]);
        let ctx = pipeline.context();
        ctx.conversion_queue().enqueue(&[pipeline.identity("P1", "S1")])?;

        let outcome = run_queue_stage(&ConvertStage, &ctx)?;
        assert!(outcome.is_failure());
        assert!(pipeline.status("P1", "S1")?.starts_with("Failed (convert): "));
        assert!(ctx.search_queue(SearchEngine::Tandem).is_empty()?);
        assert!(ctx.conversion_queue().is_empty()?);
        Ok(())
    }
}

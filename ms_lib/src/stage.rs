//! The pop-act-advance runner shared by the conversion and search stages.
//!
//! Each invocation is guarded by the stage's own lock in try-and-skip mode,
//! pops at most one entry from the stage's input queue, runs the stage's
//! external work for it, and then either passes the sample on to the
//! downstream queues, marks it failed, or puts it back for a later attempt.

use crate::context::PipelineContext;
use crate::tools::ToolRun;
use anyhow::Result;
use log::{debug, info, warn};
use ms_board::BoardError;
use ms_config::FailurePolicy;
use ms_store::DurableQueue;
use ms_types::{SampleIdentity, SampleStatus};
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Result of one stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    /// Another invocation of the same stage holds the stage lock.
    SkippedLocked,
    /// Nothing to do.
    SkippedEmpty,
    Failed(String),
    /// The sample was put back on its input queue.
    Retry(String),
}

impl StageOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }
}

impl Display for StageOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOutcome::Success => f.write_str("success"),
            StageOutcome::SkippedLocked => f.write_str("skipped, already running"),
            StageOutcome::SkippedEmpty => f.write_str("skipped, nothing to do"),
            StageOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            StageOutcome::Retry(reason) => write!(f, "will retry: {reason}"),
        }
    }
}

/// What a stage's external work came to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActResult {
    Completed,
    Failed(String),
    TimedOut,
}

impl ActResult {
    /// Completed only if the tool exited with 0 and left `output` behind.
    pub fn from_tool(run: &ToolRun, output: &Path) -> ActResult {
        if run.status == crate::tools::ToolStatus::TimedOut {
            ActResult::TimedOut
        } else if !run.success() {
            ActResult::Failed(run.summary())
        } else if !output.exists() {
            ActResult::Failed(format!("{} not produced", output.display()))
        } else {
            ActResult::Completed
        }
    }
}

/// A stage fed by one queue.
pub trait QueueStage {
    /// Short name used in logs and statuses, e.g. `convert`.
    fn name(&self) -> &'static str;

    /// Name of the try-and-skip lock wrapping the whole invocation.
    fn lock_name(&self) -> &str {
        self.name()
    }

    fn input(&self, ctx: &PipelineContext) -> DurableQueue;

    /// Queues the sample is appended to once the stage completes.
    fn outputs(&self, ctx: &PipelineContext) -> Vec<DurableQueue>;

    fn running_status(&self, id: &SampleIdentity) -> SampleStatus;

    fn finished_status(&self, id: &SampleIdentity, ctx: &PipelineContext) -> SampleStatus;

    /// Do the external work for one sample. An `Err` is treated as a failure
    /// of this sample, not of the invocation.
    fn act(&self, id: &SampleIdentity, ctx: &PipelineContext) -> Result<ActResult>;
}

/// Run one invocation of `stage`.
///
/// Errors are returned only for queue I/O; everything that goes wrong with
/// the popped sample itself ends in an outcome.
pub fn run_queue_stage(stage: &dyn QueueStage, ctx: &PipelineContext) -> Result<StageOutcome> {
    let Some(_guard) = ctx.locks.try_acquire(stage.lock_name())? else {
        info!("{} is already running, skipping", stage.name());
        return Ok(StageOutcome::SkippedLocked);
    };
    let input = stage.input(ctx);
    let Some(id) = input.dequeue_one()? else {
        debug!("{} queue is empty", stage.name());
        return Ok(StageOutcome::SkippedEmpty);
    };
    process(stage, ctx, &input, &id)
}

fn advance(stage: &dyn QueueStage, ctx: &PipelineContext, id: &SampleIdentity) -> Result<()> {
    ctx.set_status(id, &stage.finished_status(id, ctx));
    for queue in stage.outputs(ctx) {
        queue.enqueue(std::slice::from_ref(id))?;
    }
    Ok(())
}

/// Return a dequeued sample to the head of its queue because the board
/// cannot record what happened to it.
fn put_back(
    stage: &dyn QueueStage,
    input: &DurableQueue,
    id: &SampleIdentity,
    err: &BoardError,
) -> Result<StageOutcome> {
    warn!("{}: {err}, putting {id} back on the queue", stage.name());
    input.requeue_front(id)?;
    Ok(StageOutcome::Retry(err.to_string()))
}

fn process(
    stage: &dyn QueueStage,
    ctx: &PipelineContext,
    input: &DurableQueue,
    id: &SampleIdentity,
) -> Result<StageOutcome> {
    let name = stage.name();
    let log = ctx.project_log(&id.project);
    if let Err(err) = ctx.set_status_or_unavailable(id, &stage.running_status(id)) {
        return put_back(stage, input, id, &err);
    }
    log.record(format!("{name}: started sample {}", id.sample));

    let result = stage.act(id, ctx).unwrap_or_else(|err| ActResult::Failed(format!("{err:#}")));

    match result {
        ActResult::Completed => {
            log.record(format!("{name}: finished sample {}", id.sample));
            advance(stage, ctx, id)?;
            Ok(StageOutcome::Success)
        }
        ActResult::Failed(reason) => {
            log.record(format!("{name}: sample {} failed: {reason}", id.sample));
            match ctx.config.pipeline.failure_policy {
                FailurePolicy::MarkFailed => {
                    let status = SampleStatus::Failed {
                        stage: name.to_string(),
                        reason: reason.clone(),
                    };
                    if let Err(err) = ctx.set_status_or_unavailable(id, &status) {
                        return put_back(stage, input, id, &err);
                    }
                }
                FailurePolicy::Advance => {
                    warn!("{name}: passing {id} on despite the failure");
                    advance(stage, ctx, id)?;
                }
            }
            Ok(StageOutcome::Failed(reason))
        }
        ActResult::TimedOut => {
            log.record(format!(
                "{name}: sample {} timed out, queued for another attempt",
                id.sample
            ));
            input.enqueue(std::slice::from_ref(id))?;
            ctx.set_status(
                id,
                &SampleStatus::TimedOut {
                    stage: name.to_string(),
                },
            );
            Ok(StageOutcome::Retry(format!("{name} timed out")))
        }
    }
}

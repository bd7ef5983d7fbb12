//! Project-level aggregation: once every sample of a flagged project has its
//! search results, render the job descriptor, run the aggregation tool and
//! then the post-processing script.

use crate::context::PipelineContext;
use crate::layout::with_suffix;
use crate::prefs::{MASCOT_DB, POSTPROC_PREFS};
use crate::template::{render, SampleGroup, ScaffoldJob};
use crate::tools::{render_command, run_tool, ToolRun, ToolStatus};
use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};
use ms_board::RegistryRow;
use ms_config::FailurePolicy;
use ms_types::{SampleIdentity, SampleStatus, SearchEngine};
use std::collections::HashMap;

pub const AGGREGATE_LOCK: &str = "aggregate";

const STAGE: &str = "aggregate";
const DEFAULT_CATEGORY: &str = "default";

/// A member of a project group with its aggregation sample label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub identity: SampleIdentity,
    pub label: String,
}

/// All registry rows of one project flagged for aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectGroup {
    pub project: String,
    /// The first row carrying the run flag; its protocol and organism select
    /// the reference database and post-processing preferences.
    pub flagged: SampleIdentity,
    /// Every row carrying the run flag.
    pub flagged_rows: Vec<SampleIdentity>,
    pub members: Vec<GroupMember>,
}

/// Assemble the groups of projects with at least one row flagged for
/// aggregation, in order of first appearance.
pub fn project_groups(ctx: &PipelineContext, rows: &[RegistryRow]) -> Vec<ProjectGroup> {
    let schema = &ctx.config.schema;
    let is_flagged = |row: &RegistryRow| row.get(&schema.run_header) == schema.run_flag;
    rows.iter()
        .filter(|&r| is_flagged(r))
        .map(|r| r.identity.project.as_str())
        .unique()
        .filter_map(|project| {
            let project_rows: Vec<&RegistryRow> = rows
                .iter()
                .filter(|r| r.identity.project == project)
                .collect();
            let flagged_rows: Vec<SampleIdentity> = project_rows
                .iter()
                .filter(|&&r| is_flagged(r))
                .map(|r| ctx.complete(r.identity.clone()))
                .collect();
            let members = project_rows
                .iter()
                .map(|r| GroupMember {
                    identity: ctx.complete(r.identity.clone()),
                    label: r.get(&schema.scaffold_sample_header).trim().to_string(),
                })
                .collect();
            Some(ProjectGroup {
                project: project.to_string(),
                flagged: flagged_rows.first()?.clone(),
                flagged_rows,
                members,
            })
        })
        .collect()
}

impl ProjectGroup {
    /// True when every member has the output of every enabled search engine on
    /// disk. Statuses are not consulted.
    pub fn is_ready(&self, ctx: &PipelineContext) -> bool {
        self.members.iter().all(|m| {
            ctx.config
                .pipeline
                .engines
                .iter()
                .all(|&e| ctx.layout.search_output(e, &m.identity).exists())
        })
    }

    /// Group members into aggregation samples by their `name/category` label,
    /// in order of first appearance. An empty label stands for the sample id,
    /// and a label without a category gets the default one.
    pub fn sample_groups(&self, ctx: &PipelineContext) -> Vec<SampleGroup> {
        let mut groups: Vec<SampleGroup> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        for member in &self.members {
            let label = if member.label.is_empty() {
                member.identity.sample.as_str()
            } else {
                member.label.as_str()
            };
            let (name, category) = match label.split('/').collect::<Vec<_>>()[..] {
                [name, category] => (name.to_string(), category.to_string()),
                _ => (label.to_string(), DEFAULT_CATEGORY.to_string()),
            };
            let i = *index.entry((name.clone(), category.clone())).or_insert_with(|| {
                groups.push(SampleGroup {
                    name,
                    category,
                    files: Vec::new(),
                });
                groups.len() - 1
            });
            // Mascot results first, then X!Tandem
            groups[i].files.extend(
                SearchEngine::ALL
                    .into_iter()
                    .rev()
                    .filter(|e| ctx.config.pipeline.engines.contains(e))
                    .map(|e| ctx.layout.search_output(e, &member.identity)),
            );
        }
        groups
    }

    fn set_members(&self, ctx: &PipelineContext, status: &SampleStatus) {
        for member in &self.members {
            ctx.set_status(&member.identity, status);
        }
    }

    fn set_run_flag(&self, ctx: &PipelineContext, value: &str) {
        for id in &self.flagged_rows {
            ctx.set_column(id, &ctx.config.schema.run_header, value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ProjectOutcome {
    Done,
    Failed(String),
    TimedOut,
}

/// How a finished tool run ends the project's aggregation, if it does.
fn check_tool(
    ctx: &PipelineContext,
    group: &ProjectGroup,
    tool: &str,
    run: &ToolRun,
) -> Option<ProjectOutcome> {
    match run.status {
        ToolStatus::TimedOut => Some(ProjectOutcome::TimedOut),
        _ if run.success() => None,
        _ => match ctx.config.pipeline.failure_policy {
            FailurePolicy::MarkFailed => {
                Some(ProjectOutcome::Failed(format!("{tool}: {}", run.summary())))
            }
            FailurePolicy::Advance => {
                warn!(
                    "{tool} failed for project {}, continuing: {}",
                    group.project,
                    run.summary()
                );
                None
            }
        },
    }
}

fn aggregate_project(ctx: &PipelineContext, group: &ProjectGroup) -> Result<ProjectOutcome> {
    let tools = &ctx.config.tools;
    let prefs = ctx.prefs()?;
    let database = prefs.database(ctx.organism(&group.flagged), MASCOT_DB)?;
    let postproc = prefs.prefs_file(ctx.protocol(&group.flagged), POSTPROC_PREFS)?;
    let template_path = with_suffix(&postproc, "_scaffold_template.scafml");
    let template = std::fs::read_to_string(&template_path)
        .with_context(|| template_path.display().to_string())?;

    let project_dir = ctx.layout.project_dir(&group.project);
    let job = ScaffoldJob {
        name: group.project.clone(),
        fasta: ctx.config.paths.fasta_dir.join(format!("{database}.fasta")),
        output: project_dir.clone(),
        samples: group.sample_groups(ctx),
    };
    let descriptor = ctx.layout.scaffold_descriptor(&group.project);
    std::fs::create_dir_all(&project_dir).with_context(|| project_dir.display().to_string())?;
    std::fs::write(&descriptor, render(&template, &job)?)
        .with_context(|| descriptor.display().to_string())?;

    let log = ctx.project_log(&group.project);
    group.set_members(ctx, &SampleStatus::AggregationRunning);
    log.record(format!("Running Scaffold for {}", descriptor.display()));
    let descriptor_str = descriptor.display().to_string();
    let cmd = render_command(&tools.scaffold_cmd, &[("infile", descriptor_str.as_str())])?;
    let run = run_tool(&cmd, tools.timeout())?;
    log.record(format!("Scaffold finished with {}", run.summary()));
    if let Some(outcome) = check_tool(ctx, group, "scaffold", &run) {
        return Ok(outcome);
    }

    group.set_members(ctx, &SampleStatus::PostprocessingRunning);
    let script = with_suffix(&postproc, ".R").display().to_string();
    let wd = project_dir.display().to_string();
    let cmd = render_command(
        &tools.postproc_cmd,
        &[
            ("script", script.as_str()),
            ("wd", wd.as_str()),
            ("projname", group.project.as_str()),
        ],
    )?;
    let run = run_tool(&cmd, tools.timeout())?;
    log.record(format!("Postproc finished with {}", run.summary()));
    if let Some(outcome) = check_tool(ctx, group, "postprocessing", &run) {
        return Ok(outcome);
    }
    Ok(ProjectOutcome::Done)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregateReport {
    pub done: Vec<String>,
    /// Flagged projects with a member still missing search results.
    pub waiting: Vec<String>,
    pub failed: Vec<String>,
    /// Projects whose tools ran out of time; they stay flagged.
    pub timed_out: Vec<String>,
}

/// One aggregation pass over the current registry snapshot.
///
/// Returns None when another pass holds the lock. Projects are independent: a
/// project that is not ready or fails does not stop the others.
pub fn run_aggregate(ctx: &PipelineContext) -> Result<Option<AggregateReport>> {
    let Some(_guard) = ctx.locks.try_acquire(AGGREGATE_LOCK)? else {
        info!("aggregation is already running, skipping");
        return Ok(None);
    };
    let rows = ctx.registry.rows()?;
    let mut report = AggregateReport::default();
    for group in project_groups(ctx, &rows) {
        if !group.is_ready(ctx) {
            info!("project {} is not ready for aggregation", group.project);
            report.waiting.push(group.project);
            continue;
        }
        let outcome = aggregate_project(ctx, &group)
            .unwrap_or_else(|err| ProjectOutcome::Failed(format!("{err:#}")));
        let log = ctx.project_log(&group.project);
        match outcome {
            ProjectOutcome::Done => {
                group.set_members(ctx, &SampleStatus::Done);
                group.set_run_flag(ctx, &ctx.config.schema.run_ok);
                log.record(format!("Aggregation of project {} done", group.project));
                report.done.push(group.project);
            }
            ProjectOutcome::TimedOut => {
                group.set_members(ctx, &SampleStatus::TimedOut { stage: STAGE.to_string() });
                log.record(format!("Aggregation of project {} timed out", group.project));
                report.timed_out.push(group.project);
            }
            ProjectOutcome::Failed(reason) => {
                log.record(format!("Aggregation of project {} failed: {reason}", group.project));
                match ctx.config.pipeline.failure_policy {
                    FailurePolicy::MarkFailed => {
                        let status = SampleStatus::Failed {
                            stage: STAGE.to_string(),
                            reason,
                        };
                        group.set_members(ctx, &status);
                        group.set_run_flag(ctx, &ctx.config.schema.run_failed);
                    }
                    FailurePolicy::Advance => {
                        warn!("project {} stays flagged for aggregation", group.project);
                    }
                }
                report.failed.push(group.project);
            }
        }
    }
    Ok(Some(report))
}

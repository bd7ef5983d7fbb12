//! Admission of uploaded samples into the pipeline.

use crate::context::PipelineContext;
use anyhow::Result;
use log::{debug, info, warn};
use ms_types::{SampleIdentity, SampleKey, SampleStatus};
use std::collections::HashSet;

pub const IMPORT_LOCK: &str = "import";
const STAGE: &str = "import";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Uploaded rows whose raw file is not on disk.
    pub missing: Vec<SampleIdentity>,
    /// Uploaded rows admitted by an earlier run.
    pub already_imported: usize,
    /// Samples whose project directory could not be created. They stay out of
    /// the ledger and are tried again on the next run.
    pub failed: Vec<SampleIdentity>,
    /// Samples added to the imported ledger by this run.
    pub admitted: Vec<SampleIdentity>,
    /// Samples appended to the conversion queue by this run.
    pub enqueued: Vec<SampleIdentity>,
}

/// Reconcile the registry's uploaded rows with the raw files on disk and the
/// imported ledger, seeding the conversion queue with new samples.
///
/// Returns None when another import holds the lock. An unreachable board
/// aborts the run before anything is written.
pub fn run_import(ctx: &PipelineContext) -> Result<Option<ImportReport>> {
    let Some(_guard) = ctx.locks.try_acquire(IMPORT_LOCK)? else {
        info!("import is already running, skipping");
        return Ok(None);
    };
    let rows = ctx.registry.uploaded_rows()?;
    let imported = ctx.imported();
    let seen = imported.load()?;
    let status_header = &ctx.config.schema.layout.status_header;

    let mut report = ImportReport::default();
    let mut candidates = Vec::new();
    for row in rows {
        let id = ctx.complete(row.identity.clone());
        if seen.contains(&id.key()) {
            report.already_imported += 1;
            continue;
        }
        let raw = ctx.layout.raw_file(&id);
        if !raw.exists() {
            let status = SampleStatus::FileMissing(raw);
            if row.get(status_header) != status.to_string() {
                ctx.set_status(&id, &status);
            }
            debug!("{id}: {status}");
            report.missing.push(id);
            continue;
        }
        candidates.push((id, row.get(status_header).to_string()));
    }

    let mut ready = Vec::new();
    for (id, current) in candidates {
        let dir = ctx.layout.project_dir(&id.project);
        if !dir.exists() {
            if let Err(err) = std::fs::create_dir_all(&dir) {
                warn!("{id}: could not create {}: {err}", dir.display());
                let status = SampleStatus::Failed {
                    stage: STAGE.to_string(),
                    reason: format!("could not create {}: {err}", dir.display()),
                };
                if current != status.to_string() {
                    ctx.set_status(&id, &status);
                }
                report.failed.push(id);
                continue;
            }
            ctx.project_log(&id.project)
                .record(format!("Created root for project {}", id.project));
        }
        ready.push(id);
    }

    // Queue before recording in the ledger. A run that dies in between leaves
    // samples queued but not imported; the next run admits them and finds
    // them already queued.
    let conversion = ctx.conversion_queue();
    let queued: HashSet<SampleKey> = conversion.entries()?.iter().map(SampleIdentity::key).collect();
    report.enqueued = ready
        .iter()
        .filter(|id| !queued.contains(&id.key()))
        .cloned()
        .collect();
    conversion.enqueue(&report.enqueued)?;

    report.admitted = imported.admit(&ready)?;
    report.already_imported += ready.len() - report.admitted.len();

    for id in &report.enqueued {
        ctx.set_status(id, &SampleStatus::WaitingForAnalysis);
        ctx.project_log(&id.project)
            .record(format!("Sample ID {} is waiting for the analysis", id.sample));
    }
    info!(
        "import: {} admitted, {} enqueued, {} already imported, {} without raw file, {} failed",
        report.admitted.len(),
        report.enqueued.len(),
        report.already_imported,
        report.missing.len(),
        report.failed.len()
    );
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestPipeline;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_import() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        pipeline.set_list(&[
            ["P1", "S1", "TRUE", "", ""],
            ["P1", "S2", "TRUE", "", ""],
            ["P1", "S3", "FALSE", "", ""],
            ["P2", "S1", "TRUE", "", ""],
        ]);
        pipeline.touch_raw("P1", "S1")?;
        pipeline.touch_raw("P1", "S3")?;
        let raw = pipeline.touch_raw("P2", "S1")?;
        let ctx = pipeline.context();

        let report = run_import(&ctx)?.unwrap();
        assert_eq!(report.missing, vec![pipeline.identity("P1", "S2")]);
        assert_eq!(
            report.enqueued,
            vec![pipeline.identity("P1", "S1"), pipeline.identity("P2", "S1")]
        );
        assert_eq!(report.admitted, report.enqueued);
        assert_eq!(ctx.conversion_queue().entries()?, report.enqueued);
        assert_eq!(pipeline.status("P1", "S1")?, "Waiting for the analysis");
        assert_eq!(pipeline.status("P1", "S3")?, "");
        let expected = format!(
            "No file found: {}",
            ctx.layout.raw_file(&pipeline.identity("P1", "S2")).display()
        );
        assert_eq!(pipeline.status("P1", "S2")?, expected);
        assert!(ctx.layout.project_dir("P2").is_dir());
        assert!(raw.exists());

        let log = std::fs::read_to_string(ctx.project_log("P2").path())?;
        assert!(log.contains("Created root for project P2"));
        assert!(log.contains("Sample ID S1 is waiting for the analysis"));
        Ok(())
    }

    #[test]
    fn test_import_is_idempotent() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        pipeline.set_list(&[["P1", "S1", "TRUE", "", ""], ["P1", "S2", "TRUE", "", ""]]);
        pipeline.touch_raw("P1", "S1")?;
        let ctx = pipeline.context();

        run_import(&ctx)?;
        let writes = pipeline.board.writes().len();
        let second = run_import(&ctx)?.unwrap();
        assert!(second.enqueued.is_empty());
        assert!(second.admitted.is_empty());
        assert_eq!(second.already_imported, 1);
        assert_eq!(ctx.conversion_queue().len()?, 1);
        // the missing-file status is already on the board
        assert_eq!(pipeline.board.writes().len(), writes);
        Ok(())
    }

    #[test]
    fn test_already_queued_is_not_enqueued_twice() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        pipeline.set_list(&[["P1", "S1", "TRUE", "", ""]]);
        pipeline.touch_raw("P1", "S1")?;
        let ctx = pipeline.context();
        ctx.conversion_queue().enqueue(&[pipeline.identity("P1", "S1")])?;

        let report = run_import(&ctx)?.unwrap();
        assert_eq!(report.admitted.len(), 1);
        assert!(report.enqueued.is_empty());
        assert_eq!(ctx.conversion_queue().len()?, 1);
        Ok(())
    }

    #[test]
    fn test_unusable_project_dir_spares_siblings() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        pipeline.set_list(&[["P1", "S1", "TRUE", "", ""], ["X/sub", "S1", "TRUE", "", ""]]);
        pipeline.touch_raw("P1", "S1")?;
        pipeline.touch_raw("X/sub", "S1")?;
        let ctx = pipeline.context();
        // a plain file where the project directory's parent should be
        let blocker = ctx.layout.project_dir("X");
        pipeline.touch(&blocker)?;

        let report = run_import(&ctx)?.unwrap();
        assert_eq!(report.enqueued, vec![pipeline.identity("P1", "S1")]);
        assert_eq!(report.admitted, report.enqueued);
        assert_eq!(report.failed, vec![pipeline.identity("X/sub", "S1")]);
        assert!(pipeline
            .status("X/sub", "S1")?
            .starts_with("Failed (import): could not create"));
        let imported = ctx.imported().load()?;
        assert!(imported.contains(&pipeline.identity("P1", "S1").key()));
        assert!(!imported.contains(&pipeline.identity("X/sub", "S1").key()));

        std::fs::remove_file(&blocker)?;
        let report = run_import(&ctx)?.unwrap();
        assert_eq!(report.enqueued, vec![pipeline.identity("X/sub", "S1")]);
        assert_eq!(report.already_imported, 1);
        assert_eq!(
            ctx.conversion_queue().entries()?,
            vec![pipeline.identity("P1", "S1"), pipeline.identity("X/sub", "S1")]
        );
        assert_eq!(pipeline.status("X/sub", "S1")?, "Waiting for the analysis");
        Ok(())
    }

    #[test]
    fn test_queued_but_unrecorded_sample_is_admitted_once() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        pipeline.set_list(&[["P1", "S1", "TRUE", "", ""]]);
        pipeline.touch_raw("P1", "S1")?;
        let ctx = pipeline.context();
        // what an import that died between queueing and the ledger leaves behind
        ctx.conversion_queue().enqueue(&[pipeline.identity("P1", "S1")])?;
        assert!(ctx.imported().load()?.is_empty());

        let report = run_import(&ctx)?.unwrap();
        assert_eq!(report.admitted, vec![pipeline.identity("P1", "S1")]);
        assert!(ctx.imported().load()?.contains(&pipeline.identity("P1", "S1").key()));
        assert_eq!(ctx.conversion_queue().len()?, 1);
        Ok(())
    }

    #[test]
    fn test_board_outage_aborts() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        pipeline.set_list(&[["P1", "S1", "TRUE", "", ""]]);
        pipeline.touch_raw("P1", "S1")?;
        pipeline.board.set_unavailable(true);
        let ctx = pipeline.context();

        assert!(run_import(&ctx).is_err());
        assert!(ctx.imported().load()?.is_empty());
        assert!(ctx.conversion_queue().is_empty()?);
        Ok(())
    }

    #[test]
    fn test_locked_import_skips() -> Result<()> {
        let pipeline = TestPipeline::new()?;
        let ctx = pipeline.context();
        let _held = ctx.locks.try_acquire(IMPORT_LOCK)?;
        assert_eq!(run_import(&ctx)?, None);
        Ok(())
    }
}

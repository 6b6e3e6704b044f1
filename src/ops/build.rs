//! Writing and executing a resolved plan.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::builder::executor::{write_dockerfile, ContainerRunner, PlanExecutor};
use crate::builder::plan::BuildPlan;
use crate::builder::scheduler::{CancelToken, ScheduleReport, StageScheduler};

/// Options for executing a plan.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Write the descriptor and compute the schedule, but run nothing
    pub dry_run: bool,

    /// Stages built concurrently (None = available parallelism)
    pub jobs: Option<usize>,

    /// Container engine override
    pub program: Option<String>,

    /// Image tag prefix override
    pub tag_prefix: Option<String>,

    /// Hide the progress bar
    pub quiet: bool,
}

/// What `build` did.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Where the descriptor was written
    pub dockerfile: PathBuf,

    /// Stage names grouped into waves that may run concurrently
    pub waves: Vec<Vec<String>>,

    /// Execution results; None for a dry run
    pub report: Option<ScheduleReport>,
}

/// Write `plan` into `out_dir` and, unless this is a dry run, build every
/// stage through the container engine.
pub fn build(
    plan: &BuildPlan,
    out_dir: &Path,
    opts: &BuildOptions,
    cancel: CancelToken,
) -> Result<BuildOutcome> {
    let dockerfile = write_dockerfile(plan, out_dir)?;
    tracing::info!("wrote {}", dockerfile.display());

    let waves = StageScheduler::waves(plan);
    if opts.dry_run {
        return Ok(BuildOutcome {
            dockerfile,
            waves,
            report: None,
        });
    }

    let mut runner = ContainerRunner::new(&plan.image_name, &dockerfile);
    if let Some(program) = &opts.program {
        runner = runner.program(program);
    }
    if let Some(prefix) = &opts.tag_prefix {
        runner = runner.tag_prefix(prefix);
    }

    let scheduler = StageScheduler::new(opts.jobs).with_cancel(cancel);
    let report = PlanExecutor::new(scheduler)
        .quiet(opts.quiet)
        .execute(plan, runner)?;

    Ok(BuildOutcome {
        dockerfile,
        waves,
        report: Some(report),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::plan::{BuildStage, ImageRef, BASE_STAGE, FINAL_STAGE};

    fn plan() -> BuildPlan {
        let base = BuildStage::new(BASE_STAGE, ImageRef::External("debian:bookworm".into()));
        let fin = BuildStage::new(FINAL_STAGE, ImageRef::External("debian:bookworm-slim".into()));
        BuildPlan::new("empty", vec![base], fin).unwrap()
    }

    #[test]
    fn test_dry_run_writes_descriptor_only() {
        let tmp = tempfile::TempDir::new().unwrap();
        let opts = BuildOptions {
            dry_run: true,
            ..Default::default()
        };

        let outcome = build(&plan(), tmp.path(), &opts, CancelToken::new()).unwrap();
        assert!(outcome.dockerfile.is_file());
        assert!(outcome.report.is_none());
        assert_eq!(outcome.waves.len(), 1);
    }

    #[test]
    fn test_missing_engine_reports_failed_stages() {
        let tmp = tempfile::TempDir::new().unwrap();
        let opts = BuildOptions {
            program: Some("stackforge-no-such-engine".to_string()),
            jobs: Some(1),
            quiet: true,
            ..Default::default()
        };

        let outcome = build(&plan(), tmp.path(), &opts, CancelToken::new()).unwrap();
        let report = outcome.report.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.failed.len(), 2);
    }
}

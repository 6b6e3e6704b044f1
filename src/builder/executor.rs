//! Plan execution through a container engine, with progress reporting.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use crate::builder::plan::{BuildPlan, BuildStage};
use crate::builder::scheduler::{ScheduleReport, StageRunner, StageScheduler};
use crate::util::fs::{ensure_dir, write_string};
use crate::util::process::ProcessBuilder;

/// Default container engine.
pub const DEFAULT_PROGRAM: &str = "docker";

/// Default image tag prefix.
pub const DEFAULT_TAG_PREFIX: &str = "stackforge";

/// Name of the written descriptor inside the output directory.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Builds stages with `<program> build --target <stage>`.
#[derive(Clone)]
pub struct ContainerRunner {
    program: String,
    image_name: String,
    tag_prefix: String,
    dockerfile: PathBuf,
    context_dir: PathBuf,
    progress: Option<ProgressBar>,
}

impl ContainerRunner {
    pub fn new(image_name: impl Into<String>, dockerfile: impl Into<PathBuf>) -> Self {
        let dockerfile = dockerfile.into();
        let context_dir = dockerfile
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        ContainerRunner {
            program: DEFAULT_PROGRAM.to_string(),
            image_name: image_name.into(),
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
            dockerfile,
            context_dir,
            progress: None,
        }
    }

    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = prefix.into();
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    /// Tag given to the image produced for `stage`.
    pub fn tag(&self, stage: &str) -> String {
        format!("{}/{}:{}", self.tag_prefix, self.image_name, stage)
    }

    /// The engine invocation for one stage.
    pub fn command(&self, stage: &BuildStage) -> ProcessBuilder {
        ProcessBuilder::new(&self.program)
            .arg("build")
            .arg("--target")
            .arg(&stage.name)
            .arg("-t")
            .arg(self.tag(&stage.name))
            .arg("-f")
            .arg(&self.dockerfile)
            .arg(&self.context_dir)
            .cwd(&self.context_dir)
    }
}

impl StageRunner for ContainerRunner {
    fn run(&self, stage: &BuildStage) -> Result<()> {
        let cmd = self.command(stage);
        tracing::debug!("running `{}`", cmd.display_command());

        if let Some(pb) = &self.progress {
            pb.set_message(stage.name.clone());
        }

        let result = cmd
            .exec_and_check()
            .with_context(|| format!("failed to build stage `{}`", stage.name));

        if let Some(pb) = &self.progress {
            pb.inc(1);
        }

        result.map(|_| ())
    }
}

/// Write the rendered descriptor for `plan` into `out_dir`.
pub fn write_dockerfile(plan: &BuildPlan, out_dir: &Path) -> Result<PathBuf> {
    ensure_dir(out_dir)?;
    let path = out_dir.join(DOCKERFILE_NAME);
    write_string(&path, &plan.to_dockerfile())?;
    Ok(path)
}

/// Runs a plan with a progress bar.
pub struct PlanExecutor {
    scheduler: StageScheduler,
    quiet: bool,
}

impl PlanExecutor {
    pub fn new(scheduler: StageScheduler) -> Self {
        PlanExecutor {
            scheduler,
            quiet: false,
        }
    }

    /// Hide the progress bar.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Execute every stage of `plan` with `runner`.
    pub fn execute(&self, plan: &BuildPlan, runner: ContainerRunner) -> Result<ScheduleReport> {
        let start = Instant::now();
        let total = plan.stages.len() + 1;

        let runner = if self.quiet {
            runner
        } else {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .context("invalid progress template")?
                    .progress_chars("#>-"),
            );
            runner.progress(pb)
        };

        let pb = runner.progress.clone();
        let report = self.scheduler.run(plan, Arc::new(runner))?;

        if let Some(pb) = pb {
            if report.is_success() {
                pb.finish_with_message("done");
            } else {
                pb.abandon_with_message("failed");
            }
        }

        tracing::info!(
            "built {}/{} stage(s) of `{}` in {:.2}s",
            report.succeeded.len(),
            total,
            plan.image_name,
            start.elapsed().as_secs_f64()
        );

        Ok(report)
    }
}

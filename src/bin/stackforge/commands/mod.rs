//! Command implementations

pub mod build;
pub mod check;
pub mod combine;
pub mod completions;
pub mod list;
pub mod resolve;

use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::OutputFormat;
use stackforge::builder::verify::Discrepancy;
use stackforge::ops::Resolution;
use stackforge::util::diagnostic::{emit, emit_all, suggestions};
use stackforge::util::{Config, Diagnostic, GlobalContext};
use stackforge::{EntityStore, PlanSettings, ResolveErrors};

/// Load the declarations under the context root.
pub fn load_store(ctx: &GlobalContext) -> Result<EntityStore> {
    if !ctx.root().is_dir() {
        let diag = Diagnostic::error(format!(
            "declarations root {} does not exist",
            ctx.root().display()
        ))
        .with_suggestion(suggestions::NO_DECLARATIONS);
        emit(&diag, ctx.color());
        anyhow::bail!("no declarations to load");
    }

    EntityStore::load(ctx.root()).map_err(|errors| report(errors, ctx))
}

/// Plan settings from config, with an optional runtime image override.
pub fn plan_settings(config: &Config, runtime_image: Option<&str>) -> PlanSettings {
    let mut settings = PlanSettings::from_config(&config.plan);
    if let Some(image) = runtime_image {
        settings.runtime_image = image.to_string();
    }
    settings
}

/// Print every collected error and turn them into one failure.
pub fn report(errors: ResolveErrors, ctx: &GlobalContext) -> anyhow::Error {
    emit_all(&errors.diagnostics(), ctx.color());
    anyhow::anyhow!(
        "aborting due to {} previous error{}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" }
    )
}

/// Print advisory findings as warnings.
pub fn warn_discrepancies(found: &[Discrepancy], ctx: &GlobalContext) {
    for discrepancy in found {
        emit(&discrepancy.to_diagnostic(), ctx.color());
    }
}

/// Write a resolution in the requested format to `output` or stdout.
pub fn print_resolution(
    resolution: &Resolution,
    format: OutputFormat,
    output: Option<&Path>,
    ctx: &GlobalContext,
) -> Result<()> {
    let text = match format {
        OutputFormat::Text => resolution.plan.to_dockerfile(),
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(resolution)
                .context("failed to serialize plan")?;
            json.push('\n');
            json
        }
    };

    match output {
        Some(path) => {
            stackforge::util::fs::write_string(path, &text)?;
            eprintln!("       Wrote {}", path.display());
        }
        None => print!("{}", text),
    }

    warn_discrepancies(&resolution.discrepancies, ctx);

    if format == OutputFormat::Text {
        eprintln!(
            "    Resolved `{}` ({} stages, sha256:{})",
            resolution.plan.image_name,
            resolution.plan.stages.len() + 1,
            stackforge::util::hash::short(&resolution.fingerprint)
        );
    }

    Ok(())
}

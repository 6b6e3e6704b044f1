//! `stackforge build` command

use anyhow::Result;

use super::{load_store, plan_settings, report, warn_discrepancies};
use crate::cli::BuildArgs;
use stackforge::builder::CancelToken;
use stackforge::ops::{build, resolve, resolve_combined, BuildOptions};
use stackforge::util::GlobalContext;

pub fn execute(args: BuildArgs, ctx: &GlobalContext) -> Result<()> {
    let store = load_store(ctx)?;
    let config = ctx.load_config();
    let settings = plan_settings(&config, None);

    let resolution = match args.names.as_slice() {
        [name] => resolve(&store, args.tier, name, &settings),
        names => resolve_combined(&store, args.tier, names, &settings),
    }
    .map_err(|e| report(e, ctx))?;
    warn_discrepancies(&resolution.discrepancies, ctx);

    // CLI flags win over config
    let opts = BuildOptions {
        dry_run: args.dry_run,
        jobs: args.jobs.or(config.build.jobs),
        program: args.program.or(config.build.program),
        tag_prefix: config.build.tag_prefix,
        quiet: false,
    };

    let plan = &resolution.plan;
    let out_dir = ctx.image_dir(&plan.image_name);
    let outcome = build(plan, &out_dir, &opts, CancelToken::new())?;

    let Some(results) = outcome.report else {
        for (i, wave) in outcome.waves.iter().enumerate() {
            println!("wave {}: {}", i + 1, wave.join(" "));
        }
        eprintln!("       Wrote {}", outcome.dockerfile.display());
        return Ok(());
    };

    for failed in &results.failed {
        eprintln!("      Failed `{}`: {}", failed.stage, failed.message);
    }
    for skipped in &results.skipped {
        eprintln!(
            "     Skipped `{}` (blocked by `{}`)",
            skipped.stage, skipped.blocked_by
        );
    }

    if !results.is_success() {
        anyhow::bail!(
            "build of `{}` failed: {} stage(s) failed, {} skipped",
            plan.image_name,
            results.failed.len(),
            results.skipped.len() + results.cancelled.len()
        );
    }

    eprintln!(
        "    Finished `{}` ({} stages)",
        plan.image_name,
        results.succeeded.len()
    );
    Ok(())
}

//! `stackforge combine` command

use anyhow::Result;

use super::{load_store, plan_settings, print_resolution, report};
use crate::cli::CombineArgs;
use stackforge::ops::resolve_combined;
use stackforge::util::GlobalContext;
use stackforge::Tier;

pub fn execute(args: CombineArgs, ctx: &GlobalContext) -> Result<()> {
    let store = load_store(ctx)?;
    let config = ctx.load_config();
    let settings = plan_settings(&config, args.runtime_image.as_deref());

    let resolution = resolve_combined(&store, Tier::Tool, &args.tools, &settings)
        .map_err(|e| report(e, ctx))?;

    if let Some(combined) = &resolution.combined {
        tracing::debug!(
            "combined build dependencies: {}",
            combined.build_dependencies.join(" ")
        );
        for (tool, lib) in combined.all_libraries() {
            tracing::debug!("runtime library {} from {}", lib.display(), tool);
        }
    }

    print_resolution(&resolution, args.format, args.output.as_deref(), ctx)
}

//! `stackforge resolve` command

use anyhow::Result;

use super::{load_store, plan_settings, print_resolution, report};
use crate::cli::ResolveArgs;
use stackforge::ops::resolve;
use stackforge::util::GlobalContext;

pub fn execute(args: ResolveArgs, ctx: &GlobalContext) -> Result<()> {
    let store = load_store(ctx)?;
    let config = ctx.load_config();
    let settings = plan_settings(&config, args.runtime_image.as_deref());

    let resolution =
        resolve(&store, args.tier, &args.name, &settings).map_err(|e| report(e, ctx))?;

    print_resolution(&resolution, args.format, args.output.as_deref(), ctx)
}

//! `stackforge check` command
//!
//! Compares every declared version against what the synthesized stage
//! actually fetches. Findings are warnings unless `--strict` is given (or
//! `check.strict` is set in config).

use anyhow::Result;

use super::{load_store, plan_settings, report, warn_discrepancies};
use crate::cli::CheckArgs;
use stackforge::ops::check_versions;
use stackforge::resolver::{ResolveError, ResolveErrors};
use stackforge::util::GlobalContext;
use stackforge::{Entity, Tier};

pub fn execute(args: CheckArgs, ctx: &GlobalContext) -> Result<()> {
    let store = load_store(ctx)?;
    let config = ctx.load_config();
    let settings = plan_settings(&config, None);

    // A bare name is a tool if one exists, otherwise an application
    let mut entities: Vec<&Entity> = Vec::new();
    let mut missing: Vec<ResolveError> = Vec::new();
    for name in &args.names {
        let found = store
            .get(Tier::Tool, name)
            .or_else(|_| store.get(Tier::Application, name));
        match found {
            Ok(entity) => entities.push(entity),
            Err(e) => missing.push(e),
        }
    }
    if !missing.is_empty() {
        return Err(report(ResolveErrors(missing), ctx));
    }

    let found = check_versions(&store, &entities, &settings).map_err(|e| report(e, ctx))?;
    warn_discrepancies(&found, ctx);

    let strict = args.strict || config.check.is_strict();
    if found.is_empty() {
        eprintln!("    Finished no version discrepancies");
    } else if strict {
        anyhow::bail!(
            "{} version discrepanc{} found",
            found.len(),
            if found.len() == 1 { "y" } else { "ies" }
        );
    }

    Ok(())
}

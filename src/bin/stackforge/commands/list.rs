//! `stackforge list` command

use anyhow::Result;

use super::load_store;
use crate::cli::ListArgs;
use stackforge::util::GlobalContext;
use stackforge::{Entity, Tier};

pub fn execute(args: ListArgs, ctx: &GlobalContext) -> Result<()> {
    let store = load_store(ctx)?;

    let tiers: Vec<Tier> = match args.tier {
        Some(tier) => vec![tier],
        None => Tier::ALL.to_vec(),
    };

    for tier in tiers {
        let entities = store.load_tier(tier);
        println!("{} ({}):", tier, entities.len());
        for entity in entities {
            println!("  {}", describe(entity));
        }
    }

    Ok(())
}

fn describe(entity: &Entity) -> String {
    let mut line = format!("{} v{}", entity.name, entity.version);
    if !entity.category.is_empty() {
        line.push_str(&format!(" [{}]", entity.category));
    }
    if let Some(strategy) = entity.strategy() {
        line.push_str(&format!(" ({})", strategy));
    }
    if !entity.required_tools.is_empty() {
        line.push_str(&format!(" requires {}", entity.required_tools.join(", ")));
    }
    line
}

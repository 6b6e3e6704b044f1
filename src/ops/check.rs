//! Version consistency checking across declarations.

use crate::builder::context::PlanSettings;
use crate::builder::synthesize::plan_for;
use crate::builder::verify::{self, Discrepancy};
use crate::core::entity::{Entity, Tier};
use crate::core::store::EntityStore;
use crate::resolver::errors::{ResolveError, ResolveErrors};
use crate::resolver::order::{resolve_order, Target};

/// Check each entity's synthesized stage against its declared version.
///
/// An empty `entities` slice checks every tool and application in the store.
/// Every entity is resolved on its own; resolution failures are collected and
/// returned instead of any findings.
pub fn check_versions(
    store: &EntityStore,
    entities: &[&Entity],
    settings: &PlanSettings,
) -> Result<Vec<Discrepancy>, ResolveErrors> {
    let all: Vec<&Entity>;
    let entities = if entities.is_empty() {
        all = store.iter().filter(|e| e.tier != Tier::Base).collect();
        all.as_slice()
    } else {
        entities
    };

    let mut errors: Vec<ResolveError> = Vec::new();
    let mut found = Vec::new();

    for entity in entities {
        if entity.tier == Tier::Base {
            continue;
        }

        let plan = resolve_order(store, &[Target::new(entity.tier, &entity.name)])
            .and_then(|order| plan_for(&order, &entity.name, settings));

        match plan {
            Ok(plan) => found.extend(verify::check(entity, &plan)),
            Err(e) => errors.extend(e.0),
        }
    }

    if !errors.is_empty() {
        return Err(ResolveErrors(errors));
    }

    tracing::info!(
        "checked {} entit{}, {} discrepanc{}",
        entities.len(),
        if entities.len() == 1 { "y" } else { "ies" },
        found.len(),
        if found.len() == 1 { "y" } else { "ies" }
    );
    Ok(found)
}

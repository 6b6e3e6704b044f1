//! Dependency order resolution.
//!
//! The hierarchy is fixed: base, then tools, then applications. Tools only
//! depend on base. An application depends on base and on the tools it names
//! in `required_tools`. The resulting order is what keeps every stage
//! reference in the synthesized plan pointing backward.

use std::collections::HashSet;

use crate::core::entity::{Entity, Tier};
use crate::core::store::EntityStore;
use crate::resolver::errors::{ResolveError, ResolveErrors};

/// A requested entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub tier: Tier,
    pub name: String,
}

impl Target {
    pub fn new(tier: Tier, name: impl Into<String>) -> Self {
        Target {
            tier,
            name: name.into(),
        }
    }

    pub fn tool(name: impl Into<String>) -> Self {
        Target::new(Tier::Tool, name)
    }

    pub fn application(name: impl Into<String>) -> Self {
        Target::new(Tier::Application, name)
    }
}

/// Ordered output of [`resolve_order`].
#[derive(Debug, Clone)]
pub struct BuildOrder<'a> {
    entities: Vec<&'a Entity>,
}

impl<'a> BuildOrder<'a> {
    /// Entities in build order, base first.
    pub fn entities(&self) -> &[&'a Entity] {
        &self.entities
    }

    /// Names in build order.
    pub fn names(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.name.as_str()).collect()
    }

    /// Entities above the base tier.
    pub fn layers(&self) -> impl Iterator<Item = &'a Entity> + '_ {
        self.entities
            .iter()
            .copied()
            .filter(|e| e.tier != Tier::Base)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Compute the build order for `targets`.
///
/// Base is always first. Each tool appears exactly once, at the position of
/// its first reference. An application's required tools precede it in the
/// order the application declared them. Every unknown target and every
/// missing required tool is reported; nothing is returned on failure.
pub fn resolve_order<'a>(
    store: &'a EntityStore,
    targets: &[Target],
) -> Result<BuildOrder<'a>, ResolveErrors> {
    let mut errors = Vec::new();
    let mut placed: HashSet<(Tier, &str)> = HashSet::new();
    let mut entities: Vec<&'a Entity> = Vec::new();

    let base = store.base();
    placed.insert((Tier::Base, base.name.as_str()));
    entities.push(base);

    let mut place = |entity: &'a Entity, entities: &mut Vec<&'a Entity>| {
        if placed.insert((entity.tier, entity.name.as_str())) {
            entities.push(entity);
        }
    };

    for target in targets {
        let entity = match store.get(target.tier, &target.name) {
            Ok(entity) => entity,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        match entity.tier {
            Tier::Base => {}
            Tier::Tool => place(entity, &mut entities),
            Tier::Application => {
                let (tools, missing): (Vec<_>, Vec<_>) = entity
                    .required_tools
                    .iter()
                    .map(|name| (name, store.get(Tier::Tool, name).ok()))
                    .partition(|(_, found)| found.is_some());

                if !missing.is_empty() {
                    errors.push(ResolveError::UnresolvedDependency {
                        application: entity.name.clone(),
                        missing: missing.into_iter().map(|(n, _)| n.clone()).collect(),
                    });
                    continue;
                }

                for tool in tools.into_iter().filter_map(|(_, found)| found) {
                    place(tool, &mut entities);
                }
                place(entity, &mut entities);
            }
        }
    }

    if !errors.is_empty() {
        return Err(ResolveErrors(errors));
    }

    tracing::debug!(
        "build order: {}",
        entities
            .iter()
            .map(|e| e.name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    Ok(BuildOrder { entities })
}

//! Request resolution: from a tier and name(s) to a validated plan.

use serde::Serialize;

use crate::builder::combine::{combine, CombinedRequest};
use crate::builder::context::PlanSettings;
use crate::builder::plan::BuildPlan;
use crate::builder::synthesize::{plan_for, plan_for_combined};
use crate::builder::verify::{self, Discrepancy};
use crate::core::entity::{Entity, Tier};
use crate::core::store::EntityStore;
use crate::resolver::errors::{ResolveError, ResolveErrors};
use crate::resolver::order::{resolve_order, BuildOrder, Target};

/// A successfully resolved request.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub plan: BuildPlan,

    /// Advisory version findings; never fatal here
    pub discrepancies: Vec<Discrepancy>,

    /// Present for multi-tool requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<CombinedRequest>,

    /// SHA256 of the rendered descriptor
    pub fingerprint: String,
}

impl Resolution {
    fn new(plan: BuildPlan, order: &BuildOrder<'_>, combined: Option<CombinedRequest>) -> Self {
        let discrepancies = order
            .entities()
            .iter()
            .flat_map(|entity| verify::check(entity, &plan))
            .collect();
        let fingerprint = plan.fingerprint();

        Resolution {
            plan,
            discrepancies,
            combined,
            fingerprint,
        }
    }
}

/// Resolve a single entity into a plan.
pub fn resolve(
    store: &EntityStore,
    tier: Tier,
    name: &str,
    settings: &PlanSettings,
) -> Result<Resolution, ResolveErrors> {
    tracing::info!("resolving {} `{}`", tier, name);

    let order = resolve_order(store, &[Target::new(tier, name)])?;
    let plan = plan_for(&order, name, settings)?;
    Ok(Resolution::new(plan, &order, None))
}

/// Resolve several tools into one combined image.
///
/// Only the tool tier can be combined. Names are deduplicated and sorted; a
/// single name resolves exactly like [`resolve`].
pub fn resolve_combined(
    store: &EntityStore,
    tier: Tier,
    names: &[String],
    settings: &PlanSettings,
) -> Result<Resolution, ResolveErrors> {
    if tier != Tier::Tool {
        return Err(ResolveError::InvalidRequest {
            message: format!("only tools can be combined, not {}", tier),
        }
        .into());
    }

    // Stage order follows the request; sort so the image is the same
    // however the tools were listed
    let mut names = names.to_vec();
    names.sort();
    names.dedup();

    match names.as_slice() {
        [] => Err(ResolveError::InvalidRequest {
            message: "no tools given to combine".to_string(),
        }
        .into()),
        [single] => resolve(store, tier, single, settings),
        _ => {
            tracing::info!("combining tools {}", names.join(", "));

            let targets: Vec<Target> = names.iter().map(Target::tool).collect();
            let order = resolve_order(store, &targets)?;
            let tools: Vec<&Entity> = order.layers().collect();
            let combined = combine(&tools);

            for dup in &combined.duplicate_libraries {
                tracing::warn!(
                    "{} is provided by {}",
                    dup.path.display(),
                    dup.tools.join(" and ")
                );
            }

            let plan = plan_for_combined(&order, &combined, settings)?;
            Ok(Resolution::new(plan, &order, Some(combined)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::plan::FINAL_STAGE;
    use crate::test_support::fixtures::{application, base, binary_tool, source_tool, with_deps};

    fn store() -> EntityStore {
        EntityStore::from_entities([
            base(),
            with_deps(binary_tool("curl", "8.11.1"), ["A", "B"]),
            with_deps(source_tool("jq", "1.7.1"), ["B", "C"]),
            source_tool("git", "2.47.1"),
            source_tool("node", "22.12.0"),
            application("webapp", ["node", "git"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_resolve_single_tool() {
        let store = store();
        let res = resolve(&store, Tier::Tool, "curl", &PlanSettings::default()).unwrap();

        assert_eq!(res.plan.stage_names(), vec!["base", "curl"]);
        assert_eq!(res.plan.final_stage.name, FINAL_STAGE);
        assert!(res.discrepancies.is_empty());
        assert!(res.combined.is_none());
        assert_eq!(res.fingerprint.len(), 64);
    }

    #[test]
    fn test_resolve_is_reproducible() {
        let store = store();
        let settings = PlanSettings::default();
        let a = resolve(&store, Tier::Application, "webapp", &settings).unwrap();
        let b = resolve(&store, Tier::Application, "webapp", &settings).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_absent_tool_yields_no_plan() {
        let store = store();
        let err = resolve(&store, Tier::Tool, "wget", &PlanSettings::default()).unwrap_err();
        assert!(matches!(
            err.0.as_slice(),
            [ResolveError::NotFound { tier: Tier::Tool, .. }]
        ));
    }

    #[test]
    fn test_resolve_application_sharing_tool_name() {
        let store = EntityStore::from_entities([
            base(),
            source_tool("git", "2.47.1"),
            application("git", ["git"]),
        ])
        .unwrap();
        let res = resolve(&store, Tier::Application, "git", &PlanSettings::default()).unwrap();

        assert_eq!(res.plan.stage_names(), vec!["base", "git", "app-git"]);
        assert!(res.plan.to_dockerfile().contains("FROM base AS app-git\n"));
        assert!(res.discrepancies.is_empty());
    }

    #[test]
    fn test_combined_identifier_independent_of_order() {
        let store = store();
        let settings = PlanSettings::default();
        let names = |n: &[&str]| n.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let a = resolve_combined(&store, Tier::Tool, &names(&["node", "git"]), &settings).unwrap();
        let b = resolve_combined(&store, Tier::Tool, &names(&["git", "node"]), &settings).unwrap();

        assert_eq!(a.plan.image_name, "git-node");
        assert_eq!(a.plan.image_name, b.plan.image_name);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(
            a.combined.as_ref().map(|c| &c.build_dependencies),
            b.combined.as_ref().map(|c| &c.build_dependencies)
        );
    }

    #[test]
    fn test_combine_rejects_applications() {
        let store = store();
        let err = resolve_combined(
            &store,
            Tier::Application,
            &["webapp".to_string()],
            &PlanSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err.0[0], ResolveError::InvalidRequest { .. }));
    }

    #[test]
    fn test_combine_reports_every_missing_tool() {
        let store = store();
        let err = resolve_combined(
            &store,
            Tier::Tool,
            &["curl".to_string(), "wget".to_string(), "htop".to_string()],
            &PlanSettings::default(),
        )
        .unwrap_err();
        assert_eq!(err.len(), 2);
    }
}

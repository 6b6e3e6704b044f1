//! Build plan synthesis.
//!
//! Assembles the ordered stage sequence: the static base stage, one stage per
//! resolved tool or application, and the final runtime stage that copies only
//! runtime artifacts out of the earlier stages.

use std::collections::{BTreeSet, HashSet};

use crate::builder::combine::{CombinedRequest, LibraryGroup};
use crate::builder::context::{PlanSettings, DEFAULT_BUILDER_IMAGE};
use crate::builder::plan::{
    BuildPlan, BuildStage, CopiedArtifact, Directive, ImageRef, APPLICATION_STAGE_PREFIX,
    BASE_STAGE, FINAL_STAGE,
};
use crate::builder::render::path_word;
use crate::builder::strategy::{service_paths, StrategyResolver};
use crate::core::entity::{Entity, Strategy, Tier};
use crate::resolver::errors::{ResolveError, ResolveErrors};
use crate::resolver::order::BuildOrder;

/// The static base stage.
///
/// Identical for every plan built from the same base declaration and settings.
pub fn base_stage(base: &Entity, settings: &PlanSettings) -> BuildStage {
    let image = settings
        .builder_image
        .clone()
        .or_else(|| base.image.clone())
        .unwrap_or_else(|| DEFAULT_BUILDER_IMAGE.to_string());

    let mut stage =
        BuildStage::new(BASE_STAGE, ImageRef::External(image)).for_entity(Tier::Base, &base.name);
    if !base.packages.is_empty() {
        stage.push(Directive::InstallPackages {
            packages: base.packages.clone(),
        });
    }
    stage
}

/// Reject every entity whose strategy cannot be resolved.
///
/// Runs over the whole request before any stage is emitted, and reports all
/// offenders at once.
pub fn check_strategies<'a>(
    entities: impl IntoIterator<Item = &'a Entity>,
) -> Result<(), ResolveErrors> {
    let errors: Vec<ResolveError> = entities
        .into_iter()
        .filter(|e| e.tier != Tier::Base)
        .filter_map(|e| StrategyResolver::check_supported(e).err())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ResolveErrors(errors))
    }
}

/// Synthesize a plan building every entity in `order` into one image.
pub fn plan_for(
    order: &BuildOrder<'_>,
    image_name: &str,
    settings: &PlanSettings,
) -> Result<BuildPlan, ResolveErrors> {
    check_strategies(order.entities().iter().copied())?;

    let resolver = StrategyResolver::new(settings);
    let mut errors = Vec::new();
    let mut stages = Vec::new();

    for entity in order.layers() {
        match resolver.resolve(entity) {
            Ok(stage) => stages.push(stage),
            Err(e) => errors.push(e),
        }
    }

    if !errors.is_empty() {
        return Err(ResolveErrors(errors));
    }

    let groups = library_groups(order.layers());
    synthesize(order.entities(), stages, &groups, image_name, settings).map_err(Into::into)
}

/// Synthesize a plan for several tools sharing one dependency stage.
///
/// The merged build dependencies (plus whatever the strategies themselves
/// need) are installed once in `<identifier>-deps`; every tool stage builds
/// from it without installing packages again.
pub fn plan_for_combined(
    order: &BuildOrder<'_>,
    combined: &CombinedRequest,
    settings: &PlanSettings,
) -> Result<BuildPlan, ResolveErrors> {
    check_strategies(order.entities().iter().copied())?;

    let plain = StrategyResolver::new(settings);
    let deps_stage_name = combined.deps_stage();
    let shared = StrategyResolver::new(settings)
        .with_base(ImageRef::Stage(deps_stage_name.clone()))
        .without_packages();

    let mut errors = Vec::new();
    let mut packages: BTreeSet<String> = combined.build_dependencies.iter().cloned().collect();
    let mut tool_stages = Vec::new();

    for entity in order.layers() {
        // Packages the strategy would have installed on its own.
        match plain.resolve(entity) {
            Ok(stage) => packages.extend(stage.installed_packages().into_iter().map(String::from)),
            Err(e) => {
                errors.push(e);
                continue;
            }
        }

        match shared.resolve(entity) {
            Ok(stage) => tool_stages.push(stage),
            Err(e) => errors.push(e),
        }
    }

    if !errors.is_empty() {
        return Err(ResolveErrors(errors));
    }

    let mut deps = BuildStage::new(&deps_stage_name, ImageRef::Stage(BASE_STAGE.to_string()));
    deps.push(Directive::comment(format!(
        "build dependencies for {}",
        combined.tools.join(", ")
    )));
    if !packages.is_empty() {
        deps.push(Directive::InstallPackages {
            packages: packages.into_iter().collect(),
        });
    }

    let mut stages = Vec::with_capacity(tool_stages.len() + 1);
    stages.push(deps);
    stages.extend(tool_stages);

    synthesize(
        order.entities(),
        stages,
        &combined.runtime_libraries,
        &combined.identifier,
        settings,
    )
    .map_err(Into::into)
}

/// Assemble the final plan.
///
/// `ordered` starts with the base entity; `stages` are the strategy stages
/// for the remaining entities (plus any shared stages) in build order.
/// Applications get their required tools' artifacts copied in by stage
/// name; an application sharing its name with a tool gets a prefixed stage.
/// The plan is validated before it is returned, so a stage referencing
/// anything not emitted earlier is a `DanglingStageReference`.
pub fn synthesize(
    ordered: &[&Entity],
    mut stages: Vec<BuildStage>,
    libraries: &[LibraryGroup],
    image_name: &str,
    settings: &PlanSettings,
) -> Result<BuildPlan, ResolveError> {
    let (base, layers) = match ordered.split_first() {
        Some((base, layers)) if base.tier == Tier::Base => (*base, layers),
        _ => {
            return Err(ResolveError::InvalidRequest {
                message: "build order must start with the base entity".to_string(),
            })
        }
    };

    separate_application_stages(&mut stages);

    for entity in layers.iter().filter(|e| e.tier == Tier::Application) {
        let copies: Vec<CopiedArtifact> = entity
            .required_tools
            .iter()
            .filter_map(|name| {
                layers
                    .iter()
                    .find(|e| e.tier == Tier::Tool && &e.name == name)
            })
            .flat_map(|tool| runtime_copies(tool, &stage_name(&stages, tool)))
            .collect();

        if let Some(stage) = stages
            .iter_mut()
            .find(|s| s.is_for(Tier::Application, &entity.name))
        {
            stage.copied_artifacts.extend(copies);
        }
    }

    let final_stage = final_stage(layers, &stages, libraries, settings);

    let mut all = Vec::with_capacity(stages.len() + 1);
    all.push(base_stage(base, settings));
    all.append(&mut stages);

    let plan = BuildPlan::new(image_name, all, final_stage)?;
    tracing::debug!(
        "synthesized {} stage(s) for `{}`",
        plan.stages.len() + 1,
        plan.image_name
    );
    Ok(plan)
}

/// Per-entity runtime library groups in build order, each path kept only in
/// the first group that contributes it.
pub fn library_groups<'a>(entities: impl IntoIterator<Item = &'a Entity>) -> Vec<LibraryGroup> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter_map(|e| e.build.as_ref().map(|b| (e, b)))
        .map(|(e, b)| LibraryGroup {
            tier: e.tier,
            tool: e.name.clone(),
            libraries: b
                .runtime_libraries
                .iter()
                .filter(|lib| seen.insert((*lib).clone()))
                .cloned()
                .collect(),
        })
        .collect()
}

/// Give application stages that share a name with a tool stage a prefix.
fn separate_application_stages(stages: &mut [BuildStage]) {
    let tool_stages: HashSet<String> = stages
        .iter()
        .filter(|s| s.entity.as_ref().is_some_and(|o| o.tier == Tier::Tool))
        .map(|s| s.name.clone())
        .collect();

    for stage in stages.iter_mut() {
        let is_app = stage
            .entity
            .as_ref()
            .is_some_and(|o| o.tier == Tier::Application);
        if is_app && tool_stages.contains(&stage.name) {
            tracing::debug!(
                "application `{}` shares a tool's name; building it as `{}{}`",
                stage.name,
                APPLICATION_STAGE_PREFIX,
                stage.name
            );
            stage.name = format!("{}{}", APPLICATION_STAGE_PREFIX, stage.name);
        }
    }
}

/// Name of the stage built for `entity`, falling back to the entity name.
fn stage_name(stages: &[BuildStage], entity: &Entity) -> String {
    stages
        .iter()
        .find(|s| s.is_for(entity.tier, &entity.name))
        .map(|s| s.name.clone())
        .unwrap_or_else(|| entity.name.clone())
}

fn final_stage(
    layers: &[&Entity],
    stages: &[BuildStage],
    libraries: &[LibraryGroup],
    settings: &PlanSettings,
) -> BuildStage {
    let mut stage = BuildStage::new(
        FINAL_STAGE,
        ImageRef::External(settings.runtime_image.clone()),
    );

    for entity in layers {
        let Some(build) = entity.build.as_ref() else {
            continue;
        };
        let from = stage_name(stages, entity);

        if let (Some(binary), Some(dest)) = (&build.binary_path, build.artifact_dest()) {
            stage.copy(CopiedArtifact::new(binary, dest, &from).in_group(&from));
        } else if build.service.is_none() {
            tracing::warn!(
                "{} declares no binary_path; nothing from it reaches the final image",
                entity
            );
        }

        let group = libraries
            .iter()
            .find(|g| g.tier == entity.tier && g.tool == entity.name);
        for lib in group.map(|g| g.libraries.as_slice()).unwrap_or_default() {
            stage.copy(CopiedArtifact::same_path(lib, &from).in_group(&from));
        }

        if let (Strategy::Specialized, Some(service)) = (&build.strategy, &build.service) {
            for path in service_paths(service) {
                stage.copy(CopiedArtifact::same_path(&path, &from).in_group(&from));
            }
            stage.push(Directive::CreateUser {
                name: service.user.clone(),
            });
            stage.push(Directive::run(format!(
                "chown -R {user}:{user} {}",
                path_word(&service.data_dir),
                user = service.user
            )));
            stage.push(Directive::User {
                name: service.user.clone(),
            });
        }
    }

    stage
}

/// Artifact and runtime libraries of `tool`, copied from its stage.
fn runtime_copies(tool: &Entity, stage: &str) -> Vec<CopiedArtifact> {
    let Some(build) = tool.build.as_ref() else {
        return Vec::new();
    };

    let artifact = build
        .binary_path
        .as_ref()
        .zip(build.artifact_dest())
        .map(|(src, dest)| CopiedArtifact::new(src, dest, stage));

    let libs = build
        .runtime_libraries
        .iter()
        .map(|lib| CopiedArtifact::same_path(lib, stage));

    artifact.into_iter().chain(libs).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::builder::combine::combine;
    use crate::core::store::EntityStore;
    use crate::resolver::order::{resolve_order, Target};
    use crate::test_support::fixtures::{
        application, base, binary_tool, postgres, source_tool, with_deps, with_libs,
    };

    fn store() -> EntityStore {
        EntityStore::from_entities([
            base(),
            binary_tool("curl", "8.11.1"),
            with_libs(source_tool("jq", "1.7.1"), ["/usr/lib/libonig.so.5"]),
            with_libs(source_tool("git", "2.47.1"), ["/usr/lib/libpcre2-8.so.0"]),
            with_libs(source_tool("node", "22.12.0"), ["/usr/lib/libstdc++.so.6"]),
            application("webapp", ["node", "git"]),
            postgres(),
        ])
        .unwrap()
    }

    #[test]
    fn test_single_binary_tool_scenario() {
        let store = store();
        let settings = PlanSettings::default();
        let order = resolve_order(&store, &[Target::tool("curl")]).unwrap();
        let plan = plan_for(&order, "curl", &settings).unwrap();

        assert_eq!(plan.stage_names(), vec!["base", "curl"]);
        assert_eq!(plan.final_stage.name, FINAL_STAGE);

        let copies = &plan.final_stage.copied_artifacts;
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].source, PathBuf::from("/usr/local/bin/curl"));
        assert_eq!(copies[0].from_stage, "curl");
        assert!(plan.final_stage.directives.is_empty());
    }

    #[test]
    fn test_application_copies_tool_artifacts_by_stage_name() {
        let store = store();
        let settings = PlanSettings::default();
        let order = resolve_order(&store, &[Target::application("webapp")]).unwrap();
        let plan = plan_for(&order, "webapp", &settings).unwrap();

        assert_eq!(plan.stage_names(), vec!["base", "node", "git", "webapp"]);

        let app = plan.stage("webapp").unwrap();
        let sources: Vec<&str> = app
            .copied_artifacts
            .iter()
            .map(|a| a.from_stage.as_str())
            .collect();
        assert!(sources.contains(&"node"));
        assert!(sources.contains(&"git"));

        let final_sources: BTreeSet<&str> = plan
            .final_stage
            .copied_artifacts
            .iter()
            .map(|a| a.from_stage.as_str())
            .collect();
        assert_eq!(
            final_sources,
            ["git", "node", "webapp"].into_iter().collect()
        );
    }

    #[test]
    fn test_final_stage_never_copies_from_base() {
        let store = store();
        let settings = PlanSettings::default();
        let order = resolve_order(&store, &[Target::application("webapp")]).unwrap();
        let plan = plan_for(&order, "webapp", &settings).unwrap();

        assert!(plan
            .final_stage
            .copied_artifacts
            .iter()
            .all(|a| a.from_stage != BASE_STAGE));
        assert!(plan.final_stage.installed_packages().is_empty());
    }

    #[test]
    fn test_specialized_final_stage_copies_state() {
        let store = store();
        let settings = PlanSettings::default();
        let order = resolve_order(&store, &[Target::tool("postgres")]).unwrap();
        let plan = plan_for(&order, "postgres", &settings).unwrap();

        let dests: Vec<PathBuf> = plan
            .final_stage
            .copied_artifacts
            .iter()
            .map(|a| a.dest.clone())
            .collect();
        assert!(dests.contains(&PathBuf::from("/var/lib/postgresql/data")));
        assert!(plan
            .final_stage
            .directives
            .iter()
            .any(|d| matches!(d, Directive::CreateUser { name } if name == "postgres")));
    }

    #[test]
    fn test_unsupported_strategies_reported_before_any_stage() {
        let mut odd = binary_tool("odd", "1.0.0");
        if let Some(b) = odd.build.as_mut() {
            b.strategy = Strategy::Unsupported("nix".to_string());
        }
        let mut odder = binary_tool("odder", "1.0.0");
        if let Some(b) = odder.build.as_mut() {
            b.strategy = Strategy::Unsupported("bazel".to_string());
        }
        let store = EntityStore::from_entities([base(), odd, odder]).unwrap();
        let settings = PlanSettings::default();

        let order =
            resolve_order(&store, &[Target::tool("odd"), Target::tool("odder")]).unwrap();
        let err = plan_for(&order, "odd", &settings).unwrap_err();

        assert_eq!(err.len(), 2);
        assert!(err
            .iter()
            .all(|e| matches!(e, ResolveError::UnsupportedStrategy { .. })));
    }

    #[test]
    fn test_synthesize_rejects_missing_tool_stage() {
        let store = store();
        let settings = PlanSettings::default();
        let order = resolve_order(&store, &[Target::application("webapp")]).unwrap();

        let resolver = StrategyResolver::new(&settings);
        let app = store.get(Tier::Application, "webapp").unwrap();
        let stages = vec![resolver.resolve(app).unwrap()];

        let err = synthesize(order.entities(), stages, &[], "webapp", &settings).unwrap_err();
        assert!(matches!(err, ResolveError::DanglingStageReference { .. }));
    }

    #[test]
    fn test_copies_point_backward_under_shuffled_orders() {
        let store = store();
        let settings = PlanSettings::default();
        let targets = [
            Target::tool("curl"),
            Target::application("webapp"),
            Target::tool("jq"),
            Target::tool("postgres"),
        ];

        // Every rotation and reversal of the target list is a valid request.
        let mut requests = Vec::new();
        for shift in 0..targets.len() {
            let mut rotated = targets.to_vec();
            rotated.rotate_left(shift);
            requests.push(rotated.clone());
            rotated.reverse();
            requests.push(rotated);
        }

        for request in requests {
            let order = resolve_order(&store, &request).unwrap();
            let plan = plan_for(&order, "all", &settings).unwrap();

            let mut emitted: HashSet<&str> = HashSet::new();
            for stage in plan.all_stages() {
                for artifact in &stage.copied_artifacts {
                    assert!(
                        emitted.contains(artifact.from_stage.as_str()),
                        "{} copies from {} before it exists",
                        stage.name,
                        artifact.from_stage
                    );
                }
                emitted.insert(&stage.name);
            }
        }
    }

    #[test]
    fn test_application_named_like_its_tool() {
        let store = EntityStore::from_entities([
            base(),
            source_tool("git", "2.47.1"),
            application("git", ["git"]),
        ])
        .unwrap();
        let settings = PlanSettings::default();
        let order = resolve_order(&store, &[Target::application("git")]).unwrap();
        let plan = plan_for(&order, "git", &settings).unwrap();

        assert_eq!(plan.stage_names(), vec!["base", "git", "app-git"]);
        assert_eq!(plan.stage_for(Tier::Tool, "git").unwrap().name, "git");
        assert_eq!(
            plan.stage_for(Tier::Application, "git").unwrap().name,
            "app-git"
        );

        let app = plan.stage("app-git").unwrap();
        assert!(app.copied_artifacts.iter().all(|a| a.from_stage == "git"));

        let final_sources: BTreeSet<&str> = plan
            .final_stage
            .copied_artifacts
            .iter()
            .map(|a| a.from_stage.as_str())
            .collect();
        assert_eq!(final_sources, ["app-git", "git"].into_iter().collect());
    }

    #[test]
    fn test_application_with_unsupported_tool() {
        let mut odd = binary_tool("odd", "1.0.0");
        if let Some(b) = odd.build.as_mut() {
            b.strategy = Strategy::Unsupported("nix".to_string());
        }
        let store = EntityStore::from_entities([
            base(),
            odd,
            binary_tool("curl", "8.11.1"),
            application("site", ["curl", "odd"]),
        ])
        .unwrap();
        let settings = PlanSettings::default();

        let order = resolve_order(&store, &[Target::application("site")]).unwrap();
        let err = plan_for(&order, "site", &settings).unwrap_err();

        assert_eq!(
            err.0,
            vec![ResolveError::UnsupportedStrategy {
                tier: Tier::Tool,
                entity: "odd".to_string(),
                strategy: "nix".to_string(),
            }]
        );
    }

    #[test]
    fn test_combined_plan_with_specialized_tool() {
        let store = store();
        let settings = PlanSettings::default();

        let order =
            resolve_order(&store, &[Target::tool("curl"), Target::tool("postgres")]).unwrap();
        let tools: Vec<&Entity> = order.layers().collect();
        let combined = combine(&tools);
        let plan = plan_for_combined(&order, &combined, &settings).unwrap();

        assert_eq!(
            plan.stage_names(),
            vec!["base", "curl-postgres-deps", "curl", "postgres"]
        );

        let deps = plan.stage("curl-postgres-deps").unwrap().installed_packages();
        for pkg in ["libreadline-dev", "zlib1g-dev", "bzip2", "curl", "ca-certificates"] {
            assert_eq!(deps.iter().filter(|p| **p == pkg).count(), 1, "{}", pkg);
        }

        let pg = plan.stage("postgres").unwrap();
        assert!(pg.installed_packages().is_empty());
        assert_eq!(pg.base, ImageRef::Stage("curl-postgres-deps".to_string()));
        assert_eq!(pg.version_bindings(), vec!["16.4"]);
        assert!(pg
            .directives
            .iter()
            .any(|d| matches!(d, Directive::User { name } if name == "postgres")));

        let fin = &plan.final_stage;
        assert!(fin
            .copied_artifacts
            .iter()
            .any(|a| a.from_stage == "postgres" && a.dest == PathBuf::from("/var/lib/postgresql/data")));
        assert!(matches!(
            fin.directives.last(),
            Some(Directive::User { name }) if name == "postgres"
        ));
    }

    #[test]
    fn test_combined_plan_shares_dependency_stage() {
        let store = EntityStore::from_entities([
            base(),
            with_deps(binary_tool("curl", "8.11.1"), ["A", "B"]),
            with_deps(source_tool("jq", "1.7.1"), ["B", "C"]),
        ])
        .unwrap();
        let settings = PlanSettings::default();

        let order = resolve_order(&store, &[Target::tool("jq"), Target::tool("curl")]).unwrap();
        let tools: Vec<&Entity> = order.layers().collect();
        let combined = combine(&tools);
        let plan = plan_for_combined(&order, &combined, &settings).unwrap();

        assert_eq!(plan.image_name, "curl-jq");
        assert_eq!(plan.stage_names(), vec!["base", "curl-jq-deps", "jq", "curl"]);

        let deps = plan.stage("curl-jq-deps").unwrap().installed_packages();
        for pkg in ["A", "B", "C"] {
            assert_eq!(deps.iter().filter(|p| **p == pkg).count(), 1);
        }
        assert!(deps.contains(&"curl"));

        for name in ["jq", "curl"] {
            let stage = plan.stage(name).unwrap();
            assert!(stage.installed_packages().is_empty());
            assert_eq!(stage.base, ImageRef::Stage("curl-jq-deps".to_string()));
        }
    }
}

//! Multi-tool combination.
//!
//! When several tools go into one image, their build dependencies are
//! installed once in a shared stage and their runtime libraries are copied
//! once into the final stage.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Serialize;

use crate::core::entity::{Entity, Tier};

/// Runtime libraries contributed by one tool (or application).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryGroup {
    pub tier: Tier,
    pub tool: String,
    /// Libraries not already contributed by an earlier group
    pub libraries: Vec<PathBuf>,
}

/// A library path contributed by more than one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateLibrary {
    pub path: PathBuf,
    /// Contributing tools, sorted
    pub tools: Vec<String>,
}

/// Merged view of several tools built into one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedRequest {
    /// Sorted, hyphen-joined tool names
    pub identifier: String,
    /// Tool names, sorted
    pub tools: Vec<String>,
    /// Union of build dependencies, sorted, each once
    pub build_dependencies: Vec<String>,
    /// Runtime libraries grouped by contributing tool, groups sorted by tool
    pub runtime_libraries: Vec<LibraryGroup>,
    /// Advisory: paths more than one tool asked for
    pub duplicate_libraries: Vec<DuplicateLibrary>,
}

impl CombinedRequest {
    /// Name of the shared dependency stage.
    pub fn deps_stage(&self) -> String {
        format!("{}-deps", self.identifier)
    }

    /// Every distinct runtime library, in group order.
    pub fn all_libraries(&self) -> impl Iterator<Item = (&str, &PathBuf)> {
        self.runtime_libraries
            .iter()
            .flat_map(|g| g.libraries.iter().map(move |l| (g.tool.as_str(), l)))
    }
}

/// The identifier for a set of tool names, independent of input order.
pub fn combined_identifier<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let sorted: BTreeSet<&str> = names.into_iter().collect();
    sorted.into_iter().collect::<Vec<_>>().join("-")
}

/// Merge the build and runtime requirements of `entities`.
///
/// The result does not depend on the order of `entities`.
pub fn combine(entities: &[&Entity]) -> CombinedRequest {
    let mut sorted: Vec<&Entity> = entities.to_vec();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    sorted.dedup_by(|a, b| a.name == b.name);

    let tools: Vec<String> = sorted.iter().map(|e| e.name.clone()).collect();
    let identifier = combined_identifier(tools.iter().map(String::as_str));

    let build_dependencies: BTreeSet<String> = sorted
        .iter()
        .filter_map(|e| e.build.as_ref())
        .flat_map(|b| b.build_dependencies.iter().cloned())
        .collect();

    let mut contributors: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    let mut runtime_libraries = Vec::new();

    for entity in &sorted {
        let Some(build) = entity.build.as_ref() else {
            continue;
        };

        let mut libraries = Vec::new();
        for lib in &build.runtime_libraries {
            let owners = contributors.entry(lib.clone()).or_default();
            if owners.is_empty() {
                libraries.push(lib.clone());
            }
            owners.push(entity.name.clone());
        }

        runtime_libraries.push(LibraryGroup {
            tier: entity.tier,
            tool: entity.name.clone(),
            libraries,
        });
    }

    let duplicate_libraries: Vec<DuplicateLibrary> = contributors
        .into_iter()
        .filter(|(_, tools)| tools.len() > 1)
        .map(|(path, tools)| DuplicateLibrary { path, tools })
        .collect();

    for dup in &duplicate_libraries {
        tracing::debug!(
            "{} is contributed by {}; copying once",
            dup.path.display(),
            dup.tools.join(", ")
        );
    }

    CombinedRequest {
        identifier,
        tools,
        build_dependencies: build_dependencies.into_iter().collect(),
        runtime_libraries,
        duplicate_libraries,
    }
}

//! Entity store.
//!
//! Loads the base, tool, and application declarations from a declarations
//! root and indexes them by tier and name:
//!
//! ```text
//! <root>/base.yaml
//! <root>/tools/<name>.yaml
//! <root>/apps/<name>.yaml
//! ```
//!
//! All existence invariants are enforced here, once, at load time. Lookups
//! afterwards are pure reads.

use std::collections::BTreeMap;
use std::path::Path;

use crate::core::entity::{Entity, Tier};
use crate::resolver::errors::{ResolveError, ResolveErrors};
use crate::util::fs::{glob_files, read_to_string};

/// Base declaration file name.
pub const BASE_FILE: &str = "base.yaml";

/// Directory holding tool declarations.
pub const TOOLS_DIR: &str = "tools";

/// Directory holding application declarations.
pub const APPS_DIR: &str = "apps";

/// Indexed, immutable set of declared entities.
#[derive(Debug, Clone)]
pub struct EntityStore {
    base: Entity,
    tools: BTreeMap<String, Entity>,
    apps: BTreeMap<String, Entity>,
}

impl EntityStore {
    /// Load every declaration under `root`.
    ///
    /// All problems found are reported together.
    pub fn load(root: &Path) -> Result<Self, ResolveErrors> {
        tracing::debug!("loading declarations from {}", root.display());

        let mut errors = Vec::new();
        let mut entities = Vec::new();

        let base_path = root.join(BASE_FILE);
        if base_path.is_file() {
            match read_declaration(Tier::Base, &base_path) {
                Ok(entity) => entities.push(entity),
                Err(e) => errors.push(e),
            }
        }

        for (tier, dir) in [(Tier::Tool, TOOLS_DIR), (Tier::Application, APPS_DIR)] {
            let files = match glob_files(&root.join(dir), &["*.yaml", "*.yml"]) {
                Ok(files) => files,
                Err(e) => {
                    errors.push(ResolveError::InvalidRequest {
                        message: format!("failed to list {} declarations: {:#}", tier, e),
                    });
                    continue;
                }
            };

            for path in files {
                match read_declaration(tier, &path) {
                    Ok(entity) => entities.push(entity),
                    Err(e) => errors.push(e),
                }
            }
        }

        match Self::from_entities(entities) {
            Ok(store) if errors.is_empty() => Ok(store),
            Ok(_) => Err(ResolveErrors(errors)),
            Err(more) => {
                errors.extend(more.0);
                Err(ResolveErrors(errors))
            }
        }
    }

    /// Build a store from already-parsed entities.
    ///
    /// Enforces: exactly one base entity, unique names within each tier, and
    /// a build declaration on every tool and application.
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Result<Self, ResolveErrors> {
        let mut errors = Vec::new();
        let mut bases: Vec<Entity> = Vec::new();
        let mut tools = BTreeMap::new();
        let mut apps = BTreeMap::new();

        for entity in entities {
            if entity.tier != Tier::Base && entity.build.is_none() {
                errors.push(ResolveError::InvalidDeclaration {
                    entity: entity.name.clone(),
                    path: entity.source_path.clone(),
                    message: "missing `build` or `specialized` block".to_string(),
                });
                continue;
            }

            let index = match entity.tier {
                Tier::Base => {
                    bases.push(entity);
                    continue;
                }
                Tier::Tool => &mut tools,
                Tier::Application => &mut apps,
            };

            if let Some(existing) = index.get(&entity.name) {
                errors.push(duplicate(existing, &entity));
                continue;
            }
            index.insert(entity.name.clone(), entity);
        }

        let base = match bases.len() {
            0 => {
                errors.push(ResolveError::InvalidDeclaration {
                    entity: "base".to_string(),
                    path: None,
                    message: format!("no {} declaration found", BASE_FILE),
                });
                None
            }
            1 => bases.pop(),
            _ => {
                errors.push(ResolveError::DuplicateEntity {
                    tier: Tier::Base,
                    name: bases[0].name.clone(),
                    paths: bases.iter().filter_map(|b| b.source_path.clone()).collect(),
                });
                None
            }
        };

        match base {
            Some(base) if errors.is_empty() => {
                tracing::debug!(
                    "loaded {} tool(s) and {} application(s)",
                    tools.len(),
                    apps.len()
                );
                Ok(EntityStore { base, tools, apps })
            }
            _ => Err(ResolveErrors(errors)),
        }
    }

    /// The single base entity.
    pub fn base(&self) -> &Entity {
        &self.base
    }

    /// All entities of a tier, sorted by name.
    pub fn load_tier(&self, tier: Tier) -> Vec<&Entity> {
        match tier {
            Tier::Base => vec![&self.base],
            Tier::Tool => self.tools.values().collect(),
            Tier::Application => self.apps.values().collect(),
        }
    }

    /// Look up an entity by tier and name.
    pub fn get(&self, tier: Tier, name: &str) -> Result<&Entity, ResolveError> {
        let found = match tier {
            Tier::Base => Some(&self.base).filter(|b| b.name == name),
            Tier::Tool => self.tools.get(name),
            Tier::Application => self.apps.get(name),
        };

        found.ok_or_else(|| ResolveError::NotFound {
            tier,
            name: name.to_string(),
            suggestions: self.suggest(tier, name),
        })
    }

    /// Check if a tier contains a name.
    pub fn contains(&self, tier: Tier, name: &str) -> bool {
        self.get(tier, name).is_ok()
    }

    /// Iterate over every entity, base first, then tools, then applications.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        std::iter::once(&self.base)
            .chain(self.tools.values())
            .chain(self.apps.values())
    }

    /// Names in `tier` that look like a misspelling of `name`.
    fn suggest(&self, tier: Tier, name: &str) -> Vec<String> {
        self.load_tier(tier)
            .into_iter()
            .map(|e| e.name.as_str())
            .filter(|candidate| is_close(candidate, name))
            .map(str::to_string)
            .collect()
    }
}

fn read_declaration(tier: Tier, path: &Path) -> Result<Entity, ResolveError> {
    let invalid = |message: String| ResolveError::InvalidDeclaration {
        entity: file_stem(path),
        path: Some(path.to_path_buf()),
        message,
    };

    let contents = read_to_string(path).map_err(|e| invalid(format!("{:#}", e)))?;
    let mut entity =
        Entity::from_yaml(tier, &contents).map_err(|e| invalid(format!("invalid YAML: {}", e)))?;

    entity.source_path = Some(path.to_path_buf());
    Ok(entity)
}

fn duplicate(existing: &Entity, new: &Entity) -> ResolveError {
    ResolveError::DuplicateEntity {
        tier: new.tier,
        name: new.name.clone(),
        paths: [&existing.source_path, &new.source_path]
            .into_iter()
            .flatten()
            .cloned()
            .collect(),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Shortest name that gets prefix matches.
const MIN_PREFIX_LEN: usize = 3;

/// Prefix match, or an edit distance of at most two that is still shorter
/// than both names.
fn is_close(candidate: &str, wanted: &str) -> bool {
    let shorter = candidate.chars().count().min(wanted.chars().count());
    if shorter == 0 {
        return false;
    }
    let prefix = candidate.starts_with(wanted) || wanted.starts_with(candidate);
    if prefix && shorter >= MIN_PREFIX_LEN {
        return true;
    }
    let distance = edit_distance(candidate, wanted);
    distance <= 2 && distance < shorter
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }

    prev[b.len()]
}

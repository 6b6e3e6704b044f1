//! Version consistency checks.
//!
//! Compares each entity's declared version against the version literals bound
//! into its synthesized stage. Findings are advisory: a plan with
//! discrepancies is still a valid plan.

use std::cmp::Ordering;
use std::fmt;

use semver::Version;
use serde::Serialize;

use crate::builder::plan::BuildPlan;
use crate::core::entity::{Entity, Tier};
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Direction of a version mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Drift {
    /// The stage fetches a newer version than declared
    Upgrade,
    /// The stage fetches an older version than declared
    Downgrade,
    /// At least one side is not a semantic version
    Unknown,
}

impl Drift {
    /// Classify `synthesized` relative to `declared`.
    pub fn between(declared: &str, synthesized: &str) -> Self {
        match (Version::parse(declared), Version::parse(synthesized)) {
            (Ok(d), Ok(s)) => match s.cmp(&d) {
                Ordering::Greater => Drift::Upgrade,
                Ordering::Less => Drift::Downgrade,
                Ordering::Equal => Drift::Unknown,
            },
            _ => Drift::Unknown,
        }
    }
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Drift::Upgrade => "upgrade",
            Drift::Downgrade => "downgrade",
            Drift::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A non-fatal finding of the version checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// A stage binds a version other than the declared one
    VersionMismatch {
        entity: String,
        declared: String,
        synthesized: String,
        drift: Drift,
    },
    /// The entity's stage binds no version at all
    MissingVersionBinding {
        entity: String,
        stage: Option<String>,
    },
}

impl Discrepancy {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Discrepancy::VersionMismatch {
                entity,
                declared,
                synthesized,
                drift,
            } => Diagnostic::warning(format!(
                "`{}` declares version {} but its stage fetches {}",
                entity, declared, synthesized
            ))
            .with_context(format!("drift: {}", drift))
            .with_suggestion(suggestions::VERSION_DRIFT),
            Discrepancy::MissingVersionBinding { entity, stage } => {
                let diag = Diagnostic::warning(format!(
                    "`{}` has no version bound into its build stage",
                    entity
                ));
                match stage {
                    Some(stage) => diag.with_context(format!("stage `{}` fetches nothing", stage)),
                    None => diag.with_context("no stage was synthesized for it"),
                }
            }
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::VersionMismatch {
                entity,
                declared,
                synthesized,
                drift,
            } => write!(
                f,
                "{}: declared {}, synthesized {} ({})",
                entity, declared, synthesized, drift
            ),
            Discrepancy::MissingVersionBinding { entity, .. } => {
                write!(f, "{}: no version binding", entity)
            }
        }
    }
}

/// Check one entity against the plan it was built into.
pub fn check(entity: &Entity, plan: &BuildPlan) -> Vec<Discrepancy> {
    if entity.tier == Tier::Base {
        return Vec::new();
    }

    let Some(stage) = plan.stage_for(entity.tier, &entity.name) else {
        return vec![Discrepancy::MissingVersionBinding {
            entity: entity.name.clone(),
            stage: None,
        }];
    };

    let bindings = stage.version_bindings();
    if bindings.is_empty() {
        return vec![Discrepancy::MissingVersionBinding {
            entity: entity.name.clone(),
            stage: Some(stage.name.clone()),
        }];
    }

    let found: Vec<Discrepancy> = bindings
        .into_iter()
        .filter(|v| *v != entity.version)
        .map(|v| Discrepancy::VersionMismatch {
            entity: entity.name.clone(),
            declared: entity.version.clone(),
            synthesized: v.to_string(),
            drift: Drift::between(&entity.version, v),
        })
        .collect();

    for d in &found {
        tracing::debug!("{}", d);
    }
    found
}

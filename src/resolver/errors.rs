//! Resolution error types and diagnostics.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::entity::Tier;
use crate::util::diagnostic::{suggestions, Diagnostic};

/// Error during plan resolution.
///
/// Every variant is fatal for the request that produced it. None of them
/// are retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, MietteDiagnostic)]
pub enum ResolveError {
    #[error("{tier} `{name}` not found")]
    #[diagnostic(code(stackforge::resolve::not_found))]
    NotFound {
        tier: Tier,
        name: String,
        suggestions: Vec<String>,
    },

    #[error("application `{application}` requires missing tools: {}", .missing.join(", "))]
    #[diagnostic(code(stackforge::resolve::unresolved_dependency))]
    UnresolvedDependency {
        application: String,
        missing: Vec<String>,
    },

    #[error("{tier} `{entity}` uses unsupported build strategy `{strategy}`")]
    #[diagnostic(code(stackforge::resolve::unsupported_strategy))]
    UnsupportedStrategy {
        tier: Tier,
        entity: String,
        strategy: String,
    },

    #[error("stage `{stage}` references `{referenced}` before it is defined")]
    #[diagnostic(code(stackforge::plan::dangling_reference))]
    DanglingStageReference { stage: String, referenced: String },

    #[error("stage `{stage}` is defined more than once")]
    #[diagnostic(code(stackforge::plan::duplicate_stage))]
    DuplicateStage { stage: String },

    #[error("{tier} `{name}` is declared more than once")]
    #[diagnostic(code(stackforge::store::duplicate_entity))]
    DuplicateEntity {
        tier: Tier,
        name: String,
        paths: Vec<PathBuf>,
    },

    #[error("invalid declaration for `{entity}`: {message}")]
    #[diagnostic(code(stackforge::store::invalid_declaration))]
    InvalidDeclaration {
        entity: String,
        path: Option<PathBuf>,
        message: String,
    },

    #[error("invalid request: {message}")]
    #[diagnostic(code(stackforge::resolve::invalid_request))]
    InvalidRequest { message: String },
}

impl ResolveError {
    /// Shorthand for an invalid declaration without a known path.
    pub fn invalid(entity: impl Into<String>, message: impl Into<String>) -> Self {
        ResolveError::InvalidDeclaration {
            entity: entity.into(),
            path: None,
            message: message.into(),
        }
    }

    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ResolveError::NotFound {
                tier,
                name,
                suggestions: close,
            } => {
                let mut diag = Diagnostic::error(format!("could not find {} `{}`", tier, name));

                if !close.is_empty() {
                    diag = diag.with_context(format!("did you mean: {}?", close.join(", ")));
                }

                diag.with_suggestion("Check that the name is spelled correctly")
                    .with_suggestion(suggestions::LIST_ENTITIES)
            }

            ResolveError::UnresolvedDependency {
                application,
                missing,
            } => {
                let mut diag = Diagnostic::error(format!(
                    "application `{}` has unresolved tool requirements",
                    application
                ));

                for tool in missing {
                    diag = diag.with_context(format!("`{}` requires tool `{}`", application, tool));
                }

                diag.with_suggestion(suggestions::DECLARE_TOOL)
            }

            ResolveError::UnsupportedStrategy {
                tier,
                entity,
                strategy,
            } => Diagnostic::error(format!(
                "unsupported build strategy `{}` for {} `{}`",
                strategy, tier, entity
            ))
            .with_context("supported strategies: source, binary-fetch, specialized")
            .with_suggestion("Fix the `type` key in the build block"),

            ResolveError::DanglingStageReference { stage, referenced } => Diagnostic::error(
                format!("stage `{}` references undefined stage `{}`", stage, referenced),
            )
            .with_context("this is an internal resolution bug, not a declaration error")
            .with_suggestion(suggestions::REPORT_BUG),

            ResolveError::DuplicateStage { stage } => {
                Diagnostic::error(format!("stage `{}` is defined more than once", stage))
                    .with_context("entity names may not collide with reserved stage names")
                    .with_suggestion("Rename the entity")
            }

            ResolveError::DuplicateEntity { tier, name, paths } => {
                let mut diag =
                    Diagnostic::error(format!("{} `{}` is declared more than once", tier, name));

                for path in paths {
                    diag = diag.with_context(format!("declared in {}", path.display()));
                }

                diag.with_suggestion("Remove or rename one of the declarations")
            }

            ResolveError::InvalidDeclaration {
                entity,
                path,
                message,
            } => {
                let mut diag =
                    Diagnostic::error(format!("invalid declaration for `{}`", entity))
                        .with_context(message.clone());

                if let Some(path) = path {
                    diag = diag.with_location(path);
                }

                diag
            }

            ResolveError::InvalidRequest { message } => Diagnostic::error(message.clone()),
        }
    }
}

/// Every error collected while resolving one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveErrors(pub Vec<ResolveError>);

impl ResolveErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ResolveError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Diagnostics for every collected error.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.0.iter().map(ResolveError::to_diagnostic).collect()
    }
}

impl fmt::Display for ResolveErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{}", single),
            errors => {
                write!(f, "{} resolution errors", errors.len())?;
                for err in errors {
                    write!(f, "\n  - {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ResolveErrors {}

impl From<ResolveError> for ResolveErrors {
    fn from(err: ResolveError) -> Self {
        ResolveErrors(vec![err])
    }
}

impl From<Vec<ResolveError>> for ResolveErrors {
    fn from(errors: Vec<ResolveError>) -> Self {
        ResolveErrors(errors)
    }
}

//! Stackforge - container build plans from layered declarations
//!
//! This crate provides the core library functionality for stackforge:
//! loading base/tool/application declarations, resolving dependency order,
//! synthesizing multi-stage build plans, and executing them.

pub mod builder;
pub mod core;
pub mod ops;
pub mod resolver;
pub mod util;

/// Entity builders and on-disk declaration trees for unit tests.
#[cfg(test)]
pub mod test_support;

pub use builder::{BuildPlan, Discrepancy, PlanSettings};
pub use core::{Entity, EntityStore, Strategy, Tier};
pub use resolver::{ResolveError, ResolveErrors};
pub use util::context::GlobalContext;

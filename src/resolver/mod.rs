//! Dependency order resolution.
//!
//! The resolver is pure and deterministic: all declaration I/O happens in the
//! entity store before resolution starts.

pub mod errors;
pub mod order;

pub use errors::{ResolveError, ResolveErrors};
pub use order::{resolve_order, BuildOrder, Target};

//! High-level operations.
//!
//! Each command of the `stackforge` binary is a thin wrapper over one of
//! these.

pub mod build;
pub mod check;
pub mod resolve;

pub use build::{build, BuildOptions, BuildOutcome};
pub use check::check_versions;
pub use resolve::{resolve, resolve_combined, Resolution};

//! Test utilities for stackforge unit tests.
//!
//! Entity builders for in-memory stores, and an on-disk declaration tree for
//! tests that go through [`EntityStore::load`](crate::core::store::EntityStore::load).
//!
//! ```rust,ignore
//! use crate::test_support::fixtures::{application, base, binary_tool, source_tool};
//!
//! let store = EntityStore::from_entities([
//!     base(),
//!     binary_tool("curl", "8.11.1"),
//!     source_tool("jq", "1.7.1"),
//!     application("scraper", ["curl", "jq"]),
//! ])?;
//! ```

pub mod fixtures;

pub use fixtures::*;

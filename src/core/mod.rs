//! Core data structures for stackforge.
//!
//! - Entity declarations (base image, tools, applications)
//! - The entity store that loads and indexes them

pub mod entity;
pub mod store;

pub use entity::{BuildSpec, Entity, ServiceSpec, Strategy, Tier};
pub use store::EntityStore;

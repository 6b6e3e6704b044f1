//! Plan synthesis and execution.
//!
//! Strategy resolution turns each entity into a stage, synthesis assembles
//! the stages into a validated [`BuildPlan`], and the scheduler executes a
//! plan stage by stage.

pub mod archive;
pub mod combine;
pub mod context;
pub mod executor;
pub mod plan;
pub mod render;
pub mod scheduler;
pub mod strategy;
pub mod synthesize;
pub mod verify;

pub use combine::{combine, CombinedRequest};
pub use context::PlanSettings;
pub use executor::ContainerRunner;
pub use plan::{BuildPlan, BuildStage, CopiedArtifact, Directive, ImageRef};
pub use scheduler::{CancelToken, ScheduleReport, StageRunner, StageScheduler};
pub use strategy::StrategyResolver;
pub use verify::Discrepancy;

//! Plan context - request-scoped settings for stage synthesis.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::config::PlanConfig;

/// Default runtime image for the final stage.
pub const DEFAULT_RUNTIME_IMAGE: &str = "debian:bookworm-slim";

/// Default builder image when the base declaration names none.
pub const DEFAULT_BUILDER_IMAGE: &str = "debian:bookworm";

/// Default install prefix for source builds.
pub const DEFAULT_PREFIX: &str = "/usr/local";

/// Settings passed explicitly into every resolver call.
///
/// Nothing in the resolution pipeline reads ambient state; anything that
/// varies between requests lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSettings {
    /// Overrides the base declaration's `image`
    pub builder_image: Option<String>,

    /// Image the final stage starts from
    pub runtime_image: String,

    /// `--prefix` for configure
    pub prefix: PathBuf,

    /// `make -j` value; None means `$(nproc)`
    pub make_jobs: Option<usize>,

    /// Root for extracted sources inside build stages
    pub work_dir: PathBuf,
}

impl Default for PlanSettings {
    fn default() -> Self {
        PlanSettings {
            builder_image: None,
            runtime_image: DEFAULT_RUNTIME_IMAGE.to_string(),
            prefix: PathBuf::from(DEFAULT_PREFIX),
            make_jobs: None,
            work_dir: PathBuf::from("/tmp/build"),
        }
    }
}

impl PlanSettings {
    /// Settings from the `[plan]` config section, defaults elsewhere.
    pub fn from_config(config: &PlanConfig) -> Self {
        let defaults = PlanSettings::default();
        PlanSettings {
            builder_image: config.builder_image.clone(),
            runtime_image: config
                .runtime_image
                .clone()
                .unwrap_or(defaults.runtime_image),
            prefix: config.prefix.clone().unwrap_or(defaults.prefix),
            make_jobs: config.make_jobs,
            work_dir: defaults.work_dir,
        }
    }

    /// Directory a given entity's sources are extracted into.
    pub fn source_dir(&self, entity: &str) -> PathBuf {
        self.work_dir.join(entity)
    }

    /// The `-j` argument for make.
    pub fn jobs_arg(&self) -> String {
        match self.make_jobs {
            Some(n) => n.to_string(),
            None => "$(nproc)".to_string(),
        }
    }
}

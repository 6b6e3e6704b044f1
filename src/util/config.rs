//! Configuration file support.
//!
//! Two locations are read:
//! - Global: `~/.stackforge/config.toml` (user-wide defaults)
//! - Project: `.stackforge/config.toml` under the declarations root
//!
//! Project values win over global ones; command-line flags win over both.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::util::fs::read_to_string;

/// Name of the per-project and per-user configuration directory.
pub const CONFIG_DIR: &str = ".stackforge";

/// Configuration file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Merged configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plan synthesis settings
    pub plan: PlanConfig,

    /// Execution settings for `build`
    pub build: BuildConfig,

    /// Version checker settings
    pub check: CheckConfig,
}

/// Settings that shape the synthesized plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Overrides the base declaration's image
    pub builder_image: Option<String>,

    /// Image the final stage starts from
    pub runtime_image: Option<String>,

    /// Install prefix passed to configure
    pub prefix: Option<PathBuf>,

    /// Parallel make jobs inside a stage
    pub make_jobs: Option<usize>,
}

/// Settings for executing plans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Container engine (`docker`, `podman`, ...)
    pub program: Option<String>,

    /// Stages built concurrently
    pub jobs: Option<usize>,

    /// Prefix for image tags
    pub tag_prefix: Option<String>,
}

/// Settings for the version checker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Treat discrepancies as failures
    pub strict: Option<bool>,
}

impl CheckConfig {
    pub fn is_strict(&self) -> bool {
        self.strict.unwrap_or(false)
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = read_to_string(path)?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if the file is missing or
    /// unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: Config) {
        if other.plan.builder_image.is_some() {
            self.plan.builder_image = other.plan.builder_image;
        }
        if other.plan.runtime_image.is_some() {
            self.plan.runtime_image = other.plan.runtime_image;
        }
        if other.plan.prefix.is_some() {
            self.plan.prefix = other.plan.prefix;
        }
        if other.plan.make_jobs.is_some() {
            self.plan.make_jobs = other.plan.make_jobs;
        }

        if other.build.program.is_some() {
            self.build.program = other.build.program;
        }
        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }
        if other.build.tag_prefix.is_some() {
            self.build.tag_prefix = other.build.tag_prefix;
        }

        if other.check.strict.is_some() {
            self.check.strict = other.check.strict;
        }
    }
}

/// Load merged configuration from global and project locations.
///
/// Order of precedence (highest to lowest):
/// 1. Project config (`.stackforge/config.toml`)
/// 2. Global config (`~/.stackforge/config.toml`)
/// 3. Defaults
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Config {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        config.merge(Config::load_or_default(global_path));
    }
    config.merge(Config::load_or_default(project_path));

    config
}

/// The global config directory (`~/.stackforge`).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(CONFIG_DIR))
}

/// The project config file under `root`.
pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_DIR).join(CONFIG_FILE)
}

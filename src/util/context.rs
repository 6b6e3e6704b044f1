//! Global context for stackforge operations.
//!
//! Holds the paths every command needs: the working directory, the
//! declarations root, and the per-user directory for global configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::store::BASE_FILE;
use crate::util::config::{self, Config, CONFIG_DIR};

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Declarations root (directory holding `base.yaml`)
    root: PathBuf,

    /// Per-user data directory (~/.stackforge/)
    home: PathBuf,

    /// Whether to use verbose output
    verbose: bool,

    /// Whether to use colors in output
    color: bool,
}

impl GlobalContext {
    /// Create a context rooted at the nearest directory (from cwd upward)
    /// containing `base.yaml`, or at cwd if there is none.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        let root = find_root(&cwd).unwrap_or_else(|| cwd.clone());

        let home = config::global_config_dir().unwrap_or_else(|| PathBuf::from(CONFIG_DIR));

        Ok(GlobalContext {
            cwd,
            root,
            home,
            verbose: false,
            color: true,
        })
    }

    /// Use an explicit declarations root.
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            self.cwd.join(root)
        };
        self
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Set color output.
    pub fn set_color(&mut self, color: bool) {
        self.color = color;
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Get the declarations root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the per-user directory (~/.stackforge/).
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Get the global configuration file path.
    pub fn global_config_path(&self) -> PathBuf {
        self.home.join(config::CONFIG_FILE)
    }

    /// Get the project-local stackforge directory.
    pub fn project_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    /// Get the project configuration file path.
    pub fn project_config_path(&self) -> PathBuf {
        config::project_config_path(&self.root)
    }

    /// Get the project-local target directory.
    pub fn target_dir(&self) -> PathBuf {
        self.project_dir().join("target")
    }

    /// Output directory for one image.
    pub fn image_dir(&self, image: &str) -> PathBuf {
        self.target_dir().join(image)
    }

    /// Load global and project configuration, project winning.
    pub fn load_config(&self) -> Config {
        config::load_config(
            Some(&self.global_config_path()),
            &self.project_config_path(),
        )
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if color output is enabled.
    pub fn color(&self) -> bool {
        self.color
    }
}

/// Nearest ancestor of `start` (inclusive) holding a base declaration.
pub fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(BASE_FILE).is_file())
        .map(Path::to_path_buf)
}

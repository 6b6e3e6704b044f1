//! Build plan types.
//!
//! A BuildPlan is an ordered list of stages plus exactly one final runtime
//! stage. Each stage starts from an external image or an earlier stage and
//! carries typed directives; versions stay typed fields all the way to the
//! renderer so they can be inspected structurally.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::builder::archive::ArchiveFormat;
use crate::builder::render::render_dockerfile;
use crate::core::entity::Tier;
use crate::resolver::errors::ResolveError;
use crate::util::hash::sha256_str;

/// Name of the minimal runtime stage.
pub const FINAL_STAGE: &str = "final";

/// Name of the static base stage.
pub const BASE_STAGE: &str = "base";

/// Prefix given to an application stage whose name a tool stage already uses.
pub const APPLICATION_STAGE_PREFIX: &str = "app-";

/// What a stage builds on top of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum ImageRef {
    /// An image pulled from a registry
    External(String),
    /// A stage defined earlier in the same plan
    Stage(String),
}

impl ImageRef {
    /// Referenced stage name, if this is a stage reference.
    pub fn stage(&self) -> Option<&str> {
        match self {
            ImageRef::External(_) => None,
            ImageRef::Stage(name) => Some(name),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::External(image) => f.write_str(image),
            ImageRef::Stage(name) => f.write_str(name),
        }
    }
}

/// A single shell-equivalent instruction inside a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    /// Install OS packages
    InstallPackages { packages: Vec<String> },
    /// Download `url` (already version-substituted) to `dest`
    Fetch {
        url: String,
        /// Version literal the URL binds, if one is recognizable
        version: Option<String>,
        dest: PathBuf,
    },
    /// Unpack a fetched archive
    Extract {
        archive: PathBuf,
        format: ArchiveFormat,
        dest: PathBuf,
    },
    /// Change working directory
    Workdir { path: PathBuf },
    /// Arbitrary command
    Run { command: String },
    /// `./configure --prefix=<prefix> <flags>`
    Configure { prefix: PathBuf, flags: Vec<String> },
    /// `make && make install`
    CompileInstall { jobs: String },
    /// Strip debug symbols
    Strip { paths: Vec<PathBuf> },
    /// Set file mode
    Chmod { path: PathBuf, mode: u32 },
    /// Create a system account
    CreateUser { name: String },
    /// Create a directory, optionally owned by an account
    CreateDir { path: PathBuf, owner: Option<String> },
    /// Switch the identity subsequent directives run as
    User { name: String },
    /// Write literal `key = value` lines
    RenderConfig {
        path: PathBuf,
        entries: BTreeMap<String, String>,
        owner: Option<String>,
    },
    /// Smoke test
    Verify { command: String },
    /// Annotation for human readers
    Comment { text: String },
}

impl Directive {
    pub fn run(command: impl Into<String>) -> Self {
        Directive::Run {
            command: command.into(),
        }
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Directive::Comment { text: text.into() }
    }

    /// Version literal bound into this directive, if any.
    pub fn version_binding(&self) -> Option<&str> {
        match self {
            Directive::Fetch { version, .. } => version.as_deref(),
            _ => None,
        }
    }
}

/// A file or directory copied out of an earlier stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopiedArtifact {
    /// Path inside the source stage
    pub source: PathBuf,
    /// Path inside this stage
    pub dest: PathBuf,
    /// Stage the artifact comes from
    pub from_stage: String,
    /// Section label used when rendering (e.g. contributing tool)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl CopiedArtifact {
    pub fn new(
        source: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
        from_stage: impl Into<String>,
    ) -> Self {
        CopiedArtifact {
            source: source.into(),
            dest: dest.into(),
            from_stage: from_stage.into(),
            group: None,
        }
    }

    /// Copy a path to the same location in this stage.
    pub fn same_path(path: impl AsRef<Path>, from_stage: impl Into<String>) -> Self {
        let path = path.as_ref();
        CopiedArtifact::new(path, path, from_stage)
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// The entity a stage was synthesized for.
///
/// Names are only unique within a tier, so stages are looked up by both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageOwner {
    pub tier: Tier,
    pub name: String,
}

/// One step in the synthesized plan.
///
/// Artifact copies are applied directly after the stage starts, before any
/// directive runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStage {
    /// Stage name (unique within a plan)
    pub name: String,
    /// Image or earlier stage this one starts from
    pub base: ImageRef,
    /// Ordered instructions
    pub directives: Vec<Directive>,
    /// Artifacts copied from earlier stages
    pub copied_artifacts: Vec<CopiedArtifact>,
    /// Entity this stage was synthesized for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<StageOwner>,
}

impl BuildStage {
    /// Create an empty stage.
    pub fn new(name: impl Into<String>, base: ImageRef) -> Self {
        BuildStage {
            name: name.into(),
            base,
            directives: Vec::new(),
            copied_artifacts: Vec::new(),
            entity: None,
        }
    }

    /// Mark which entity this stage belongs to.
    pub fn for_entity(mut self, tier: Tier, name: impl Into<String>) -> Self {
        self.entity = Some(StageOwner {
            tier,
            name: name.into(),
        });
        self
    }

    /// True if this stage was synthesized for the entity `tier`/`name`.
    pub fn is_for(&self, tier: Tier, name: &str) -> bool {
        self.entity
            .as_ref()
            .is_some_and(|owner| owner.tier == tier && owner.name == name)
    }

    pub fn push(&mut self, directive: Directive) {
        self.directives.push(directive);
    }

    pub fn extend(&mut self, directives: impl IntoIterator<Item = Directive>) {
        self.directives.extend(directives);
    }

    pub fn copy(&mut self, artifact: CopiedArtifact) {
        self.copied_artifacts.push(artifact);
    }

    /// Every version literal bound into this stage's directives.
    pub fn version_bindings(&self) -> Vec<&str> {
        self.directives
            .iter()
            .filter_map(Directive::version_binding)
            .collect()
    }

    /// Stages this one depends on (base reference plus artifact sources).
    pub fn referenced_stages(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.base
            .stage()
            .into_iter()
            .chain(self.copied_artifacts.iter().map(|a| a.from_stage.as_str()))
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Packages installed by this stage.
    pub fn installed_packages(&self) -> Vec<&str> {
        self.directives
            .iter()
            .filter_map(|d| match d {
                Directive::InstallPackages { packages } => Some(packages),
                _ => None,
            })
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// A complete, validated build plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    /// Image identifier (entity name or combined identifier)
    pub image_name: String,
    /// Build stages in order
    pub stages: Vec<BuildStage>,
    /// The minimal runtime stage
    pub final_stage: BuildStage,
}

impl BuildPlan {
    /// Assemble and validate a plan.
    ///
    /// Fails if any stage references a stage that is not defined earlier,
    /// or if two stages share a name.
    pub fn new(
        image_name: impl Into<String>,
        stages: Vec<BuildStage>,
        final_stage: BuildStage,
    ) -> Result<Self, ResolveError> {
        let plan = BuildPlan {
            image_name: image_name.into(),
            stages,
            final_stage,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Check that every stage reference points backward and names are unique.
    pub fn validate(&self) -> Result<(), ResolveError> {
        let mut defined: HashSet<&str> = HashSet::new();

        for stage in self.all_stages() {
            for referenced in stage.referenced_stages() {
                if !defined.contains(referenced) {
                    return Err(ResolveError::DanglingStageReference {
                        stage: stage.name.clone(),
                        referenced: referenced.to_string(),
                    });
                }
            }

            if !defined.insert(stage.name.as_str()) {
                return Err(ResolveError::DuplicateStage {
                    stage: stage.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Every stage including the final one, in order.
    pub fn all_stages(&self) -> impl Iterator<Item = &BuildStage> {
        self.stages.iter().chain(std::iter::once(&self.final_stage))
    }

    /// Names of the build stages (excluding the final stage).
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&BuildStage> {
        self.all_stages().find(|s| s.name == name)
    }

    /// The stage synthesized for an entity.
    pub fn stage_for(&self, tier: Tier, name: &str) -> Option<&BuildStage> {
        self.stages.iter().find(|s| s.is_for(tier, name))
    }

    /// Render as a multi-stage Dockerfile.
    pub fn to_dockerfile(&self) -> String {
        render_dockerfile(self)
    }

    /// SHA256 of the rendered descriptor.
    ///
    /// Identical requests produce identical fingerprints.
    pub fn fingerprint(&self) -> String {
        sha256_str(&self.to_dockerfile())
    }
}

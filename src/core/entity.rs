//! Entity declarations.
//!
//! An entity is the declared unit of build intent: the single base image,
//! a tool, or an application. Entities are deserialized from YAML documents
//! and never mutated after the store has loaded them.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// One of the three fixed build layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Base,
    Tool,
    Application,
}

impl Tier {
    /// All tiers, in build order.
    pub const ALL: [Tier; 3] = [Tier::Base, Tier::Tool, Tier::Application];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Base => "base",
            Tier::Tool => "tool",
            Tier::Application => "application",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "base" => Ok(Tier::Base),
            "tool" | "tools" => Ok(Tier::Tool),
            "application" | "app" | "apps" => Ok(Tier::Application),
            _ => Err(format!(
                "invalid tier '{}'; expected 'base', 'tool', or 'application'",
                s
            )),
        }
    }
}

/// The polymorphic build approach for an entity.
///
/// Unknown values are kept as `Unsupported` so the strategy resolver can
/// report them with the entity's context instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Strategy {
    /// Download a source archive, configure, compile, install
    Source,
    /// Download a prebuilt executable
    BinaryFetch,
    /// Stateful service needing post-install setup under its own identity
    Specialized,
    /// Anything else found in a declaration
    Unsupported(String),
}

impl Strategy {
    pub fn as_str(&self) -> &str {
        match self {
            Strategy::Source => "source",
            Strategy::BinaryFetch => "binary-fetch",
            Strategy::Specialized => "specialized",
            Strategy::Unsupported(s) => s,
        }
    }
}

impl From<String> for Strategy {
    fn from(s: String) -> Self {
        match s.as_str() {
            "source" => Strategy::Source,
            "binary-fetch" | "binary_fetch" | "binary" => Strategy::BinaryFetch,
            "specialized" => Strategy::Specialized,
            _ => Strategy::Unsupported(s),
        }
    }
}

impl From<Strategy> for String {
    fn from(s: Strategy) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-install state for a specialized entity (e.g. a database that needs
/// an initialized data directory owned by a service account).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Non-root account the service runs as
    pub user: String,

    /// Data directory created and owned by `user`
    pub data_dir: PathBuf,

    /// Privileged commands run before switching identity
    #[serde(default)]
    pub setup_steps: Vec<String>,

    /// Commands run as `user` (e.g. `initdb`)
    #[serde(default)]
    pub init_steps: Vec<String>,

    /// Config file rendered after initialization
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// Literal key/value settings written to `config_file`
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Placeholder substituted with the declared version in URL templates.
pub const VERSION_PLACEHOLDER: &str = "{version}";

/// Strategy-specific build declaration for a tool or application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Build strategy (`type` in the YAML document)
    #[serde(rename = "type")]
    pub strategy: Strategy,

    /// Download URL template with a `{version}` placeholder
    #[serde(default)]
    pub url: Option<String>,

    /// Packages needed only while building
    #[serde(default)]
    pub build_dependencies: Vec<String>,

    /// Shared libraries needed at run time
    #[serde(default)]
    pub runtime_libraries: Vec<PathBuf>,

    /// Flags passed to `./configure`
    #[serde(default)]
    pub configure_flags: Vec<String>,

    /// Commands run after extraction, before configure
    #[serde(default)]
    pub custom_steps: Vec<String>,

    /// Where the build leaves the artifact
    #[serde(default)]
    pub binary_path: Option<PathBuf>,

    /// Where the artifact lands in the runtime image
    #[serde(default)]
    pub install_path: Option<PathBuf>,

    /// Smoke-test invocation
    #[serde(default)]
    pub test_command: Option<String>,

    /// Service state for the specialized strategy
    #[serde(default)]
    pub service: Option<ServiceSpec>,
}

impl BuildSpec {
    /// Create an empty build spec with the given strategy.
    pub fn new(strategy: Strategy) -> Self {
        BuildSpec {
            strategy,
            url: None,
            build_dependencies: Vec::new(),
            runtime_libraries: Vec::new(),
            configure_flags: Vec::new(),
            custom_steps: Vec::new(),
            binary_path: None,
            install_path: None,
            test_command: None,
            service: None,
        }
    }

    /// Substitute `version` into the URL template.
    pub fn render_url(&self, version: &str) -> Option<String> {
        self.url
            .as_ref()
            .map(|u| u.replace(VERSION_PLACEHOLDER, version))
    }

    /// Version the URL actually fetches.
    ///
    /// With a `{version}` placeholder that is the declared version; a pinned
    /// URL binds whatever version literal its file name carries.
    pub fn fetched_version(&self, declared: &str) -> Option<String> {
        let url = self.url.as_deref()?;
        if url.contains(VERSION_PLACEHOLDER) {
            Some(declared.to_string())
        } else {
            version_in_url(url)
        }
    }

    /// Runtime destination of the main artifact.
    ///
    /// Defaults to `binary_path` when no separate install path is declared.
    pub fn artifact_dest(&self) -> Option<&Path> {
        self.install_path
            .as_deref()
            .or(self.binary_path.as_deref())
    }

    fn dedup_ordered_sets(&mut self) {
        dedup_in_place(&mut self.build_dependencies);
        dedup_in_place(&mut self.runtime_libraries);
    }
}

/// A declared base image, tool, or application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub name: String,
    pub version: String,
    pub tier: Tier,
    pub description: String,
    pub category: String,

    /// Build declaration (None only for the base tier)
    pub build: Option<BuildSpec>,

    /// Tools an application needs, in declared order
    pub required_tools: Vec<String>,

    /// External builder image (base tier)
    pub image: Option<String>,

    /// Packages installed into the base stage (base tier)
    pub packages: Vec<String>,

    /// File this entity was loaded from
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Entity {
    /// Create an entity with no build declaration.
    pub fn new(tier: Tier, name: impl Into<String>, version: impl Into<String>) -> Self {
        Entity {
            name: name.into(),
            version: version.into(),
            tier,
            description: String::new(),
            category: String::new(),
            build: None,
            required_tools: Vec::new(),
            image: None,
            packages: Vec::new(),
            source_path: None,
        }
    }

    /// Attach a build declaration.
    pub fn with_build(mut self, build: BuildSpec) -> Self {
        self.build = Some(build);
        self
    }

    /// Set the required tools (applications).
    pub fn with_required_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set the category tag.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Build strategy, if this entity has a build declaration.
    pub fn strategy(&self) -> Option<&Strategy> {
        self.build.as_ref().map(|b| &b.strategy)
    }

    /// Parse a YAML declaration for the given tier.
    pub fn from_yaml(tier: Tier, contents: &str) -> Result<Self, serde_yaml::Error> {
        let raw: RawEntity = serde_yaml::from_str(contents)?;
        Ok(raw.into_entity(tier))
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Raw entity as deserialized from YAML.
#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    version: VersionLiteral,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    build: Option<BuildSpec>,
    #[serde(default)]
    specialized: Option<BuildSpec>,
    #[serde(default)]
    required_tools: Vec<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    packages: Vec<String>,
}

/// YAML reads `1.23` as a float; keep whatever literal was written.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VersionLiteral {
    Text(String),
    Number(serde_yaml::Number),
}

impl VersionLiteral {
    fn into_string(self) -> String {
        match self {
            VersionLiteral::Text(s) => s,
            VersionLiteral::Number(n) => n.to_string(),
        }
    }
}

impl RawEntity {
    fn into_entity(self, tier: Tier) -> Entity {
        let mut build = self.build.or(self.specialized);
        if let Some(ref mut b) = build {
            b.dedup_ordered_sets();
        }
        let mut required_tools = self.required_tools;
        dedup_in_place(&mut required_tools);
        let mut packages = self.packages;
        dedup_in_place(&mut packages);

        Entity {
            name: self.name,
            version: self.version.into_string(),
            tier,
            description: self.description,
            category: self.category,
            build,
            required_tools,
            image: self.image,
            packages,
            source_path: None,
        }
    }
}

/// Dotted numeric version token, e.g. `1.7.1` in `jq-1.7.1.tar.gz`.
static VERSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)+").expect("version pattern is valid"));

/// Last dotted numeric token in the file name of `url`.
fn version_in_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);

    VERSION_TOKEN
        .find_iter(file)
        .last()
        .map(|m| m.as_str().to_string())
}

/// Remove later duplicates, keeping the first occurrence of each item.
pub(crate) fn dedup_in_place<T: Clone + Eq + std::hash::Hash>(items: &mut Vec<T>) {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

//! Fixtures for common test scenarios.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::core::entity::{BuildSpec, Entity, ServiceSpec, Strategy, Tier};

/// The base entity: Debian with a compiler toolchain.
pub fn base() -> Entity {
    let mut base = Entity::new(Tier::Base, "base", "12");
    base.image = Some("debian:bookworm".to_string());
    base.packages = vec!["build-essential".to_string(), "ca-certificates".to_string()];
    base
}

/// A prebuilt executable downloaded to `/usr/local/bin/<name>`.
pub fn binary_tool(name: &str, version: &str) -> Entity {
    let mut build = BuildSpec::new(Strategy::BinaryFetch);
    build.url = Some(format!(
        "https://example.com/{name}/releases/download/v{{version}}/{name}-linux-amd64",
        name = name
    ));
    build.binary_path = Some(PathBuf::from(format!("/usr/local/bin/{}", name)));
    build.test_command = Some(format!("{} --version", name));

    Entity::new(Tier::Tool, name, version)
        .with_build(build)
        .with_category("utility")
}

/// A tool compiled from a `.tar.gz` source release.
pub fn source_tool(name: &str, version: &str) -> Entity {
    let mut build = BuildSpec::new(Strategy::Source);
    build.url = Some(format!(
        "https://github.com/example/{name}/releases/download/v{{version}}/{name}-{{version}}.tar.gz",
        name = name
    ));
    build.build_dependencies = vec!["autoconf".to_string(), "libtool".to_string()];
    build.binary_path = Some(PathBuf::from(format!("/usr/local/bin/{}", name)));
    build.test_command = Some(format!("{} --version", name));

    Entity::new(Tier::Tool, name, version)
        .with_build(build)
        .with_category("development")
}

/// An application built from source that needs `tools`.
pub fn application<const N: usize>(name: &str, tools: [&str; N]) -> Entity {
    let mut build = BuildSpec::new(Strategy::Source);
    build.url = Some(format!(
        "https://example.com/{name}/archive/{name}-{{version}}.tar.gz",
        name = name
    ));
    build.binary_path = Some(PathBuf::from(format!("/usr/local/bin/{}", name)));

    Entity::new(Tier::Application, name, "1.0.0")
        .with_build(build)
        .with_required_tools(tools)
}

/// PostgreSQL: a source build followed by the three service phases.
pub fn postgres() -> Entity {
    let data_dir = PathBuf::from("/var/lib/postgresql/data");

    let mut config = BTreeMap::new();
    config.insert("listen_addresses".to_string(), "'*'".to_string());
    config.insert("port".to_string(), "5432".to_string());

    let service = ServiceSpec {
        user: "postgres".to_string(),
        data_dir: data_dir.clone(),
        setup_steps: vec!["mkdir -p /run/postgresql".to_string()],
        init_steps: vec![format!("initdb -D {}", data_dir.display())],
        config_file: Some(data_dir.join("postgresql.conf")),
        config,
    };

    let mut build = BuildSpec::new(Strategy::Specialized);
    build.url = Some(
        "https://ftp.postgresql.org/pub/source/v{version}/postgresql-{version}.tar.bz2".to_string(),
    );
    build.build_dependencies = vec!["libreadline-dev".to_string(), "zlib1g-dev".to_string()];
    build.binary_path = Some(PathBuf::from("/usr/local/bin/postgres"));
    build.service = Some(service);

    Entity::new(Tier::Tool, "postgres", "16.4")
        .with_build(build)
        .with_category("database")
}

/// Replace the build dependencies of `entity`.
pub fn with_deps<const N: usize>(mut entity: Entity, deps: [&str; N]) -> Entity {
    if let Some(build) = entity.build.as_mut() {
        build.build_dependencies = deps.iter().map(|d| d.to_string()).collect();
    }
    entity
}

/// Replace the runtime libraries of `entity`.
pub fn with_libs<const N: usize>(mut entity: Entity, libs: [&str; N]) -> Entity {
    if let Some(build) = entity.build.as_mut() {
        build.runtime_libraries = libs.iter().map(PathBuf::from).collect();
    }
    entity
}

/// A declarations root on disk, removed when dropped.
pub struct DeclarationTree {
    dir: TempDir,
}

impl DeclarationTree {
    /// An empty tree.
    pub fn new() -> Self {
        DeclarationTree {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    /// Base, two tools (curl, jq), and one application (webapp).
    pub fn sample() -> Self {
        let tree = Self::new();
        tree.write("base.yaml", SAMPLE_BASE);
        tree.write("tools/curl.yaml", SAMPLE_CURL);
        tree.write("tools/jq.yaml", SAMPLE_JQ);
        tree.write("apps/webapp.yaml", SAMPLE_WEBAPP);
        tree
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `rel` under the root, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create fixture directory");
        }
        fs::write(&path, contents).expect("failed to write fixture");
        path
    }
}

impl Default for DeclarationTree {
    fn default() -> Self {
        Self::new()
    }
}

pub const SAMPLE_BASE: &str = r#"name: base
version: "12"
image: debian:bookworm
packages:
  - build-essential
  - ca-certificates
"#;

pub const SAMPLE_CURL: &str = r#"name: curl
version: 8.11.1
category: network
build:
  type: binary-fetch
  url: https://example.com/curl/releases/download/v{version}/curl-linux-amd64
  binary_path: /usr/local/bin/curl
  test_command: curl --version
"#;

pub const SAMPLE_JQ: &str = r#"name: jq
version: 1.7.1
category: text
build:
  type: source
  url: https://github.com/jqlang/jq/releases/download/jq-{version}/jq-{version}.tar.gz
  build_dependencies: [autoconf, libtool]
  runtime_libraries: [/usr/lib/x86_64-linux-gnu/libonig.so.5]
  configure_flags: [--disable-docs]
  binary_path: /usr/local/bin/jq
  test_command: jq --version
"#;

pub const SAMPLE_WEBAPP: &str = r#"name: webapp
version: 2.0.0
category: web
required_tools: [curl, jq]
build:
  type: source
  url: https://example.com/webapp/archive/webapp-{version}.tar.gz
  binary_path: /usr/local/bin/webapp
"#;

//! Build strategy resolution.
//!
//! Turns one entity into one [`BuildStage`]. The stage shape is selected by
//! the entity's declared [`Strategy`]; nothing here looks at entity names.
//!
//! - `source`: fetch an archive, extract, custom steps, configure, make,
//!   strip
//! - `binary-fetch`: download a prebuilt executable, chmod, strip
//! - `specialized`: a source or binary build followed by the three service
//!   phases (privileged setup, identity switch, config render)

use std::path::{Path, PathBuf};

use crate::builder::archive::ArchiveFormat;
use crate::builder::context::PlanSettings;
use crate::builder::plan::{BuildStage, Directive, ImageRef, BASE_STAGE};
use crate::core::entity::{BuildSpec, Entity, ServiceSpec, Strategy};
use crate::resolver::errors::ResolveError;

/// Packages any stage that downloads needs.
pub const FETCH_PACKAGES: &[&str] = &["ca-certificates", "curl"];

/// Mode applied to fetched executables.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// Resolves entities into strategy-specific stages.
#[derive(Debug, Clone)]
pub struct StrategyResolver<'a> {
    settings: &'a PlanSettings,
    base: ImageRef,
    skip_packages: bool,
}

impl<'a> StrategyResolver<'a> {
    /// Create a resolver whose stages build on the base stage.
    pub fn new(settings: &'a PlanSettings) -> Self {
        StrategyResolver {
            settings,
            base: ImageRef::Stage(BASE_STAGE.to_string()),
            skip_packages: false,
        }
    }

    /// Build on a different stage instead of `base`.
    pub fn with_base(mut self, base: ImageRef) -> Self {
        self.base = base;
        self
    }

    /// Omit package installation (packages come from a shared stage).
    pub fn without_packages(mut self) -> Self {
        self.skip_packages = true;
        self
    }

    /// Reject entities whose strategy cannot be resolved.
    ///
    /// Called for every entity of a request before any stage is emitted.
    pub fn check_supported(entity: &Entity) -> Result<(), ResolveError> {
        match entity.strategy() {
            Some(Strategy::Unsupported(strategy)) => Err(ResolveError::UnsupportedStrategy {
                tier: entity.tier,
                entity: entity.name.clone(),
                strategy: strategy.clone(),
            }),
            Some(_) => Ok(()),
            None => Err(ResolveError::invalid(
                &entity.name,
                "missing `build` or `specialized` block",
            )),
        }
    }

    /// Resolve one entity into its build stage.
    pub fn resolve(&self, entity: &Entity) -> Result<BuildStage, ResolveError> {
        Self::check_supported(entity)?;
        let build = entity
            .build
            .as_ref()
            .ok_or_else(|| ResolveError::invalid(&entity.name, "missing build block"))?;

        tracing::debug!("resolving {} with strategy {}", entity, build.strategy);

        let mut stage =
            BuildStage::new(&entity.name, self.base.clone()).for_entity(entity.tier, &entity.name);

        match &build.strategy {
            Strategy::Source => self.source(entity, build, &mut stage)?,
            Strategy::BinaryFetch => self.binary_fetch(entity, build, &mut stage)?,
            Strategy::Specialized => self.specialized(entity, build, &mut stage)?,
            Strategy::Unsupported(strategy) => {
                return Err(ResolveError::UnsupportedStrategy {
                    tier: entity.tier,
                    entity: entity.name.clone(),
                    strategy: strategy.clone(),
                })
            }
        }

        Ok(stage)
    }

    fn source(
        &self,
        entity: &Entity,
        build: &BuildSpec,
        stage: &mut BuildStage,
    ) -> Result<(), ResolveError> {
        let url = rendered_url(entity, build)?;
        let format = ArchiveFormat::from_url(&url).ok_or_else(|| {
            ResolveError::invalid(
                &entity.name,
                format!("unrecognized archive extension in `{}`", url),
            )
        })?;

        let mut packages = build.build_dependencies.clone();
        let tools = FETCH_PACKAGES.iter().copied().chain(format.required_package());
        for pkg in tools {
            if !packages.iter().any(|p| p == pkg) {
                packages.push(pkg.to_string());
            }
        }
        self.install(stage, packages);

        let src_dir = self.settings.source_dir(&entity.name);
        let archive = self
            .settings
            .work_dir
            .join(format!("{}-{}{}", entity.name, entity.version, format.extension()));

        stage.push(Directive::CreateDir {
            path: src_dir.clone(),
            owner: None,
        });
        stage.push(Directive::Fetch {
            url,
            version: build.fetched_version(&entity.version),
            dest: archive.clone(),
        });
        stage.push(Directive::Extract {
            archive,
            format,
            dest: src_dir.clone(),
        });
        stage.push(Directive::Workdir { path: src_dir });
        stage.extend(build.custom_steps.iter().map(Directive::run));
        stage.push(Directive::Configure {
            prefix: self.settings.prefix.clone(),
            flags: build.configure_flags.clone(),
        });
        stage.push(Directive::CompileInstall {
            jobs: self.settings.jobs_arg(),
        });

        if let Some(path) = &build.binary_path {
            stage.push(Directive::Strip {
                paths: vec![path.clone()],
            });
        }
        push_smoke_test(stage, build);

        Ok(())
    }

    fn binary_fetch(
        &self,
        entity: &Entity,
        build: &BuildSpec,
        stage: &mut BuildStage,
    ) -> Result<(), ResolveError> {
        let url = rendered_url(entity, build)?;
        let dest = build
            .binary_path
            .clone()
            .unwrap_or_else(|| self.settings.prefix.join("bin").join(&entity.name));

        self.install(stage, FETCH_PACKAGES.iter().map(|p| p.to_string()).collect());
        stage.push(Directive::Fetch {
            url,
            version: build.fetched_version(&entity.version),
            dest: dest.clone(),
        });
        stage.push(Directive::Chmod {
            path: dest.clone(),
            mode: EXECUTABLE_MODE,
        });
        stage.push(Directive::Strip { paths: vec![dest] });
        push_smoke_test(stage, build);

        Ok(())
    }

    fn specialized(
        &self,
        entity: &Entity,
        build: &BuildSpec,
        stage: &mut BuildStage,
    ) -> Result<(), ResolveError> {
        let service = build.service.as_ref().ok_or_else(|| {
            ResolveError::invalid(&entity.name, "specialized strategy requires a `service` block")
        })?;

        let mut artifact = Vec::new();
        if build.url.is_some() {
            let mut scratch = BuildStage::new(&stage.name, stage.base.clone());
            self.source(entity, build, &mut scratch)?;
            artifact = scratch.directives;
        } else {
            self.install(stage, build.build_dependencies.clone());
        }

        let phases = ServicePhases::new(service, artifact);
        stage.extend(phases.into_directives());
        Ok(())
    }

    fn install(&self, stage: &mut BuildStage, packages: Vec<String>) {
        if self.skip_packages || packages.is_empty() {
            return;
        }
        stage.push(Directive::InstallPackages { packages });
    }
}

/// The three phases of a specialized stage, kept apart so privilege changes
/// happen at exactly two points.
#[derive(Debug, Clone)]
pub struct ServicePhases {
    /// Runs as root: artifact build, account and directory creation
    pub setup: Vec<Directive>,
    /// Account the init phase runs as
    pub user: String,
    /// Runs as `user`
    pub init: Vec<Directive>,
    /// Runs as root again: config files
    pub render: Vec<Directive>,
}

impl ServicePhases {
    /// Lay out the phases for `service`, with `artifact` directives (if any)
    /// at the start of the privileged phase.
    pub fn new(service: &ServiceSpec, artifact: Vec<Directive>) -> Self {
        let mut setup = artifact;
        setup.push(Directive::CreateUser {
            name: service.user.clone(),
        });
        setup.push(Directive::CreateDir {
            path: service.data_dir.clone(),
            owner: Some(service.user.clone()),
        });
        setup.extend(service.setup_steps.iter().map(Directive::run));

        let init = service.init_steps.iter().map(Directive::run).collect();

        let render = service
            .config_file
            .iter()
            .map(|path| Directive::RenderConfig {
                path: path.clone(),
                entries: service.config.clone(),
                owner: Some(service.user.clone()),
            })
            .collect();

        ServicePhases {
            setup,
            user: service.user.clone(),
            init,
            render,
        }
    }

    /// Flatten into directives: setup, `USER <service>`, init, `USER root`,
    /// render.
    pub fn into_directives(self) -> Vec<Directive> {
        let mut out = Vec::with_capacity(self.setup.len() + self.init.len() + self.render.len() + 4);
        out.push(Directive::comment("phase 1: privileged setup"));
        out.extend(self.setup);
        out.push(Directive::comment("phase 2: initialize as service account"));
        out.push(Directive::User { name: self.user });
        out.extend(self.init);
        out.push(Directive::comment("phase 3: render configuration"));
        out.push(Directive::User {
            name: "root".to_string(),
        });
        out.extend(self.render);
        out
    }
}

/// Paths a specialized entity contributes to the runtime image besides its
/// main artifact.
pub fn service_paths(service: &ServiceSpec) -> Vec<PathBuf> {
    let mut paths = vec![service.data_dir.clone()];
    if let Some(config) = &service.config_file {
        if !is_under(config, &service.data_dir) {
            paths.push(config.clone());
        }
    }
    paths
}

fn rendered_url(entity: &Entity, build: &BuildSpec) -> Result<String, ResolveError> {
    let url = build
        .render_url(&entity.version)
        .ok_or_else(|| ResolveError::invalid(&entity.name, "missing `url`"))?;

    url::Url::parse(&url).map_err(|e| {
        ResolveError::invalid(&entity.name, format!("invalid url `{}`: {}", url, e))
    })?;

    Ok(url)
}

fn push_smoke_test(stage: &mut BuildStage, build: &BuildSpec) {
    if let Some(cmd) = &build.test_command {
        stage.push(Directive::Verify {
            command: cmd.clone(),
        });
    }
}

/// True if `path` is inside `dir`.
pub(crate) fn is_under(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

//! Dockerfile rendering.
//!
//! Rendering is a pure function of the plan: the same plan always produces
//! byte-identical text.

use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::Path;

use crate::builder::plan::{BuildPlan, BuildStage, Directive};

const APT_INSTALL: &str = "apt-get update && apt-get install -y --no-install-recommends";
const APT_CLEAN: &str = "rm -rf /var/lib/apt/lists/*";

/// Render a plan as a multi-stage Dockerfile.
pub fn render_dockerfile(plan: &BuildPlan) -> String {
    let mut out = String::new();
    out.push_str("# syntax=docker/dockerfile:1\n");
    let _ = writeln!(out, "# image: {}", plan.image_name);

    for stage in plan.all_stages() {
        out.push('\n');
        render_stage(&mut out, stage);
    }

    out
}

fn render_stage(out: &mut String, stage: &BuildStage) {
    let _ = writeln!(out, "FROM {} AS {}", stage.base, stage.name);

    // Header whenever the group changes from the previous line
    let mut last_group: Option<&str> = None;
    for artifact in &stage.copied_artifacts {
        let group = artifact.group.as_deref();
        if let Some(label) = group.filter(|g| Some(*g) != last_group) {
            let _ = writeln!(out, "# {}", label);
        }
        last_group = group;
        let _ = writeln!(
            out,
            "COPY --from={} {} {}",
            artifact.from_stage,
            artifact.source.display(),
            artifact.dest.display()
        );
    }

    for directive in &stage.directives {
        out.push_str(&render_directive(directive));
        out.push('\n');
    }
}

/// Render one directive as a single Dockerfile instruction.
pub fn render_directive(directive: &Directive) -> String {
    match directive {
        Directive::InstallPackages { packages } => {
            format!("RUN {} {} && {}", APT_INSTALL, packages.join(" "), APT_CLEAN)
        }
        Directive::Fetch { url, dest, .. } => {
            format!("RUN curl -fsSL -o {} {}", path_word(dest), shell_word(url))
        }
        Directive::Extract {
            archive,
            format,
            dest,
        } => format!("RUN {}", format.extract_command(archive, dest)),
        Directive::Workdir { path } => format!("WORKDIR {}", path.display()),
        Directive::Run { command } => format!("RUN {}", command),
        Directive::Configure { prefix, flags } => {
            let mut cmd = format!("RUN ./configure --prefix={}", path_word(prefix));
            for flag in flags {
                cmd.push(' ');
                cmd.push_str(&shell_word(flag));
            }
            cmd
        }
        Directive::CompileInstall { jobs } => {
            format!("RUN make -j{} && make install", jobs)
        }
        Directive::Strip { paths } => format!(
            "RUN strip --strip-unneeded {} || true",
            join_paths(paths.iter().map(|p| p.as_path()))
        ),
        Directive::Chmod { path, mode } => format!("RUN chmod {:o} {}", mode, path_word(path)),
        Directive::CreateUser { name } => format!(
            "RUN id -u {name} >/dev/null 2>&1 || useradd --system --user-group --no-create-home --shell /usr/sbin/nologin {name}",
            name = name
        ),
        Directive::CreateDir { path, owner } => match owner {
            Some(owner) => format!(
                "RUN mkdir -p {path} && chown {owner}:{owner} {path}",
                path = path_word(path),
                owner = owner
            ),
            None => format!("RUN mkdir -p {}", path_word(path)),
        },
        Directive::User { name } => format!("USER {}", name),
        Directive::RenderConfig {
            path,
            entries,
            owner,
        } => {
            let lines: Vec<String> = entries
                .iter()
                .map(|(k, v)| shell_quote(&format!("{} = {}", k, v)))
                .collect();
            let parent = path.parent().unwrap_or(Path::new("/"));
            let mut cmd = format!(
                "RUN mkdir -p {} && printf '%s\\n' {} > {}",
                path_word(parent),
                lines.join(" "),
                path_word(path)
            );
            if let Some(owner) = owner {
                let _ = write!(cmd, " && chown {o}:{o} {}", path_word(path), o = owner);
            }
            cmd
        }
        Directive::Verify { command } => format!("RUN {}", command),
        Directive::Comment { text } => format!("# {}", text),
    }
}

fn join_paths<'a>(paths: impl Iterator<Item = &'a Path>) -> String {
    paths.map(|p| path_word(p).into_owned()).collect::<Vec<_>>().join(" ")
}

/// Single-quote a string for POSIX sh.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// `s` as one shell word, quoted only if it contains anything outside
/// `[A-Za-z0-9_@%+=:,./-]`.
pub(crate) fn shell_word(s: &str) -> Cow<'_, str> {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if plain {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(shell_quote(s))
    }
}

pub(crate) fn path_word(path: &Path) -> Cow<'_, str> {
    match path.to_string_lossy() {
        Cow::Borrowed(s) => shell_word(s),
        Cow::Owned(s) => Cow::Owned(shell_word(&s).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use crate::builder::plan::{CopiedArtifact, ImageRef, BASE_STAGE, FINAL_STAGE};

    fn plan() -> BuildPlan {
        let mut base = BuildStage::new(BASE_STAGE, ImageRef::External("debian:bookworm".into()));
        base.push(Directive::InstallPackages {
            packages: vec!["build-essential".into()],
        });

        let mut curl = BuildStage::new("curl", ImageRef::Stage(BASE_STAGE.into()));
        curl.push(Directive::Fetch {
            url: "https://example.com/curl-8.11.1".into(),
            version: Some("8.11.1".into()),
            dest: "/usr/local/bin/curl".into(),
        });
        curl.push(Directive::Chmod {
            path: "/usr/local/bin/curl".into(),
            mode: 0o755,
        });

        let mut fin = BuildStage::new(FINAL_STAGE, ImageRef::External("debian:bookworm-slim".into()));
        fin.copy(CopiedArtifact::same_path("/usr/local/bin/curl", "curl").in_group("curl"));
        fin.copy(CopiedArtifact::same_path("/usr/lib/libz.so.1", "curl").in_group("curl"));

        BuildPlan::new("curl", vec![base, curl], fin).unwrap()
    }

    #[test]
    fn test_render_stage_headers_and_copies() {
        let text = render_dockerfile(&plan());

        assert!(text.contains("FROM debian:bookworm AS base\n"));
        assert!(text.contains("FROM base AS curl\n"));
        assert!(text.contains("FROM debian:bookworm-slim AS final\n"));
        assert!(text.contains("RUN curl -fsSL -o /usr/local/bin/curl https://example.com/curl-8.11.1\n"));
        assert!(text.contains("RUN chmod 755 /usr/local/bin/curl\n"));
        assert!(text.contains("COPY --from=curl /usr/local/bin/curl /usr/local/bin/curl\n"));
        assert_eq!(text.matches("# curl\n").count(), 1);
    }

    #[test]
    fn test_render_is_deterministic() {
        assert_eq!(render_dockerfile(&plan()), render_dockerfile(&plan()));
        assert_eq!(plan().fingerprint(), plan().fingerprint());
    }

    #[test]
    fn test_render_config_sorted_and_quoted() {
        let mut entries = BTreeMap::new();
        entries.insert("port".to_string(), "5432".to_string());
        entries.insert("listen_addresses".to_string(), "'*'".to_string());

        let line = render_directive(&Directive::RenderConfig {
            path: PathBuf::from("/etc/pg/postgresql.conf"),
            entries,
            owner: Some("postgres".to_string()),
        });

        assert_eq!(
            line,
            r#"RUN mkdir -p /etc/pg && printf '%s\n' 'listen_addresses = '\''*'\''' 'port = 5432' > /etc/pg/postgresql.conf && chown postgres:postgres /etc/pg/postgresql.conf"#
        );
    }

    #[test]
    fn test_render_quotes_shell_metacharacters() {
        let fetch = render_directive(&Directive::Fetch {
            url: "https://example.com/dl?v=1.2.3&arch=amd64".into(),
            version: Some("1.2.3".into()),
            dest: "/opt/my tool/bin/tool".into(),
        });
        assert_eq!(
            fetch,
            "RUN curl -fsSL -o '/opt/my tool/bin/tool' 'https://example.com/dl?v=1.2.3&arch=amd64'"
        );

        let configure = render_directive(&Directive::Configure {
            prefix: "/usr/local".into(),
            flags: vec!["--disable-docs".into(), "CFLAGS=-O2 -g".into()],
        });
        assert_eq!(
            configure,
            "RUN ./configure --prefix=/usr/local --disable-docs 'CFLAGS=-O2 -g'"
        );

        assert_eq!(
            render_directive(&Directive::Strip {
                paths: vec!["/usr/local/bin/jq".into(), "/opt/a b/lib.so".into()],
            }),
            "RUN strip --strip-unneeded /usr/local/bin/jq '/opt/a b/lib.so' || true"
        );
        assert_eq!(
            render_directive(&Directive::Chmod {
                path: "/opt/it's/tool".into(),
                mode: 0o755,
            }),
            r"RUN chmod 755 '/opt/it'\''s/tool'"
        );
    }

    #[test]
    fn test_group_header_repeats_after_interleaving() {
        let base = BuildStage::new(BASE_STAGE, ImageRef::External("debian:bookworm".into()));
        let curl = BuildStage::new("curl", ImageRef::Stage(BASE_STAGE.into()));
        let mut fin = BuildStage::new(FINAL_STAGE, ImageRef::External("debian:bookworm-slim".into()));
        fin.copy(CopiedArtifact::same_path("/usr/local/bin/curl", "curl").in_group("curl"));
        fin.copy(CopiedArtifact::same_path("/etc/motd", "curl"));
        fin.copy(CopiedArtifact::same_path("/usr/lib/libz.so.1", "curl").in_group("curl"));

        let text = render_dockerfile(&BuildPlan::new("curl", vec![base, curl], fin).unwrap());
        assert_eq!(text.matches("# curl\n").count(), 2);
    }

    #[test]
    fn test_render_user_and_dirs() {
        assert_eq!(
            render_directive(&Directive::User {
                name: "postgres".into()
            }),
            "USER postgres"
        );
        assert_eq!(
            render_directive(&Directive::CreateDir {
                path: "/var/lib/postgresql/data".into(),
                owner: Some("postgres".into()),
            }),
            "RUN mkdir -p /var/lib/postgresql/data && chown postgres:postgres /var/lib/postgresql/data"
        );
    }
}

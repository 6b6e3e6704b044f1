//! Archive formats and the extension lookup table.
//!
//! Source archives are recognized by file extension. Adding a format means
//! adding a row to [`ARCHIVE_FORMATS`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::builder::render::path_word;

/// Compression/container format of a fetched source archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Gzip,
    Bzip2,
    Xz,
    Zip,
}

/// One row of the extension table.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveRule {
    /// File name suffix, matched case-insensitively
    pub extension: &'static str,
    pub format: ArchiveFormat,
}

/// Extension → format. Longer suffixes come first.
pub const ARCHIVE_FORMATS: &[ArchiveRule] = &[
    ArchiveRule { extension: ".tar.gz", format: ArchiveFormat::Gzip },
    ArchiveRule { extension: ".tar.bz2", format: ArchiveFormat::Bzip2 },
    ArchiveRule { extension: ".tar.xz", format: ArchiveFormat::Xz },
    ArchiveRule { extension: ".tgz", format: ArchiveFormat::Gzip },
    ArchiveRule { extension: ".tbz2", format: ArchiveFormat::Bzip2 },
    ArchiveRule { extension: ".txz", format: ArchiveFormat::Xz },
    ArchiveRule { extension: ".zip", format: ArchiveFormat::Zip },
];

impl ArchiveFormat {
    /// Detect the format from a URL or file name.
    ///
    /// Query strings and fragments are ignored.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .to_ascii_lowercase();

        ARCHIVE_FORMATS
            .iter()
            .find(|rule| path.ends_with(rule.extension))
            .map(|rule| rule.format)
    }

    /// Canonical file extension used for the downloaded archive.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Gzip => ".tar.gz",
            ArchiveFormat::Bzip2 => ".tar.bz2",
            ArchiveFormat::Xz => ".tar.xz",
            ArchiveFormat::Zip => ".zip",
        }
    }

    /// OS package providing the decompressor, if the builder image lacks it.
    pub fn required_package(&self) -> Option<&'static str> {
        match self {
            ArchiveFormat::Gzip => None,
            ArchiveFormat::Bzip2 => Some("bzip2"),
            ArchiveFormat::Xz => Some("xz-utils"),
            ArchiveFormat::Zip => Some("unzip"),
        }
    }

    /// Shell command unpacking `archive` into `dest`.
    ///
    /// Every format drops a single top-level directory so the source tree
    /// lands directly in `dest`. Zip files have no strip option, so they are
    /// unpacked into a staging directory first; a flat zip is copied as is.
    pub fn extract_command(&self, archive: &Path, dest: &Path) -> String {
        let flag = match self {
            ArchiveFormat::Gzip => "z",
            ArchiveFormat::Bzip2 => "j",
            ArchiveFormat::Xz => "J",
            ArchiveFormat::Zip => return unzip_command(archive, dest),
        };
        format!(
            "tar -x{}f {} -C {} --strip-components=1",
            flag,
            path_word(archive),
            path_word(dest)
        )
    }
}

fn unzip_command(archive: &Path, dest: &Path) -> String {
    let mut staging_dir = dest.as_os_str().to_owned();
    staging_dir.push(".unzip");
    let staging_dir = PathBuf::from(staging_dir);
    let staging = path_word(&staging_dir);

    format!(
        "unzip -q {archive} -d {staging} && set -- {staging}/* && \
if [ $# -eq 1 ] && [ -d \"$1\" ]; then top=\"$1\"; else top={staging}; fi && \
cp -a \"$top\"/. {dest}/ && rm -rf {staging}",
        archive = path_word(archive),
        staging = staging,
        dest = path_word(dest),
    )
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveFormat::Gzip => "gzip",
            ArchiveFormat::Bzip2 => "bzip2",
            ArchiveFormat::Xz => "xz",
            ArchiveFormat::Zip => "zip",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_formats() {
        let cases = [
            ("https://x.org/jq-1.7.1.tar.gz", Some(ArchiveFormat::Gzip)),
            ("https://x.org/pg-16.4.tar.bz2", Some(ArchiveFormat::Bzip2)),
            ("https://x.org/git-2.47.1.tar.xz", Some(ArchiveFormat::Xz)),
            ("https://x.org/node.TGZ", Some(ArchiveFormat::Gzip)),
            ("https://x.org/tool.zip?raw=1", Some(ArchiveFormat::Zip)),
            ("https://x.org/curl-8.11.1", None),
        ];

        for (url, expected) in cases {
            assert_eq!(ArchiveFormat::from_url(url), expected, "{}", url);
        }
    }

    #[test]
    fn test_extract_command_matches_format() {
        let cmd = ArchiveFormat::Bzip2.extract_command(
            Path::new("/tmp/build/pg.tar.bz2"),
            Path::new("/tmp/build/pg"),
        );
        assert_eq!(
            cmd,
            "tar -xjf /tmp/build/pg.tar.bz2 -C /tmp/build/pg --strip-components=1"
        );
        assert_eq!(ArchiveFormat::Bzip2.required_package(), Some("bzip2"));
        assert_eq!(ArchiveFormat::Gzip.required_package(), None);
    }

    #[test]
    fn test_zip_extract_strips_single_top_level_dir() {
        let cmd = ArchiveFormat::Zip.extract_command(
            Path::new("/tmp/build/tool-1.0.zip"),
            Path::new("/tmp/build/tool"),
        );
        assert!(cmd.starts_with("unzip -q /tmp/build/tool-1.0.zip -d /tmp/build/tool.unzip && "));
        assert!(cmd.contains("set -- /tmp/build/tool.unzip/*"));
        assert!(cmd.contains(r#"if [ $# -eq 1 ] && [ -d "$1" ]; then top="$1"; else top=/tmp/build/tool.unzip; fi"#));
        assert!(cmd.contains(r#"cp -a "$top"/. /tmp/build/tool/"#));
        assert!(cmd.ends_with("rm -rf /tmp/build/tool.unzip"));
        assert_eq!(ArchiveFormat::Zip.required_package(), Some("unzip"));
    }

    #[test]
    fn test_extract_command_quotes_paths() {
        let cmd = ArchiveFormat::Gzip.extract_command(
            Path::new("/tmp/my build/x.tar.gz"),
            Path::new("/tmp/my build/x"),
        );
        assert_eq!(
            cmd,
            "tar -xzf '/tmp/my build/x.tar.gz' -C '/tmp/my build/x' --strip-components=1"
        );
    }
}

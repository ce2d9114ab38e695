//! Release artifact filename parsing.
//!
//! Artifacts are named `<name>-<version>-<platform>[-<arch>][-<marker>].<ext>`.
//! Each naming layout is a separate [`FilenameStrategy`]; they are tried in
//! order and the first match wins.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::platform::Platform;

/// Channel names a version pre-release or a trailing marker may carry.
pub const CHANNEL_MARKERS: &[&str] = &["alpha", "beta", "rc", "preview", "dev", "nightly", "stable"];

pub const DEFAULT_CHANNEL: &str = "stable";

const NAME: &str = r"(?P<name>[A-Za-z][A-Za-z0-9_]*(?:-[A-Za-z][A-Za-z0-9_]*)*)";
const VERSION: &str =
    r"(?P<version>\d+\.\d+(?:\.\d+)?(?:-(?:alpha|beta|rc|preview|dev)(?:\.[0-9A-Za-z]+)*)?)";
const PLATFORM: &str = r"(?P<platform>[A-Za-z][A-Za-z0-9]*)";
const ARCH: &str = r"(?P<arch>x64|x86|x86_64|amd64|arm64|aarch64|ia32|universal)";
const MARKER: &str = r"(?P<marker>[A-Za-z][A-Za-z0-9]*)";
const EXT: &str = r"\.(?P<ext>zip|tar\.gz|tgz)";

/// Everything a filename says about a release artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifact {
    pub name: String,
    pub version: String,
    pub platform: Platform,
    pub arch: Option<String>,
    pub channel: String,
    pub extension: String,
}

impl ParsedArtifact {
    /// `<name>-<version>-<platform>`, the installed version id.
    pub fn id(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.platform)
    }
}

/// One naming layout.
#[derive(Debug)]
pub struct FilenameStrategy {
    label: &'static str,
    pattern: Regex,
}

impl FilenameStrategy {
    #[allow(clippy::expect_used)]
    fn new(label: &'static str, pattern: &str) -> Self {
        Self {
            label,
            pattern: Regex::new(&format!("(?i)^{pattern}$")).expect("filename pattern is valid"),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Parse `filename` with this layout only.
    pub fn parse(&self, filename: &str) -> Option<ParsedArtifact> {
        let caps = self.pattern.captures(filename)?;
        let text = |caps: &Captures<'_>, group: &str| caps.name(group).map(|m| m.as_str().to_string());

        let platform = Platform::from_token(caps.name("platform")?.as_str())?;
        let version = text(&caps, "version")?;
        let marker = text(&caps, "marker").map(|m| m.to_ascii_lowercase());

        let channel = marker
            .filter(|m| CHANNEL_MARKERS.contains(&m.as_str()))
            .or_else(|| channel_from_version(&version))
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());

        Some(ParsedArtifact {
            name: text(&caps, "name")?,
            version,
            platform,
            arch: text(&caps, "arch").map(|a| a.to_ascii_lowercase()),
            channel,
            extension: text(&caps, "ext")?.to_ascii_lowercase(),
        })
    }
}

/// The ordered strategy list.
pub fn strategies() -> &'static [FilenameStrategy] {
    static STRATEGIES: OnceLock<Vec<FilenameStrategy>> = OnceLock::new();
    STRATEGIES.get_or_init(|| {
        vec![
            FilenameStrategy::new(
                "name-version-platform-arch-marker",
                &format!("{NAME}-{VERSION}-{PLATFORM}-{ARCH}-{MARKER}{EXT}"),
            ),
            FilenameStrategy::new(
                "name-version-platform-arch",
                &format!("{NAME}-{VERSION}-{PLATFORM}-{ARCH}{EXT}"),
            ),
            FilenameStrategy::new(
                "name-version-platform-marker",
                &format!("{NAME}-{VERSION}-{PLATFORM}(?:-{MARKER})?{EXT}"),
            ),
        ]
    })
}

/// Parse an artifact filename with the first strategy that accepts it.
pub fn parse_artifact_filename(filename: &str) -> Option<ParsedArtifact> {
    strategies().iter().find_map(|s| s.parse(filename))
}

/// Channel implied by a pre-release version such as `1.3.0-beta.1`.
pub fn channel_from_version(version: &str) -> Option<String> {
    let (_, pre) = version.split_once('-')?;
    let ident = pre.split('.').next()?.to_ascii_lowercase();
    CHANNEL_MARKERS
        .contains(&ident.as_str())
        .then_some(ident)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_and_flavour_marker() {
        let parsed = strategies()[0].parse("hagicode-1.2.0-linux-x64-nort.zip").unwrap();
        assert_eq!(parsed.id(), "hagicode-1.2.0-linux");
        assert_eq!(parsed.arch.as_deref(), Some("x64"));
        assert_eq!(parsed.channel, "stable");
    }

    #[test]
    fn arch_only() {
        assert!(strategies()[0].parse("hagicode-1.2.0-win-x64.zip").is_none());
        let parsed = strategies()[1].parse("hagicode-1.2.0-win-x64.zip").unwrap();
        assert_eq!(parsed.platform, Platform::Windows);
        assert_eq!(parsed.extension, "zip");
    }

    #[test]
    fn platform_with_optional_marker() {
        let strategy = &strategies()[2];
        let plain = strategy.parse("hagicode-2.0.0-osx.tar.gz").unwrap();
        assert_eq!(plain.id(), "hagicode-2.0.0-osx");
        assert_eq!(plain.arch, None);

        let nightly = strategy.parse("hagicode-2.0.0-darwin-nightly.tgz").unwrap();
        assert_eq!(nightly.platform, Platform::Osx);
        assert_eq!(nightly.channel, "nightly");
        assert_eq!(nightly.extension, "tgz");
    }

    #[test]
    fn prerelease_version_sets_channel() {
        let parsed = parse_artifact_filename("hagicode-1.3.0-beta.1-linux-x64.zip").unwrap();
        assert_eq!(parsed.version, "1.3.0-beta.1");
        assert_eq!(parsed.channel, "beta");
        assert_eq!(parsed.id(), "hagicode-1.3.0-beta.1-linux");
    }

    #[test]
    fn marker_channel_beats_version() {
        let parsed = parse_artifact_filename("hagicode-1.3.0-beta.1-linux-x64-rc.zip").unwrap();
        assert_eq!(parsed.channel, "rc");
    }

    #[test]
    fn hyphenated_product_names() {
        let parsed = parse_artifact_filename("hagicode-server-1.2.0-linux-arm64.zip").unwrap();
        assert_eq!(parsed.name, "hagicode-server");
        assert_eq!(parsed.arch.as_deref(), Some("arm64"));
    }

    #[test]
    fn rejects_unrecognized_names() {
        assert!(parse_artifact_filename("hagicode-1.2.0-linux-x64.exe").is_none());
        assert!(parse_artifact_filename("hagicode-1.2.0-freebsd.zip").is_none());
        assert!(parse_artifact_filename("README.md").is_none());
        assert!(parse_artifact_filename("hagicode-linux.zip").is_none());
    }
}

use std::env::consts::{ARCH, OS};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical platform identifiers used for release artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    Osx,
}

impl Platform {
    /// Platform of the running host, if it is one releases are published for.
    pub fn current() -> Option<Self> {
        match OS {
            "linux" => Some(Self::Linux),
            "windows" => Some(Self::Windows),
            "macos" => Some(Self::Osx),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Osx => "osx",
        }
    }

    /// Map a filename token onto a canonical platform.
    ///
    /// Exact tokens are tried first, then substring heuristics. `darwin` and
    /// `mac` are checked before `win` because "darwin" contains "win".
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.to_ascii_lowercase();
        match token.as_str() {
            "linux" => return Some(Self::Linux),
            "windows" | "win" | "win32" | "win64" => return Some(Self::Windows),
            "osx" | "macos" => return Some(Self::Osx),
            _ => {}
        }

        if ["ubuntu", "debian", "linux"]
            .iter()
            .any(|hint| token.contains(hint))
        {
            Some(Self::Linux)
        } else if token.contains("darwin") || token.contains("mac") {
            Some(Self::Osx)
        } else if token.contains("win") {
            Some(Self::Windows)
        } else {
            None
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Architecture token of the running host as used in artifact names.
pub fn host_arch_token() -> Option<&'static str> {
    match ARCH {
        "x86_64" => Some("x64"),
        "aarch64" => Some("arm64"),
        "x86" => Some("x86"),
        _ => None,
    }
}

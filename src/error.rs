//! Launcher error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Launcher error that can be serialized for the presentation layer.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Version is not installed
    VersionNotFound,
    /// Version is not offered by the active package source
    VersionNotAvailable,
    /// Version is the active version
    VersionActive,
    /// Another operation is in flight for the same version
    VersionBusy,
    /// No version is active
    NoActiveVersion,
    /// Active version has no resolvable entry point
    NoEntryPoint,
    /// Service process is running from this version
    VersionRunning,
    /// Service process is not running
    ProcessNotRunning,
    /// Configuration error
    Config,
    /// Package source config is invalid or incomplete
    InvalidSourceConfig,
    /// No package source is active
    NoActiveSource,
    /// Release manifest is missing
    ManifestMissing,
    /// Release manifest could not be parsed
    ManifestInvalid,
    /// File system error
    Io,
    /// Network error
    Network,
    /// GitHub API error
    GitHub,
    /// Dependency check or install error
    Dependency,
    /// Process error
    Process,
    /// Port is occupied
    PortOccupied,
    /// Service startup timed out
    StartupTimeout,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::VersionNotFound => 1001,
            Self::VersionNotAvailable => 1002,
            Self::VersionActive => 1003,
            Self::VersionBusy => 1004,
            Self::NoActiveVersion => 1005,
            Self::NoEntryPoint => 1006,
            Self::ProcessNotRunning => 1007,
            Self::VersionRunning => 1008,
            Self::Config => 2001,
            Self::InvalidSourceConfig => 2002,
            Self::NoActiveSource => 2003,
            Self::ManifestMissing => 2004,
            Self::ManifestInvalid => 2005,
            Self::Io => 3001,
            Self::Network => 3002,
            Self::GitHub => 3003,
            Self::Dependency => 4001,
            Self::Process => 5001,
            Self::PortOccupied => 5002,
            Self::StartupTimeout => 5003,
            Self::Other => 9999,
        }
    }

    /// Whether this error is a state conflict rather than a fault.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            Self::VersionNotFound
                | Self::VersionNotAvailable
                | Self::VersionActive
                | Self::VersionBusy
                | Self::NoActiveVersion
                | Self::VersionRunning
                | Self::ProcessNotRunning
        )
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    fn with_id(kind: ErrorKind, id: &str) -> Self {
        Self::new(kind, HashMap::from([("id".to_string(), id.to_string())]))
    }

    pub fn version_not_found(id: &str) -> Self {
        Self::with_id(ErrorKind::VersionNotFound, id)
    }

    pub fn version_not_available(id: &str) -> Self {
        Self::with_id(ErrorKind::VersionNotAvailable, id)
    }

    pub fn version_active(id: &str) -> Self {
        Self::with_id(ErrorKind::VersionActive, id)
    }

    pub fn version_busy(id: &str, operation: &str) -> Self {
        Self::new(
            ErrorKind::VersionBusy,
            HashMap::from([
                ("id".to_string(), id.to_string()),
                ("operation".to_string(), operation.to_string()),
            ]),
        )
    }

    pub fn no_active_version() -> Self {
        Self::new(ErrorKind::NoActiveVersion, HashMap::new())
    }

    pub fn no_entry_point(id: &str) -> Self {
        Self::with_id(ErrorKind::NoEntryPoint, id)
    }

    pub fn version_running(id: &str) -> Self {
        Self::with_id(ErrorKind::VersionRunning, id)
    }

    pub fn process_not_running() -> Self {
        Self::new(ErrorKind::ProcessNotRunning, HashMap::new())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn invalid_source_config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::InvalidSourceConfig, message)
    }

    pub fn no_active_source() -> Self {
        Self::new(ErrorKind::NoActiveSource, HashMap::new())
    }

    pub fn manifest_missing(path: &str) -> Self {
        Self::new(
            ErrorKind::ManifestMissing,
            HashMap::from([("path".to_string(), path.to_string())]),
        )
    }

    pub fn manifest_invalid(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::ManifestInvalid, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn github(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::GitHub, message)
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Dependency, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn port_occupied(port: u16) -> Self {
        Self::new(
            ErrorKind::PortOccupied,
            HashMap::from([("port".to_string(), port.to_string())]),
        )
    }

    pub fn startup_timeout(secs: u64) -> Self {
        Self::new(
            ErrorKind::StartupTimeout,
            HashMap::from([("timeout_secs".to_string(), secs.to_string())]),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    /// Attach an extra payload entry, keeping an existing value for the same key.
    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        self.payload
            .entry(key.to_string())
            .or_insert_with(|| value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn payload(&self) -> &HashMap<String, String> {
        &self.payload
    }

    pub fn detail(&self) -> Option<&str> {
        self.payload.get("detail").map(String::as_str)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 3)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::io(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_code_and_payload() {
        let err = AppError::version_active("hagicode-1.2.0-linux");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], 1003);
        assert_eq!(json["kind"], "version_active");
        assert_eq!(json["payload"]["id"], "hagicode-1.2.0-linux");
    }

    #[test]
    fn context_does_not_override_existing_keys() {
        let err = AppError::version_not_found("a")
            .with_context("id", "b")
            .with_context("version", "1.0.0");
        assert_eq!(err.payload()["id"], "a");
        assert_eq!(err.payload()["version"], "1.0.0");
    }

    #[test]
    fn state_conflicts_are_classified() {
        assert!(ErrorKind::NoActiveVersion.is_state_conflict());
        assert!(ErrorKind::VersionActive.is_state_conflict());
        assert!(!ErrorKind::Network.is_state_conflict());
    }
}

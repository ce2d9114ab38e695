//! Core of the Hagicode desktop launcher: package sources, installed versions,
//! runtime dependencies and the supervised service process.
//!
//! [`Launcher`] is the entry point for a presentation layer. Logging goes through
//! the `log` facade; the embedding application installs the backend.

pub mod archive;
pub mod config;
pub mod deps;
pub mod download;
pub mod error;
pub mod launcher;
pub mod manifest;
pub mod paths;
pub mod platform;
pub mod process;
pub mod source;
pub mod validation;
pub mod version;

pub use error::{AppError, ErrorKind, Result};
pub use launcher::Launcher;
pub use platform::Platform;

//! Shared error type for the runtime kernel and its collaborators.
//!
//! This module provides a single structured error type, following the
//! kind + message + source builder pattern used throughout the workspace:
//!
//! - Strongly-typed error kinds for different failure categories
//! - Builder pattern for ergonomic error construction
//! - Type-safe error source tracking with boxed trait objects

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// Type alias for boxed errors that are Send + Sync.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Result type alias used across the runtime kernel crates.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error kind enumeration for categorizing runtime kernel errors.
///
/// This mirrors the error taxonomy of the original controller design: most
/// variants here are internal failure categories shared by every component
/// (C1-C8). HTTP-facing kinds (`NetworkVersion`, `Bandwidth`, ...) live in
/// `vaultkeep-server::error` since they only make sense at the request
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Configuration-related errors.
    Config,
    /// The model has shut down; blocking waits unwind with this kind.
    Shutdown,
    /// A listener could not bind because the port is already in use.
    PortInUse,
    /// File system operation errors (run-marker file, temp dir, crash log).
    FileSystem,
    /// External collaborator errors (storage engine, session store).
    External,
    /// Catch-all for anything else; mapped to 500 at the HTTP boundary.
    Internal,
}

impl ErrorKind {
    /// Returns the error kind as a string for categorization.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Shutdown => "shutdown",
            Self::PortInUse => "port_in_use",
            Self::FileSystem => "file_system",
            Self::External => "external",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime kernel error with structured information.
#[derive(Debug, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
    #[source]
    source: Option<BoxedError>,
}

impl Error {
    #[inline]
    fn new(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches a source error to this error, enabling error chain tracking.
    #[inline]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Creates a new configuration error.
    #[inline]
    pub fn config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Creates the error raised when a blocking wait unwinds because the
    /// model has already shut down.
    #[inline]
    pub fn shutdown(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Shutdown, message)
    }

    /// Creates the error raised when a listener bind fails because the
    /// configured port is already in use.
    #[inline]
    pub fn port_in_use(port: u16) -> Self {
        Self::new(ErrorKind::PortInUse, format!("already bound to port {port}"))
    }

    /// Creates a new file system error.
    #[inline]
    pub fn file_system(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::FileSystem, message)
    }

    /// Creates a new external collaborator error.
    #[inline]
    pub fn external(
        collaborator: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        let collaborator = collaborator.into();
        let msg = message.into();
        Self::new(ErrorKind::External, format!("{collaborator}: {msg}"))
    }

    /// Creates a new internal error.
    #[inline]
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_creation() {
        let error = Error::config("invalid configuration");
        assert_eq!(error.kind(), ErrorKind::Config);
        assert_eq!(error.message(), "invalid configuration");
    }

    #[test]
    fn error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::file_system("cannot read run-marker file").with_source(source);

        assert!(StdError::source(&error).is_some());
        assert_eq!(error.kind(), ErrorKind::FileSystem);
    }

    #[test]
    fn port_in_use_message() {
        let error = Error::port_in_use(45865);
        assert_eq!(error.kind(), ErrorKind::PortInUse);
        assert!(error.to_string().contains("45865"));
    }

    #[test]
    fn error_kind_as_str() {
        assert_eq!(ErrorKind::Config.as_str(), "config");
        assert_eq!(ErrorKind::Shutdown.as_str(), "shutdown");
        assert_eq!(ErrorKind::PortInUse.as_str(), "port_in_use");
        assert_eq!(ErrorKind::FileSystem.as_str(), "file_system");
        assert_eq!(ErrorKind::External.as_str(), "external");
        assert_eq!(ErrorKind::Internal.as_str(), "internal");
    }
}

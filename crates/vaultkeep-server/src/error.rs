//! HTTP-facing error taxonomy: one exhaustive mapping from a failure
//! kind to the status code a client observes.
//!
//! Internal component errors ([`vaultkeep_core::Error`]) are a different
//! type from this one, related by [`From`] rather than merged into one
//! enum, because a component failure does not always map to the HTTP
//! status a human would guess.

use std::borrow::Cow;
use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The error type returned by every request-pipeline stage (§4.9).
#[derive(Clone)]
#[must_use = "errors do nothing unless turned into a response"]
pub struct Error {
    kind: ErrorKind,
    message: Option<Cow<'static, str>>,
    traceback: Option<Cow<'static, str>>,
}

impl Error {
    #[inline]
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, message: None, traceback: None }
    }

    #[inline]
    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches a traceback body, used only for [`ErrorKind::Internal`]
    /// (§7: "anything else => 500 with traceback body").
    #[inline]
    pub fn with_traceback(mut self, traceback: impl Into<Cow<'static, str>>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("status", &self.kind.status_code())
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.kind.status_code())?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Body written for every pipeline failure. `traceback` is only populated
/// for [`ErrorKind::Internal`] — the table in §7 calls this out as the one
/// kind that leaks implementation detail to the client.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    traceback: Option<Cow<'static, str>>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.kind.status_code();
        let message = self.message.unwrap_or_else(|| Cow::Borrowed(self.kind.default_message()));
        let body = ErrorBody { error: self.kind.as_str(), message, traceback: self.traceback };
        (status, Json(body)).into_response()
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Maps a component-level failure (§7: "anything else") onto a 500 with a
/// traceback body, the fallback row of the status table.
impl From<vaultkeep_core::Error> for Error {
    fn from(err: vaultkeep_core::Error) -> Self {
        match err.kind() {
            vaultkeep_core::ErrorKind::Shutdown => {
                Error::new(ErrorKind::ServerBusy).with_message("server is shutting down")
            }
            vaultkeep_core::ErrorKind::PortInUse => {
                Error::new(ErrorKind::Internal).with_traceback(err.to_string())
            }
            _ => Error::new(ErrorKind::Internal).with_traceback(err.to_string()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The stable, externally-visible failure-to-status mapping from §7/§8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 400 — malformed args, decode failure, decompression-bomb rejection.
    BadRequest,
    /// 401 — absent session cookie / `Hydrus-Key` header.
    MissingCredentials,
    /// 401 — `OPTIONS` bearing `Origin` against a service without CORS.
    DoesNotSupportCORS,
    /// 403 — account lacks the permission the endpoint requires.
    InsufficientCredentials,
    /// 404 — resource/endpoint not found.
    NotFound,
    /// 404 — looked-up data does not exist.
    DataMissing,
    /// 404 — requested file/update artifact is absent.
    FileMissing,
    /// 419 — session key not recognised or has expired.
    SessionInvalid,
    /// 426 — `User-Agent` declares a hydrus network version the server
    /// does not speak.
    NetworkVersion,
    /// 503 — the `server_busy` latch is set.
    ServerBusy,
    /// 509 — account or service bandwidth quota exhausted.
    Bandwidth,
    /// 500 — anything else; traceback attached.
    Internal,
}

impl ErrorKind {
    #[inline]
    pub fn into_error(self) -> Error {
        Error::new(self)
    }

    #[inline]
    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error::new(self).with_message(message)
    }

    pub fn status_code(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::MissingCredentials | Self::DoesNotSupportCORS => StatusCode::UNAUTHORIZED,
            Self::InsufficientCredentials => StatusCode::FORBIDDEN,
            Self::NotFound | Self::DataMissing | Self::FileMissing => StatusCode::NOT_FOUND,
            Self::SessionInvalid => StatusCode::from_u16(419).expect("419 is a valid status code"),
            Self::NetworkVersion => StatusCode::from_u16(426).expect("426 is a valid status code"),
            Self::ServerBusy => StatusCode::SERVICE_UNAVAILABLE,
            Self::Bandwidth => StatusCode::from_u16(509).expect("509 is a valid status code"),
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::MissingCredentials => "missing_credentials",
            Self::DoesNotSupportCORS => "does_not_support_cors",
            Self::InsufficientCredentials => "insufficient_credentials",
            Self::NotFound => "not_found",
            Self::DataMissing => "data_missing",
            Self::FileMissing => "file_missing",
            Self::SessionInvalid => "session_invalid",
            Self::NetworkVersion => "network_version",
            Self::ServerBusy => "server_busy",
            Self::Bandwidth => "bandwidth",
            Self::Internal => "internal",
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::BadRequest => "the request could not be parsed",
            Self::MissingCredentials => "this endpoint requires credentials",
            Self::DoesNotSupportCORS => "this service does not support cross-origin requests",
            Self::InsufficientCredentials => "your account lacks permission for this action",
            Self::NotFound => "not found",
            Self::DataMissing => "the requested data does not exist",
            Self::FileMissing => "the requested file does not exist",
            Self::SessionInvalid => "session key is invalid or has expired",
            Self::NetworkVersion => "client network version does not match the server",
            Self::ServerBusy => "server is busy, try again shortly",
            Self::Bandwidth => "bandwidth quota exhausted",
            Self::Internal => "an internal error occurred",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IntoResponse for ErrorKind {
    #[inline]
    fn into_response(self) -> Response {
        Error::new(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_the_spec_table() {
        assert_eq!(ErrorKind::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::MissingCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::DoesNotSupportCORS.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::InsufficientCredentials.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::DataMissing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::FileMissing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::SessionInvalid.status_code().as_u16(), 419);
        assert_eq!(ErrorKind::NetworkVersion.status_code().as_u16(), 426);
        assert_eq!(ErrorKind::ServerBusy.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ErrorKind::Bandwidth.status_code().as_u16(), 509);
        assert_eq!(ErrorKind::Internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn internal_errors_carry_a_traceback() {
        let err = Error::new(ErrorKind::Internal).with_traceback("panic at handler.rs:42");
        assert_eq!(err.traceback.as_deref(), Some("panic at handler.rs:42"));
    }

    #[test]
    fn shutdown_component_error_maps_to_server_busy() {
        let component = vaultkeep_core::Error::shutdown("model is shutting down");
        let err: Error = component.into();
        assert_eq!(err.kind(), ErrorKind::ServerBusy);
    }

    #[test]
    fn display_includes_kind_and_status() {
        let err = ErrorKind::NotFound.with_message("no such file");
        let text = err.to_string();
        assert!(text.contains("not_found"));
        assert!(text.contains("404"));
        assert!(text.contains("no such file"));
    }
}

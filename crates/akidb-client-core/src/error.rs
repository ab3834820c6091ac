use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::SchemaVersion;

/// Structured category of a failed remote call.
///
/// The categories mirror gRPC status codes so that transports can map their
/// native failures without leaking protocol-specific types upward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Server could not be reached or refused the connection.
    Unavailable,
    /// The call did not complete before its deadline.
    DeadlineExceeded,
    /// Server is overloaded or rate limiting the caller.
    ResourceExhausted,
    /// Credentials were missing or rejected.
    Unauthenticated,
    /// Credentials are valid but lack the required permission.
    PermissionDenied,
    /// Request was malformed or violated server-side validation.
    InvalidArgument,
    /// Object or resource already exists.
    AlreadyExists,
    /// Target collection, tenant or route does not exist.
    NotFound,
    /// Server does not implement the requested method.
    Unimplemented,
    /// Server reported an internal failure.
    Internal,
    /// Failure that does not fit any other category.
    Unknown,
}

impl TransportErrorKind {
    /// Stable lowercase label used for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidArgument => "invalid_argument",
            Self::AlreadyExists => "already_exists",
            Self::NotFound => "not_found",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }

    /// Maps an HTTP status code returned by the REST surface.
    #[must_use]
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 | 504 => Self::DeadlineExceeded,
            409 => Self::AlreadyExists,
            429 => Self::ResourceExhausted,
            501 => Self::Unimplemented,
            502 | 503 => Self::Unavailable,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single remote call.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TransportError {
    /// Structured category.
    pub kind: TransportErrorKind,
    /// Server or transport supplied detail.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error of the given kind.
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unavailable, message)
    }

    /// Creates a `DeadlineExceeded` error.
    #[must_use]
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::DeadlineExceeded, message)
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Internal, message)
    }
}

/// Canonical error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No usable connection could be established.
    #[error("connection to `{endpoint}` unavailable: {reason}")]
    ConnectionUnavailable {
        /// Endpoint the client tried to reach.
        endpoint: String,
        /// Why the handshake failed.
        reason: String,
    },

    /// A request cannot be expressed in the negotiated wire schema.
    #[error("schema {version} cannot encode request: {detail}")]
    SchemaIncompatible {
        /// Negotiated schema generation.
        version: SchemaVersion,
        /// Which field combination was rejected.
        detail: String,
    },

    /// Server reply could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Remote call failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Caller supplied invalid input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation was cancelled before any outcome existed.
    #[error("operation cancelled")]
    Cancelled,

    /// Client has been closed and accepts no further work.
    #[error("client is closed")]
    Closed,

    /// Unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Creates a `ConnectionUnavailable` variant.
    #[must_use]
    pub fn connection_unavailable(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionUnavailable {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `SchemaIncompatible` variant.
    #[must_use]
    pub fn schema_incompatible(version: SchemaVersion, detail: impl Into<String>) -> Self {
        Self::SchemaIncompatible {
            version,
            detail: detail.into(),
        }
    }

    /// Creates a `Protocol` variant.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates a `Validation` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns the transport error when this failure came from a remote call.
    #[must_use]
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenient result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            TransportErrorKind::from_http_status(503),
            TransportErrorKind::Unavailable
        );
        assert_eq!(
            TransportErrorKind::from_http_status(429),
            TransportErrorKind::ResourceExhausted
        );
        assert_eq!(
            TransportErrorKind::from_http_status(401),
            TransportErrorKind::Unauthenticated
        );
        assert_eq!(
            TransportErrorKind::from_http_status(500),
            TransportErrorKind::Internal
        );
        assert_eq!(
            TransportErrorKind::from_http_status(302),
            TransportErrorKind::Unknown
        );
    }

    #[test]
    fn test_display_includes_kind() {
        let err = ClientError::from(TransportError::unavailable("connection refused"));
        assert_eq!(
            err.to_string(),
            "transport error: unavailable: connection refused"
        );
        assert!(err.as_transport().is_some());
    }
}

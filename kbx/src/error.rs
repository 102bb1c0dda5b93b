//! Error types for kbx operations.

use std::path::PathBuf;
use std::time::Duration;

use kbx_proto::{FrameError, SerializationError, Status};

use crate::transport::Method;

/// Alias for `Result<T, kbx::Error>`; the error type can be overridden.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by kbx client operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// No credential could be obtained.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The API server answered with a non-success status.
    #[error("api error: {0}")]
    Api(Box<Status>),

    /// The transport failed before a response was received.
    #[error("{method} {path}: {source}")]
    Transport {
        /// Request method.
        method: Method,
        /// Request path, without the query.
        path: String,
        /// Underlying failure.
        #[source]
        source: TransportError,
    },

    /// The peer violated the exec channel protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The operation's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The client configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// The server status behind an [`Error::Api`].
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Api(status) => Some(&**status),
            _ => None,
        }
    }

    /// HTTP-equivalent code of an [`Error::Api`].
    pub fn code(&self) -> Option<u16> {
        self.status().map(|s| s.code)
    }

    /// Whether the server reported `NotFound`.
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(404)
    }

    /// Whether the server reported a write conflict.
    pub fn is_conflict(&self) -> bool {
        self.code() == Some(409)
    }

    pub(crate) fn api(status: Status) -> Self {
        Self::Api(Box::new(status))
    }
}

/// Failures of a [`TokenProvider`](crate::auth::TokenProvider).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The credential helper could not run or exited unsuccessfully.
    #[error("credential helper `{command}` failed{}: {message}", exit_suffix(.code))]
    ProcessFailed {
        /// Helper program.
        command: String,
        /// Exit code, if the process ran and exited normally.
        code: Option<i32>,
        /// Captured stderr or the spawn error.
        message: String,
    },

    /// The credential source produced nothing usable.
    #[error("empty credential from {origin}")]
    EmptyCredential {
        /// Helper program or token file.
        origin: String,
    },

    /// The helper's output was not a valid credential document.
    #[error("cannot decode credential from `{command}`: {message}")]
    DecodeFailed {
        /// Helper program.
        command: String,
        /// Decoder message.
        message: String,
    },

    /// The helper did not finish in time and was killed.
    #[error("credential helper `{command}` timed out after {timeout:?}")]
    Timeout {
        /// Helper program.
        command: String,
        /// Configured limit.
        timeout: Duration,
    },

    /// A token file could not be read.
    #[error("cannot read token file {}: {source}", .path.display())]
    Io {
        /// Token file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

#[allow(clippy::ref_option)]
fn exit_suffix(code: &Option<i32>) -> String {
    code.map_or_else(String::new, |c| format!(" with exit code {c}"))
}

/// Failures below the HTTP/WebSocket layer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Socket or stream I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The HTTP client rejected or failed the request.
    #[error("http: {0}")]
    Http(String),

    /// The WebSocket handshake or stream failed.
    #[error("websocket: {0}")]
    WebSocket(String),

    /// The connection was closed while still in use.
    #[error("connection closed")]
    Closed,
}

/// Violations of the exec channel protocol.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// A frame was empty or named an unknown channel.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The server sent a frame on a client-to-server channel.
    #[error("unexpected frame on {0:?} channel")]
    UnexpectedChannel(kbx_proto::channel::Channel),

    /// The connection ended without a final status.
    #[error("session ended without a status")]
    MissingStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_expose_status() {
        let err = Error::api(Status::failure(404, "NotFound", "pods \"web\" not found"));
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert_eq!(err.status().map(|s| s.reason.as_str()), Some("NotFound"));
        assert_eq!(
            err.to_string(),
            "api error: NotFound (404): pods \"web\" not found"
        );
    }

    #[test]
    fn process_failure_message() {
        let err = AuthError::ProcessFailed {
            command: "aws".into(),
            code: Some(2),
            message: "no profile".into(),
        };
        assert_eq!(
            err.to_string(),
            "credential helper `aws` failed with exit code 2: no profile"
        );
    }

    #[test]
    fn transport_errors_carry_request_context() {
        let err = Error::Transport {
            method: Method::Get,
            path: "/api/v1/pods".into(),
            source: TransportError::Closed,
        };
        assert_eq!(err.to_string(), "GET /api/v1/pods: connection closed");
    }
}

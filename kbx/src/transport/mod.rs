//! The HTTP/WebSocket seam.
//!
//! The client never touches sockets directly. It hands an [`HttpRequest`] to
//! a [`Transport`] and gets back a status, headers and a body stream, or asks
//! it to upgrade a URL into a message-framed [`Connection`].

mod http;
#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use futures::{Sink, Stream};

pub use http::HttpTransport;

use crate::error::TransportError;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Upper-case method token.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Streamed response body. Dropping it closes the underlying connection.
pub type Body = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// A fully-resolved outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL including the query.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Encoded body.
    pub body: Option<Vec<u8>>,
}

/// Response head plus a lazily-read body.
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body chunks as they arrive.
    pub body: Body,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    /// First value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the status is 2xx.
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// A request to open a message-framed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Absolute `https://` (or `http://`) URL including the query.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Subprotocols to offer, most preferred first.
    pub protocols: Vec<String>,
}

/// A bidirectional, message-framed connection.
///
/// Each item is one complete message; each sent `Vec<u8>` becomes one
/// message. The stream ends when the peer closes.
pub trait MessageConnection:
    Stream<Item = Result<Vec<u8>, TransportError>> + Sink<Vec<u8>, Error = TransportError> + Send
{
}

impl<T> MessageConnection for T where
    T: Stream<Item = Result<Vec<u8>, TransportError>>
        + Sink<Vec<u8>, Error = TransportError>
        + Send
{
}

/// An owned [`MessageConnection`].
pub type Connection = Pin<Box<dyn MessageConnection>>;

impl fmt::Debug for dyn MessageConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Connection")
    }
}

/// Sends requests and opens upgraded connections.
pub trait Transport: Send + Sync {
    /// Sends `request` and returns once the response head has arrived.
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;

    /// Opens a message-framed connection to `request.url`.
    fn upgrade(
        &self,
        request: UpgradeRequest,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send;
}


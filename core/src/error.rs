//! Error types for the request builder.
//!
//! # Design
//! Construction and binding problems (`InvalidArgument`, `TransportNotBound`)
//! are returned synchronously from the call that caused them. Once a request
//! has been handed to the transport, failures only travel through the
//! `ResponseFuture` as `Error::Transport`. Every variant is `Clone` so the
//! memoized future can give the same failure to each observer.
//!
//! HTTP 4xx/5xx are not errors at this level. They are surfaced through
//! `Response::error`, which yields a `ResponseError`.

use std::fmt;

use thiserror::Error;

use crate::http::ResponseBody;

/// Errors returned by `RequestBuilder` and `Toget`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A required argument was missing or empty (e.g. the base host).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The base host could not be parsed as a URL.
    #[error("invalid base url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Network I/O was requested before `upon()` bound a transport.
    #[error("RequestBuilder::upon() must be called first with a transport")]
    TransportNotBound,

    /// The path template names a parameter the mapping does not define.
    #[error("expected path parameter \"{0}\" to be defined")]
    MissingPathParam(String),

    /// The path parameter value is not a string, number or boolean.
    #[error("expected path parameter \"{name}\" to be a string, number or boolean")]
    InvalidPathParam { name: String },

    /// The transport reported a failure (network, timeout, DNS, ...).
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Io,
    Protocol,
    /// The completion callback was released without being invoked.
    Dropped,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Io => "io",
            TransportErrorKind::Protocol => "protocol",
            TransportErrorKind::Dropped => "dropped",
            TransportErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Failure reported by a `Transport` through its completion callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport {kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

/// Logical error carried by a 4xx/5xx response.
///
/// A truthy body is returned as-is; otherwise a `Status` error names the
/// canonical status, or the status class when the code is unknown.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResponseError {
    #[error("{0}")]
    Body(ResponseBody),

    #[error("{message}")]
    Status { status_code: u16, message: String },
}

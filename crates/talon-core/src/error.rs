//! Error taxonomy for the wire codec.
//!
//! All errors are non-panicking and propagate via `Result`.

use thiserror::Error;

/// Errors raised while parsing, serializing, or streaming an HTTP message.
#[derive(Error, Debug)]
pub enum Error {
    /// Clean end of stream before any byte of the message was read.
    #[error("EOF")]
    Eof,

    /// The stream ended in the middle of a message.
    #[error("unexpected EOF")]
    UnexpectedEof,

    /// A read or write deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// Malformed start line, header name/value, or chunk size.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The header block exceeded the configured buffer budget.
    #[error("header too large")]
    HeaderTooLarge,

    /// The body exceeded `maxBodySize`.
    #[error("body too large")]
    BodyTooLarge,

    /// Malformed scheme/host/path, or an invalid bracketed IPv6 literal.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// A request was written without a Host header or URI host.
    #[error("host required")]
    HostRequired,

    /// Access to multipart form data was attempted on a non-multipart request.
    #[error("request has no multipart form")]
    NoMultipartForm,

    /// A per-host connection pool was saturated and no wait queue was
    /// configured (or the wait timed out).
    #[error("no free connections")]
    NoFreeConnections,

    /// The peer closed the connection before a response started.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A caller-supplied body stream writer raised an unrecoverable
    /// failure while being driven.
    #[error("body stream write panic: {0}")]
    BodyStreamWritePanic(String),

    /// A pipelining client exceeded its pending-request budget.
    #[error("pipeline overflow")]
    PipelineOverflow,

    /// Underlying I/O failure not otherwise classified above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the status code a server should answer with for errors
    /// encountered on the read path, per the taxonomy's user-visible
    /// failure mapping. `None` means the error has no fixed mapping
    /// (e.g. it originates on the write path).
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::InvalidHeader(_) | Error::InvalidUri(_) => Some(400),
            Error::BodyTooLarge => Some(413),
            Error::Timeout => Some(408),
            Error::BodyStreamWritePanic(_) => Some(500),
            _ => None,
        }
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

//! Client-side error taxonomy, layered on top of [`talon_core::Error`].

use thiserror::Error;

/// Errors raised by [`crate::client::Client`] and [`crate::pool::ConnectionPool`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The wire codec rejected or could not parse a message.
    #[error(transparent)]
    Core(#[from] talon_core::Error),

    /// A read or write deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// The per-host pool was saturated and no wait queue was configured
    /// (or the configured wait timed out).
    #[error("no free connections")]
    NoFreeConnections,

    /// The request was written without a Host header or URI host.
    #[error("host required")]
    HostRequired,

    /// A request exhausted its idempotent retry budget.
    #[error("retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    /// A redirect chain exceeded `MaxRedirectsCount`.
    #[error("too many redirects (max {0})")]
    TooManyRedirects(u32),

    /// Dialing every configured address failed.
    #[error("dial failed: {0}")]
    Dial(String),

    /// Underlying I/O failure not otherwise classified above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using [`ClientError`].
pub type Result<T> = std::result::Result<T, ClientError>;

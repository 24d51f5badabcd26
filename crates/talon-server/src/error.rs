//! Server-side error taxonomy, layered on top of [`talon_core::Error`].

use thiserror::Error;

/// Errors raised while serving a connection.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The wire codec rejected or could not parse a message.
    #[error(transparent)]
    Core(#[from] talon_core::Error),

    /// A read or write deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// The worker pool had no idle worker and was already at `MaxWorkersCount`.
    #[error("worker pool saturated")]
    WorkerPoolSaturated,

    /// Underlying I/O failure not otherwise classified above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// The status code a connection loop should answer with before closing,
    /// per the taxonomy's user-visible failure mapping.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::Core(e) => e.status_code().unwrap_or(500),
            ServerError::Timeout => 408,
            ServerError::WorkerPoolSaturated => 503,
            ServerError::Io(_) => 500,
        }
    }
}

/// Result type alias using [`ServerError`].
pub type Result<T> = std::result::Result<T, ServerError>;

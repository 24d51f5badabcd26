//! Talon Client - keep-alive connection pool and HTTP/1.1 client.
//!
//! Layers on top of `talon-core`'s wire codec: [`pool::ConnectionPool`]
//! manages a bounded, per-host LIFO stack of live connections (C7), and
//! [`client::Client`] drives the request/response exchange over a pooled
//! connection with idempotent retry and redirect following (C8).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod pool;

pub use client::Client;
pub use error::{ClientError, Result};
pub use pool::{ConnectionPool, Dialer, PooledConnection, RoundRobinDialer, TcpDialer};

//! Talon Server - worker-pool HTTP/1.1 server.
//!
//! [`worker::WorkerPool`] (C9) hands each accepted connection to a
//! reusable worker task; [`server::Server`] (C10) owns the accept loop,
//! the coarse 1Hz clock, and graceful shutdown. Application code plugs in
//! by implementing [`handler::RequestHandler`] — routing and middleware
//! composition are out of scope here, same as `talon-client`'s dialer
//! seam leaves dialing policy to the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod handler;
pub mod server;
pub mod worker;

pub use error::{Result, ServerError};
pub use handler::{EchoHandler, HijackedIo, Outcome, RequestHandler, ServerContext};
pub use server::Server;
pub use worker::WorkerPool;

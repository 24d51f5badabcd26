//! Talon Core - wire-level HTTP/1.1 codec.
//!
//! This crate contains the performance-critical parsing and serialization
//! paths: byte buffer pooling, the argument map, URI parsing, header
//! blocks, body framing, and the request/response message types that tie
//! them together. It has no knowledge of sockets or async I/O — callers
//! feed it already-buffered bytes and drive the read loop themselves (see
//! `talon-client` and `talon-server`).
//!
//! # Invariants
//!
//! 1. Parsers never block and never allocate unboundedly on hostile input.
//! 2. No panics on malformed wire input; failures surface as [`error::Error`].

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod args;
pub mod body;
pub mod buffer;
pub mod date;
pub mod error;
pub mod header;
pub mod message;
pub mod multipart;
pub mod uri;

pub use args::ArgMap;
pub use buffer::{BufferPool, ByteBuffer};
pub use date::HttpDate;
pub use error::Error;
pub use header::{Cookie, RequestHeader, ResponseHeader, SameSite};
pub use message::{Body, Request, Response, ShadowSlot};
pub use multipart::{MultipartDecoder, MultipartField, MultipartForm};
pub use uri::Uri;

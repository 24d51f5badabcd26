//! Talon Config - configuration types for the Talon HTTP/1.1 engine.
//!
//! Supports hot reload via `ArcSwap`, covering every tunable the engine
//! exposes (buffer sizes, timeouts, pool limits, retry/redirect budgets,
//! header normalization toggles).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod loader;
pub mod types;

pub use loader::{ConfigError, ConfigLoader};
pub use types::{ClientConfig, ServerConfig, TalonConfig};

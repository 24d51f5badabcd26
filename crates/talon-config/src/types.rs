//! Configuration types for the Talon HTTP/1.1 engine.
//!
//! Every documented default has a corresponding `default_*` function here
//! so a bare `[server]` / `[client]` TOML table (or none at all) yields
//! the documented defaults.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure: one engine, a client side and a server
/// side, each independently tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalonConfig {
    /// Server (C9/C10) configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Client (C7/C8) configuration.
    #[serde(default)]
    pub client: ClientConfig,
}

impl Default for TalonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

/// Server-side tunables (worker pool + per-connection loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,

    /// `ReadBufferSize` (default 4096).
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,

    /// `WriteBufferSize` (default 4096).
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,

    /// `MaxRequestBodySize` (default 4 MiB).
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,

    /// `ReadTimeout`, seconds. Unset by default.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,

    /// `WriteTimeout`, seconds. Unset by default.
    #[serde(default)]
    pub write_timeout_secs: Option<u64>,

    /// `IdleTimeout`, seconds. Unset by default.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// `MaxWorkersCount` for the worker pool (0 = unbounded).
    #[serde(default = "default_max_workers_count")]
    pub max_workers_count: usize,

    /// `MaxIdleWorkerDuration`, seconds (default 10s).
    #[serde(default = "default_idle_worker_secs")]
    pub max_idle_worker_duration_secs: u64,

    /// `Name`: overrides the default `Server:` header value.
    #[serde(default)]
    pub name: Option<String>,

    /// `NoDefaultServerHeader`.
    #[serde(default)]
    pub no_default_server_header: bool,

    /// `NoDefaultDate`.
    #[serde(default)]
    pub no_default_date: bool,

    /// `NoDefaultContentType`.
    #[serde(default)]
    pub no_default_content_type: bool,

    /// `DisableHeaderNamesNormalizing`.
    #[serde(default)]
    pub disable_header_names_normalizing: bool,

    /// `DisablePathNormalizing`.
    #[serde(default)]
    pub disable_path_normalizing: bool,

    /// Bound on in-flight graceful-shutdown drain, seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_period_secs: u64,
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

fn default_buffer_size() -> usize {
    4096
}

fn default_max_request_body_size() -> usize {
    4 * 1024 * 1024
}

fn default_max_workers_count() -> usize {
    256 * 1024
}

fn default_idle_worker_secs() -> u64 {
    10
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
            read_buffer_size: default_buffer_size(),
            write_buffer_size: default_buffer_size(),
            max_request_body_size: default_max_request_body_size(),
            read_timeout_secs: None,
            write_timeout_secs: None,
            idle_timeout_secs: None,
            max_workers_count: default_max_workers_count(),
            max_idle_worker_duration_secs: default_idle_worker_secs(),
            name: None,
            no_default_server_header: false,
            no_default_date: false,
            no_default_content_type: false,
            disable_header_names_normalizing: false,
            disable_path_normalizing: false,
            shutdown_grace_period_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_secs.map(Duration::from_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_idle_worker_duration(&self) -> Duration {
        Duration::from_secs(self.max_idle_worker_duration_secs)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }
}

/// Client-side tunables (per-host connection pool + `Do`/retry/redirect
/// policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// `ReadBufferSize` (default 4096).
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,

    /// `WriteBufferSize` (default 4096).
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,

    /// `MaxResponseBodySize` (default unlimited).
    #[serde(default)]
    pub max_response_body_size: Option<usize>,

    /// `ReadTimeout`, seconds. Unset by default.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,

    /// `WriteTimeout`, seconds. Unset by default.
    #[serde(default)]
    pub write_timeout_secs: Option<u64>,

    /// `MaxConnsPerHost` (default 512).
    #[serde(default = "default_max_conns_per_host")]
    pub max_conns_per_host: usize,

    /// `MaxIdleConnDuration` (default 10s).
    #[serde(default = "default_idle_conn_secs")]
    pub max_idle_conn_duration_secs: u64,

    /// `MaxConnDuration`. Unset (no cap) by default.
    #[serde(default)]
    pub max_conn_duration_secs: Option<u64>,

    /// `MaxConnWaitTimeout`. Unset (fail fast, no wait queue) by default.
    #[serde(default)]
    pub max_conn_wait_timeout_secs: Option<u64>,

    /// `MaxIdemponentCallAttempts` (default 5).
    #[serde(default = "default_max_idempotent_attempts")]
    pub max_idempotent_call_attempts: u32,

    /// `MaxRedirectsCount` (default 16).
    #[serde(default = "default_max_redirects")]
    pub max_redirects_count: u32,

    /// `Name`: overrides the default `User-Agent:` header value.
    #[serde(default)]
    pub name: Option<String>,

    /// `NoDefaultUserAgentHeader`.
    #[serde(default)]
    pub no_default_user_agent_header: bool,

    /// `DisableHeaderNamesNormalizing`.
    #[serde(default)]
    pub disable_header_names_normalizing: bool,

    /// `DisablePathNormalizing`.
    #[serde(default)]
    pub disable_path_normalizing: bool,
}

fn default_max_conns_per_host() -> usize {
    512
}

fn default_idle_conn_secs() -> u64 {
    10
}

fn default_max_idempotent_attempts() -> u32 {
    5
}

fn default_max_redirects() -> u32 {
    16
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_buffer_size(),
            write_buffer_size: default_buffer_size(),
            max_response_body_size: None,
            read_timeout_secs: None,
            write_timeout_secs: None,
            max_conns_per_host: default_max_conns_per_host(),
            max_idle_conn_duration_secs: default_idle_conn_secs(),
            max_conn_duration_secs: None,
            max_conn_wait_timeout_secs: None,
            max_idempotent_call_attempts: default_max_idempotent_attempts(),
            max_redirects_count: default_max_redirects(),
            name: None,
            no_default_user_agent_header: false,
            disable_header_names_normalizing: false,
            disable_path_normalizing: false,
        }
    }
}

impl ClientConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_idle_conn_duration(&self) -> Duration {
        Duration::from_secs(self.max_idle_conn_duration_secs)
    }

    pub fn max_conn_duration(&self) -> Option<Duration> {
        self.max_conn_duration_secs.map(Duration::from_secs)
    }

    pub fn max_conn_wait_timeout(&self) -> Option<Duration> {
        self.max_conn_wait_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = TalonConfig::default();
        assert_eq!(config.server.read_buffer_size, 4096);
        assert_eq!(config.server.max_request_body_size, 4 * 1024 * 1024);
        assert_eq!(config.server.max_idle_worker_duration_secs, 10);
        assert_eq!(config.client.max_conns_per_host, 512);
        assert_eq!(config.client.max_idle_conn_duration_secs, 10);
        assert_eq!(config.client.max_idempotent_call_attempts, 5);
        assert_eq!(config.client.max_redirects_count, 16);
        assert!(config.client.max_response_body_size.is_none());
    }

    #[test]
    fn parses_minimal_toml_with_defaults_filled_in() {
        let toml = r#"
[server]
listen = "127.0.0.1:3000"

[client]
max_conns_per_host = 128
"#;
        let config: TalonConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.server.read_buffer_size, 4096);
        assert_eq!(config.client.max_conns_per_host, 128);
        assert_eq!(config.client.max_redirects_count, 16);
    }
}

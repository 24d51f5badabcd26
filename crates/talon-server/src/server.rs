//! Accept loop (C10): binds the listener, hands each accepted connection
//! to the worker pool, drives the coarse 1Hz clock, and supports graceful
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use talon_config::ServerConfig;
use talon_core::HttpDate;

use crate::connection::worker_func;
use crate::error::Result;
use crate::handler::RequestHandler;
use crate::worker::WorkerPool;

/// Ties the worker pool, connection loop, and coarse clock to one
/// listening socket.
pub struct Server<H: RequestHandler> {
    config: Arc<ServerConfig>,
    clock: Arc<HttpDate>,
    pool: Arc<WorkerPool<TcpStream>>,
    shutdown: Arc<Notify>,
}

impl<H: RequestHandler> Server<H> {
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let config = Arc::new(config);
        let handler = Arc::new(handler);
        let clock = Arc::new(HttpDate::new(unix_now()));

        let pool_config = Arc::clone(&config);
        let pool_clock = Arc::clone(&clock);
        let pool = WorkerPool::new(config.max_workers_count, config.max_idle_worker_duration(), move |stream: TcpStream| {
            let handler = Arc::clone(&handler);
            let config = Arc::clone(&pool_config);
            let clock = Arc::clone(&pool_clock);
            async move { worker_func(stream, handler, config, clock).await }
        });

        Self { config, clock, pool, shutdown: Arc::new(Notify::new()) }
    }

    /// A handle whose `notify_one()` call initiates graceful shutdown from
    /// outside `run()` (e.g. a Ctrl-C handler in the calling binary).
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the listener and serves connections until shutdown is
    /// requested or the listener fails permanently.
    pub async fn run(&self) -> Result<()> {
        self.pool.start();
        let listener = TcpListener::bind(self.config.listen).await?;
        tracing::info!(addr = %self.config.listen, "talon server listening");

        let clock_task = spawn_clock_tick(Arc::clone(&self.clock));

        let result = self.accept_loop(&listener).await;

        clock_task.abort();
        self.pool.stop();
        wait_for_drain(&self.pool, self.config.shutdown_grace_period()).await;

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        let mut backoff = Duration::from_millis(5);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            backoff = Duration::from_millis(5);
                            let _ = stream.set_nodelay(true);
                            tracing::debug!(%peer, "accepted connection");
                            if !self.pool.serve(stream) {
                                tracing::warn!(%peer, "worker pool rejected connection");
                            }
                        }
                        Err(e) if is_transient(&e) => {
                            tracing::warn!(error = %e, "transient accept error, backing off");
                            tokio::time::sleep(backoff).await;
                            backoff = (backoff * 2).min(Duration::from_secs(1));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "permanent accept error, shutting down");
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn spawn_clock_tick(clock: Arc<HttpDate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            clock.tick(unix_now());
        }
    })
}

async fn wait_for_drain<T: Send + 'static>(pool: &WorkerPool<T>, bound: Duration) {
    let drained = async {
        while pool.active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    if tokio::time::timeout(bound, drained).await.is_err() {
        tracing::warn!(remaining = pool.active_count(), "graceful shutdown bound elapsed with workers still draining");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;

    #[tokio::test]
    async fn serves_requests_until_shutdown() {
        let mut config = ServerConfig::default();
        config.listen = "127.0.0.1:0".parse().unwrap();
        let server = Arc::new(Server::new(config, EchoHandler));

        let shutdown = server.shutdown_handle();
        let server_for_task = Arc::clone(&server);
        let run_task = tokio::spawn(async move { server_for_task.run().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.notify_one();

        let result = tokio::time::timeout(Duration::from_secs(1), run_task).await;
        assert!(result.is_ok(), "server should stop promptly after shutdown signal");
    }
}

//! Per-host connection pool (C7): a bounded LIFO stack of live connections
//! per host, with idle eviction and an optional FIFO wait-queue for
//! callers when the pool is saturated.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::timeout;

use talon_config::ClientConfig;

use crate::error::{ClientError, Result};

/// A connection type a [`ConnectionPool`] can dial and pool. Implemented
/// by [`TcpDialer`] for plain TCP; a TLS provider supplies an equivalent
/// `Dialer` whose `Stream` is already wrapped, so this engine never needs
/// to terminate TLS itself.
pub trait Dialer: Send + Sync + 'static {
    /// The concrete transport stream produced by a successful dial.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Dials `host` (as it appears in the request's `Host`/authority,
    /// e.g. `example.com:443`), returning a connected stream.
    fn dial(&self, host: &str) -> impl Future<Output = std::io::Result<Self::Stream>> + Send;
}

/// The default [`Dialer`]: a plain `tokio::net::TcpStream` connect.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, host: &str) -> std::io::Result<TcpStream> {
        let addr = if host.contains(':') { host.to_string() } else { format!("{host}:80") };
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// A [`Dialer`] that round-robins across a fixed, comma-separated set of
/// addresses: each call picks the next address; on dial failure, the
/// remaining addresses are tried before giving up.
pub struct RoundRobinDialer {
    addrs: Vec<String>,
    next: AtomicUsize,
}

impl RoundRobinDialer {
    /// Parses a comma-separated address list (`"a:80,b:80,c:80"`).
    pub fn new(addrs: &str) -> Self {
        Self {
            addrs: addrs.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
            next: AtomicUsize::new(0),
        }
    }

    pub fn addresses(&self) -> &[String] {
        &self.addrs
    }
}

impl Dialer for RoundRobinDialer {
    type Stream = TcpStream;

    async fn dial(&self, _host: &str) -> std::io::Result<TcpStream> {
        if self.addrs.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "no addresses configured"));
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.addrs.len();
        let mut last_err = None;
        for offset in 0..self.addrs.len() {
            let addr = &self.addrs[(start + offset) % self.addrs.len()];
            match TcpStream::connect(addr.as_str()).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap())
    }
}

/// A live connection borrowed from the pool: the raw stream plus any
/// bytes already read off the wire but not yet consumed by the codec
/// (pipelining leftovers), and bookkeeping for idle eviction and the
/// write/read deadline drift optimization (only re-set the deadline if
/// the old one differs from the target by more than 25%).
pub struct PooledConnection<S> {
    pub stream: S,
    pub read_buf: BytesMut,
    pub(crate) host: String,
    created_at: Instant,
    last_used_at: Instant,
    last_read_deadline: Option<Instant>,
    last_write_deadline: Option<Instant>,
    /// Set once a response has started to arrive; used by the client's
    /// retry policy to distinguish "never touched" connections (safe to
    /// retry non-idempotent requests on) from ones mid-exchange.
    pub used: bool,
    /// Forces the connection to be discarded on release rather than
    /// pooled (e.g. `Connection: close` negotiated, or max duration hit).
    pub discard: bool,
    /// The live-count slot this connection holds in its `HostPool`, or
    /// `None` if that slot has already been accounted for elsewhere
    /// (pushed to idle, or explicitly freed by `release`/`pop_fresh`/the
    /// idle cleaner). A connection dropped while still holding a slot —
    /// e.g. a caller's future cancelled mid-exchange by a client timeout —
    /// frees it here instead of leaking it.
    pool: Option<Arc<HostPool<S>>>,
}

impl<S> PooledConnection<S> {
    fn new(stream: S, host: String, now: Instant, pool: Arc<HostPool<S>>) -> Self {
        Self {
            stream,
            read_buf: BytesMut::new(),
            host,
            created_at: now,
            last_used_at: now,
            last_read_deadline: None,
            last_write_deadline: None,
            used: false,
            discard: false,
            pool: Some(pool),
        }
    }

    /// Marks this connection's pool slot as already accounted for, so
    /// `Drop` doesn't free it a second time.
    fn defuse(&mut self) {
        self.pool = None;
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Returns `target` if the drift from the last deadline set on this
    /// connection exceeds 25% of `budget` (the timeout duration the
    /// caller is enforcing), else `None` (caller should skip the
    /// `set_deadline` syscall and keep the previously set value).
    pub fn next_read_deadline(&mut self, target: Instant, budget: Duration) -> Option<Instant> {
        if drift_exceeds_quarter(self.last_read_deadline, target, budget) {
            self.last_read_deadline = Some(target);
            Some(target)
        } else {
            None
        }
    }

    pub fn next_write_deadline(&mut self, target: Instant, budget: Duration) -> Option<Instant> {
        if drift_exceeds_quarter(self.last_write_deadline, target, budget) {
            self.last_write_deadline = Some(target);
            Some(target)
        } else {
            None
        }
    }
}

/// Only re-set the deadline if the old one differs from the target by
/// more than 25%, to avoid a syscall on every read/write. Drift is
/// measured against the caller's configured timeout budget, not an
/// arbitrary wall-clock span.
fn drift_exceeds_quarter(previous: Option<Instant>, target: Instant, budget: Duration) -> bool {
    match previous {
        None => true,
        Some(prev) => {
            let diff = if target > prev { target - prev } else { prev - target };
            budget.is_zero() || diff.as_secs_f64() > budget.as_secs_f64() * 0.25
        }
    }
}

impl<S> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.total.fetch_sub(1, Ordering::SeqCst);
            pool.waiters.notify_one();
        }
    }
}

struct HostPool<S> {
    idle: Mutex<Vec<PooledConnection<S>>>,
    total: AtomicUsize,
    cleaner_running: AtomicBool,
    waiters: Notify,
}

impl<S> HostPool<S> {
    fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
            cleaner_running: AtomicBool::new(false),
            waiters: Notify::new(),
        }
    }
}

/// The per-host LIFO connection pool. `D::Stream` is the pooled
/// connection type; swap `D` for a TLS-wrapping dialer to pool TLS
/// connections without any change to this type.
pub struct ConnectionPool<D: Dialer> {
    dialer: D,
    hosts: DashMap<String, Arc<HostPool<D::Stream>>>,
    config: Arc<ClientConfig>,
}

impl<D: Dialer> ConnectionPool<D> {
    pub fn new(dialer: D, config: Arc<ClientConfig>) -> Self {
        Self { dialer, hosts: DashMap::new(), config }
    }

    fn host_pool(&self, host: &str) -> Arc<HostPool<D::Stream>> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostPool::new()))
            .clone()
    }

    /// Acquires a connection for `host`: pops a warm idle connection
    /// (LIFO), dials a fresh one if under the per-host cap, or waits/fails
    /// per `MaxConnWaitTimeout`.
    pub async fn acquire(&self, host: &str) -> Result<PooledConnection<D::Stream>> {
        let pool = self.host_pool(host);
        loop {
            if let Some(conn) = pop_fresh(&pool, self.config.max_idle_conn_duration()) {
                return Ok(conn);
            }

            let total = pool.total.load(Ordering::SeqCst);
            if total < self.config.max_conns_per_host {
                if pool.total.compare_exchange(total, total + 1, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                    match self.dialer.dial(host).await {
                        Ok(stream) => {
                            self.maybe_spawn_cleaner(host, pool.clone());
                            tracing::debug!(host, "dialed new pooled connection");
                            return Ok(PooledConnection::new(stream, host.to_string(), Instant::now(), pool.clone()));
                        }
                        Err(e) => {
                            pool.total.fetch_sub(1, Ordering::SeqCst);
                            return Err(ClientError::Dial(e.to_string()));
                        }
                    }
                }
                continue;
            }

            match self.config.max_conn_wait_timeout() {
                Some(wait) => {
                    let notified = pool.waiters.notified();
                    if timeout(wait, notified).await.is_err() {
                        return Err(ClientError::NoFreeConnections);
                    }
                }
                None => return Err(ClientError::NoFreeConnections),
            }
        }
    }

    /// Returns a connection to the pool, or closes it (decrementing the
    /// live count) if it's marked for discard, errored, or exceeded
    /// `MaxConnDuration`.
    pub fn release(&self, mut conn: PooledConnection<D::Stream>) {
        let pool = self.host_pool(&conn.host);
        let now = Instant::now();

        let expired = self
            .config
            .max_conn_duration()
            .is_some_and(|max| conn.age(now) >= max);

        if conn.discard || expired {
            conn.defuse();
            pool.total.fetch_sub(1, Ordering::SeqCst);
            pool.waiters.notify_one();
            return;
        }

        conn.last_used_at = now;
        pool.idle.lock().push(conn);
        pool.waiters.notify_one();
    }

    /// Starts the background idle cleaner for `host` if one isn't
    /// already running. Runs every `MaxIdleConnDuration / 2`, evicting
    /// connections idle longer than `MaxIdleConnDuration` from the
    /// bottom of the LIFO stack (the coldest entries); exits once the
    /// host has zero live connections (restarted lazily on next dial).
    fn maybe_spawn_cleaner(&self, host: &str, pool: Arc<HostPool<D::Stream>>) {
        if pool.cleaner_running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }
        let max_idle = self.config.max_idle_conn_duration();
        let host = host.to_string();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(max_idle / 2).await;
                let now = Instant::now();
                let mut evicted = 0usize;
                {
                    let mut idle = pool.idle.lock();
                    let keep_from = idle
                        .iter()
                        .position(|c| now.saturating_duration_since(c.last_used_at) < max_idle)
                        .unwrap_or(idle.len());
                    if keep_from > 0 {
                        for mut c in idle.drain(0..keep_from) {
                            c.defuse();
                        }
                        evicted = keep_from;
                    }
                }
                if evicted > 0 {
                    pool.total.fetch_sub(evicted, Ordering::SeqCst);
                    tracing::debug!(host = %host, evicted, "idle connections reaped");
                }
                if pool.total.load(Ordering::SeqCst) == 0 {
                    pool.cleaner_running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });
    }

    /// Number of physical connections currently open (idle + in flight)
    /// for `host`. Exposed for tests asserting that no more than
    /// `MaxConnsPerHost` physical connections are ever opened.
    pub fn total_for(&self, host: &str) -> usize {
        self.hosts.get(host).map(|p| p.total.load(Ordering::SeqCst)).unwrap_or(0)
    }

    pub fn idle_count_for(&self, host: &str) -> usize {
        self.hosts.get(host).map(|p| p.idle.lock().len()).unwrap_or(0)
    }
}

fn pop_fresh<S>(pool: &HostPool<S>, max_idle: Duration) -> Option<PooledConnection<S>> {
    let mut idle = pool.idle.lock();
    while let Some(mut conn) = idle.pop() {
        if Instant::now().saturating_duration_since(conn.last_used_at) < max_idle {
            return Some(conn);
        }
        conn.defuse();
        pool.total.fetch_sub(1, Ordering::SeqCst);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_releases_and_reuses_lifo() {
        let config = Arc::new(ClientConfig { max_conns_per_host: 2, ..Default::default() });
        let pool = ConnectionPool::new(TestDialer::default(), config);

        let a = pool.acquire("h").await.unwrap();
        let b = pool.acquire("h").await.unwrap();
        assert_eq!(pool.total_for("h"), 2);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle_count_for("h"), 2);

        // LIFO: the most recently released connection comes back first.
        let reused = pool.acquire("h").await.unwrap();
        assert_eq!(pool.idle_count_for("h"), 1);
        pool.release(reused);
    }

    #[tokio::test]
    async fn saturated_pool_without_wait_queue_errors() {
        let config = Arc::new(ClientConfig { max_conns_per_host: 1, ..Default::default() });
        let pool = ConnectionPool::new(TestDialer::default(), config);
        let _a = pool.acquire("h").await.unwrap();
        let err = pool.acquire("h").await.unwrap_err();
        assert!(matches!(err, ClientError::NoFreeConnections));
    }

    #[tokio::test]
    async fn discarded_connection_frees_a_slot() {
        let config = Arc::new(ClientConfig { max_conns_per_host: 1, ..Default::default() });
        let pool = ConnectionPool::new(TestDialer::default(), config);
        let mut a = pool.acquire("h").await.unwrap();
        a.discard = true;
        pool.release(a);
        assert_eq!(pool.total_for("h"), 0);
        let _b = pool.acquire("h").await.unwrap();
        assert_eq!(pool.total_for("h"), 1);
    }

    #[tokio::test]
    async fn dropping_connection_without_release_frees_its_slot() {
        // A connection abandoned mid-exchange (e.g. the future that holds
        // it is cancelled by a client timeout) must not leak its slot: it
        // never reaches `release`, so the slot has to be freed by `Drop`.
        let config = Arc::new(ClientConfig { max_conns_per_host: 1, ..Default::default() });
        let pool = ConnectionPool::new(TestDialer::default(), config);
        let a = pool.acquire("h").await.unwrap();
        assert_eq!(pool.total_for("h"), 1);
        drop(a);
        assert_eq!(pool.total_for("h"), 0);
        let _b = pool.acquire("h").await.unwrap();
        assert_eq!(pool.total_for("h"), 1);
    }

    #[derive(Default, Clone, Copy)]
    struct TestDialer;

    impl Dialer for TestDialer {
        type Stream = tokio::io::DuplexStream;

        async fn dial(&self, _host: &str) -> std::io::Result<Self::Stream> {
            let (a, _b) = tokio::io::duplex(64);
            Ok(a)
        }
    }
}

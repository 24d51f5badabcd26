//! Worker pool (C9): a bounded set of reusable tasks that serve accepted
//! connections. Idle workers are kept on a LIFO hand-off stack so the most
//! recently used one is reused first, keeping it warm in cache; workers
//! past `MaxIdleWorkerDuration` with no new work self-reap.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unset,
    Running,
    Stopping,
    Stopped,
}

/// `Unset -> Running -> Stopping -> Stopped -> Running`. Any other
/// transition is a programming error and panics rather than silently
/// misbehaving.
struct StateMachine(Mutex<State>);

impl StateMachine {
    fn start(&self) {
        let mut state = self.0.lock();
        match *state {
            State::Unset | State::Stopped => *state = State::Running,
            State::Running => panic!("worker pool started twice"),
            State::Stopping => panic!("worker pool started while stopping"),
        }
    }

    fn stop(&self) {
        let mut state = self.0.lock();
        match *state {
            State::Running => *state = State::Stopping,
            other => panic!("worker pool stopped from state {other:?}"),
        }
    }

    fn finish_stop(&self) {
        *self.0.lock() = State::Stopped;
    }

    fn get(&self) -> State {
        *self.0.lock()
    }
}

/// A job handed to a worker, or `None` as the termination sentinel.
type Job<T> = Option<T>;

/// Bounded LIFO pool of reusable workers, generic over the job type `T`
/// handed to each one (the server uses `T = tokio::net::TcpStream`).
pub struct WorkerPool<T: Send + 'static> {
    max_workers: usize,
    max_idle: Duration,
    handler: Arc<dyn Fn(T) -> BoxFuture + Send + Sync>,
    idle: Mutex<Vec<mpsc::Sender<Job<T>>>>,
    total: AtomicUsize,
    last_overflow_log: Mutex<Option<Instant>>,
    state: StateMachine,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// `max_workers == 0` means unbounded. `handler` is `WorkerFunc`: the
    /// routine each worker runs once per job, in a loop, for its lifetime.
    pub fn new<H, Fut>(max_workers: usize, max_idle: Duration, handler: H) -> Arc<Self>
    where
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Arc<dyn Fn(T) -> BoxFuture + Send + Sync> =
            Arc::new(move |job: T| -> BoxFuture { Box::pin(handler(job)) });
        Arc::new(Self {
            max_workers: if max_workers == 0 { usize::MAX } else { max_workers },
            max_idle,
            handler,
            idle: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
            last_overflow_log: Mutex::new(None),
            state: StateMachine(Mutex::new(State::Unset)),
        })
    }

    pub fn start(&self) {
        self.state.start();
    }

    /// Stops accepting new work: idle workers exit immediately, busy
    /// workers finish their current job and then exit instead of rejoining
    /// the idle stack.
    pub fn stop(&self) {
        self.state.stop();
        let idle: Vec<_> = std::mem::take(&mut *self.idle.lock());
        for tx in idle {
            let _ = tx.try_send(None);
        }
        self.state.finish_stop();
    }

    /// Total workers currently alive (idle + busy).
    pub fn active_count(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Pops an idle worker and hands it `job`, or spawns a new one under
    /// `max_workers`. Returns `false` ("rejected") if the pool is
    /// saturated or not running; the caller must close `job` itself.
    pub fn serve(self: &Arc<Self>, mut job: T) -> bool {
        if self.state.get() != State::Running {
            return false;
        }
        loop {
            let candidate = self.idle.lock().pop();
            let Some(tx) = candidate else { break };
            match tx.try_send(Some(job)) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Closed(Some(returned)))
                | Err(mpsc::error::TrySendError::Full(Some(returned))) => {
                    job = returned;
                    continue;
                }
                _ => unreachable!("job always Some when sent"),
            }
        }

        let reserved = self
            .total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n < self.max_workers {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok();

        if !reserved {
            self.log_overflow_rate_limited();
            return false;
        }

        self.spawn_worker(job);
        true
    }

    fn log_overflow_rate_limited(&self) {
        let mut last = self.last_overflow_log.lock();
        let now = Instant::now();
        if last.map(|t| now.duration_since(t) >= Duration::from_secs(10)).unwrap_or(true) {
            tracing::warn!(max = self.max_workers, "worker pool overflow, rejecting connection");
            *last = Some(now);
        }
    }

    fn spawn_worker(self: &Arc<Self>, first_job: T) {
        let pool = Arc::clone(self);
        let (tx, mut rx) = mpsc::channel::<Job<T>>(1);

        tokio::spawn(async move {
            let mut job = first_job;
            loop {
                (pool.handler)(job).await;

                if pool.state.get() != State::Running {
                    break;
                }
                pool.idle.lock().push(tx.clone());

                match tokio::time::timeout(pool.max_idle, rx.recv()).await {
                    Ok(Some(Some(next))) => job = next,
                    // Sentinel, closed channel, or idle timeout: self-reap.
                    _ => break,
                }
            }
            pool.total.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn serve_reuses_idle_worker_before_spawning() {
        let processed = Arc::new(AtomicU32::new(0));
        let done = Arc::new(Notify::new());
        let p = processed.clone();
        let d = done.clone();
        let pool = WorkerPool::new(4, Duration::from_secs(10), move |_job: u32| {
            let p = p.clone();
            let d = d.clone();
            async move {
                p.fetch_add(1, Ordering::SeqCst);
                d.notify_one();
            }
        });
        pool.start();

        assert!(pool.serve(1));
        done.notified().await;
        // give the worker a moment to push itself back onto the idle stack
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.active_count(), 1);

        assert!(pool.serve(2));
        done.notified().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.active_count(), 1, "second job should reuse the same worker");
        assert_eq!(processed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn serve_rejects_past_max_workers() {
        let gate = Arc::new(Notify::new());
        let g = gate.clone();
        let pool = WorkerPool::new(1, Duration::from_secs(10), move |_job: u32| {
            let g = g.clone();
            async move {
                g.notified().await;
            }
        });
        pool.start();

        assert!(pool.serve(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pool.serve(2), "pool at capacity with its one worker still busy");
        gate.notify_waiters();
    }

    #[tokio::test]
    async fn idle_worker_self_reaps_after_timeout() {
        let pool = WorkerPool::new(4, Duration::from_millis(30), |_job: u32| async {});
        pool.start();
        assert!(pool.serve(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    #[should_panic(expected = "started twice")]
    fn double_start_panics() {
        let pool: Arc<WorkerPool<u32>> = WorkerPool::new(1, Duration::from_secs(1), |_: u32| async {});
        pool.start();
        pool.start();
    }

    #[test]
    #[should_panic(expected = "stopped from state")]
    fn stop_before_start_panics() {
        let pool: Arc<WorkerPool<u32>> = WorkerPool::new(1, Duration::from_secs(1), |_: u32| async {});
        pool.stop();
    }
}

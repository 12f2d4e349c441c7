//! Cached worker pool for blocking tasks.
//!
//! Threads are spawned on demand up to a ceiling and retire after a period
//! without work. Shutdown lets queued and running jobs finish within a grace
//! period, then abandons whatever is still queued.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, warn};

use super::SERVER_TARGET;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Failures raised when handing work to a pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("pool is shut down")]
    ShutDown,
    /// No thread could be started to run the job.
    #[error("failed to spawn pool thread: {source}")]
    Spawn {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    workers: usize,
    idle: usize,
    active: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    available: Condvar,
    drained: Condvar,
    max_threads: usize,
    keep_alive: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct WorkerPool {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WorkerPool")
            .field("max_threads", &self.shared.max_threads)
            .field("size", &self.size())
            .field("active", &self.active())
            .finish()
    }
}

impl WorkerPool {
    pub(crate) fn new(max_threads: usize) -> Self {
        Self::with_keep_alive(max_threads, KEEP_ALIVE)
    }

    pub(crate) fn with_keep_alive(max_threads: usize, keep_alive: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::default(),
                available: Condvar::new(),
                drained: Condvar::new(),
                max_threads: max_threads.max(1),
                keep_alive,
            }),
        }
    }

    /// Queues `job`, starting a thread when no idle one can take it.
    pub(crate) fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(PoolError::ShutDown);
        }
        state.queue.push_back(Box::new(job));
        if state.idle >= state.queue.len() {
            self.shared.available.notify_one();
            return Ok(());
        }
        if state.workers >= self.shared.max_threads {
            return Ok(());
        }

        state.workers += 1;
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("analysisd-worker".to_owned())
            .spawn(move || run_worker(&shared));
        match spawned {
            Ok(_) => Ok(()),
            Err(source) => {
                state.workers -= 1;
                if state.workers > 0 {
                    warn!(
                        target: SERVER_TARGET,
                        error = %source,
                        "failed to grow worker pool; job stays queued"
                    );
                    return Ok(());
                }
                state.queue.pop_back();
                Err(PoolError::Spawn { source })
            }
        }
    }

    /// Threads currently alive.
    pub(crate) fn size(&self) -> usize {
        self.shared.lock().workers
    }

    /// Jobs currently running.
    pub(crate) fn active(&self) -> usize {
        self.shared.lock().active
    }

    /// Stops accepting work and waits up to `grace` for the pool to drain.
    ///
    /// Returns `false` when the wait timed out and queued jobs were dropped.
    pub(crate) fn shutdown(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        let mut state = self.shared.lock();
        state.shutdown = true;
        self.shared.available.notify_all();
        while state.workers > 0 {
            let now = Instant::now();
            if now >= deadline {
                let dropped = state.queue.len();
                state.queue.clear();
                warn!(
                    target: SERVER_TARGET,
                    dropped,
                    running = state.active,
                    "worker pool did not drain in time"
                );
                return false;
            }
            state = self
                .shared
                .drained
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        debug!(target: SERVER_TARGET, "worker pool drained");
        true
    }
}

fn run_worker(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if let Some(job) = state.queue.pop_front() {
            state.active += 1;
            drop(state);
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!(target: SERVER_TARGET, "pool job panicked");
            }
            state = shared.lock();
            state.active -= 1;
            continue;
        }
        if state.shutdown {
            break;
        }
        state.idle += 1;
        let (guard, wait) = shared
            .available
            .wait_timeout(state, shared.keep_alive)
            .unwrap_or_else(PoisonError::into_inner);
        state = guard;
        state.idle -= 1;
        if wait.timed_out() && state.queue.is_empty() {
            break;
        }
    }
    state.workers -= 1;
    if state.workers == 0 {
        shared.drained.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn submitted_jobs_run() {
        let pool = WorkerPool::new(4);
        let (sender, receiver) = mpsc::channel();
        for value in 0..8 {
            let out = sender.clone();
            pool.submit(move || out.send(value).expect("send"))
                .expect("submit");
        }
        let mut seen: Vec<i32> = (0..8)
            .map(|_| receiver.recv_timeout(Duration::from_secs(5)).expect("job ran"))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
        assert!(pool.size() <= 4);
        assert!(pool.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn shutdown_drains_queued_jobs_within_the_grace_period() {
        let pool = WorkerPool::new(1);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let counter = Arc::clone(&ran);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("submit");
        }
        assert!(pool.shutdown(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn shutdown_gives_up_after_the_grace_period() {
        let pool = WorkerPool::new(1);
        let (release, blocked) = mpsc::channel::<()>();
        pool.submit(move || {
            drop(blocked.recv());
        })
        .expect("submit");
        pool.submit(|| {}).expect("queue");

        assert!(!pool.shutdown(Duration::from_millis(50)));
        release.send(()).expect("release");
    }

    #[test]
    fn panicking_jobs_do_not_kill_the_pool() {
        let pool = WorkerPool::new(1);
        pool.submit(|| panic!("boom")).expect("submit");
        let (sender, receiver) = mpsc::channel();
        pool.submit(move || sender.send(()).expect("send"))
            .expect("submit");
        receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("pool survived");
    }

    #[test]
    fn closed_pool_refuses_work() {
        let pool = WorkerPool::new(1);
        assert!(pool.shutdown(Duration::from_secs(1)));
        assert!(matches!(pool.submit(|| {}), Err(PoolError::ShutDown)));
    }

    #[test]
    fn idle_workers_retire() {
        let pool = WorkerPool::with_keep_alive(2, Duration::from_millis(20));
        let (sender, receiver) = mpsc::channel();
        pool.submit(move || sender.send(()).expect("send"))
            .expect("submit");
        receiver.recv_timeout(Duration::from_secs(5)).expect("ran");
        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.size() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.size(), 0);
    }
}

//! Single-thread scheduler for delayed and periodic jobs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use super::SERVER_TARGET;
use super::pool::PoolError;

type ScheduledJob = Arc<dyn Fn() + Send + Sync + 'static>;

struct Entry {
    due: Instant,
    period: Option<Duration>,
    job: ScheduledJob,
}

#[derive(Default)]
struct SchedulerState {
    entries: Vec<Entry>,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SchedulerState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs jobs on one background thread, started with the first job.
#[derive(Default)]
pub(crate) struct Scheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Runs `job` once after `delay`.
    pub(crate) fn schedule_once(
        &self,
        delay: Duration,
        job: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), PoolError> {
        self.schedule(delay, None, Arc::new(job))
    }

    /// Runs `job` after `delay`, then every `period`.
    pub(crate) fn schedule_repeating(
        &self,
        delay: Duration,
        period: Duration,
        job: impl Fn() + Send + Sync + 'static,
    ) -> Result<(), PoolError> {
        self.schedule(delay, Some(period), Arc::new(job))
    }

    fn schedule(
        &self,
        delay: Duration,
        period: Option<Duration>,
        job: ScheduledJob,
    ) -> Result<(), PoolError> {
        {
            let mut state = self.shared.lock();
            if state.shutdown {
                return Err(PoolError::ShutDown);
            }
            state.entries.push(Entry {
                due: Instant::now() + delay,
                period: period.filter(|every| !every.is_zero()),
                job,
            });
        }
        self.shared.wake.notify_all();
        self.ensure_thread()
    }

    fn ensure_thread(&self) -> Result<(), PoolError> {
        let mut thread_slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread_slot.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("analysisd-scheduler".to_owned())
            .spawn(move || run_scheduler(&shared))
            .map_err(|source| PoolError::Spawn { source })?;
        *thread_slot = Some(handle);
        Ok(())
    }

    /// Cancels pending jobs and waits for a running one to finish.
    ///
    /// Safe to call from a scheduled job; the thread is then left to exit on
    /// its own.
    pub(crate) fn shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = handle else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            error!(target: SERVER_TARGET, "scheduler thread panicked");
        }
    }
}

fn run_scheduler(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            break;
        }
        let now = Instant::now();
        let next = state
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.due)
            .map(|(position, entry)| (position, entry.due));
        match next {
            None => {
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some((_, due)) if due > now => {
                state = shared
                    .wake
                    .wait_timeout(state, due - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            Some((position, _)) => {
                let entry = state.entries.swap_remove(position);
                let job = Arc::clone(&entry.job);
                if let Some(period) = entry.period {
                    state.entries.push(Entry {
                        due: now + period,
                        ..entry
                    });
                }
                drop(state);
                if panic::catch_unwind(AssertUnwindSafe(|| job())).is_err() {
                    error!(target: SERVER_TARGET, "scheduled job panicked");
                }
                state = shared.lock();
            }
        }
    }
    debug!(target: SERVER_TARGET, "scheduler stopped");
}

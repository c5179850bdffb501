//! A fixed-size fork-join worker pool.
//!
//! The trainer uses the pool in one idiom only: submit a batch of mutually
//! independent tasks, one per event, then block until every task has run.
//! Workers are spawned once at construction and live until the pool drops.
//!
//! Tasks must not share mutable state. A task that never returns will wedge
//! [`WorkerPool::wait_idle`] forever; the pool makes no attempt to police
//! that.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 1024;

/// One unit of work for the pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Turns a user-supplied worker count into an effective one: taken as-is
/// when within bounds, otherwise (canonically, zero for "auto") half the
/// available hardware threads, clamped.
#[must_use]
pub fn resolve_worker_count(requested: usize) -> usize {
    if (MIN_WORKERS..=MAX_WORKERS).contains(&requested) {
        return requested;
    }
    let half = thread::available_parallelism().map_or(1, |threads| threads.get() / 2);
    half.clamp(MIN_WORKERS, MAX_WORKERS)
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Task>,
    /// Tasks queued plus tasks currently running.
    outstanding: usize,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    /// Workers sleep here while the queue is empty.
    workers_cv: Condvar,
    /// Clients sleep here while tasks are outstanding.
    clients_cv: Condvar,
}

/// Fixed set of worker threads fed from one task queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns exactly `worker_count` workers (see [`resolve_worker_count`]).
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        assert!(
            (MIN_WORKERS..=MAX_WORKERS).contains(&worker_count),
            "worker count {worker_count} out of range"
        );
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::default()),
            workers_cv: Condvar::new(),
            clients_cv: Condvar::new(),
        });
        let workers = (0..worker_count)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(&shared))
            })
            .collect();
        Self { shared, workers }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a batch of tasks and wakes the workers. Returns immediately;
    /// pair with [`wait_idle`](Self::wait_idle) for fork-join use.
    pub fn submit_batch<I>(&self, tasks: I)
    where
        I: IntoIterator<Item = Task>,
    {
        let queued = {
            let mut state = self.shared.state.lock().unwrap();
            let before = state.queue.len();
            state.queue.extend(tasks);
            let queued = state.queue.len() - before;
            state.outstanding += queued;
            queued
        };
        if queued > 1 {
            self.shared.workers_cv.notify_all();
        } else if queued == 1 {
            self.shared.workers_cv.notify_one();
        }
    }

    /// Blocks until every submitted task has finished running.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.outstanding > 0 {
            state = self.shared.clients_cv.wait(state).unwrap();
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) but gives up after `timeout`.
    /// Returns whether the pool went idle in time.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        while state.outstanding > 0 {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero())
            else {
                return false;
            };
            let (next, _timed_out) = self
                .shared
                .clients_cv
                .wait_timeout(state, remaining)
                .unwrap();
            state = next;
        }
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutting_down = true;
        }
        self.shared.workers_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutting_down {
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                state = shared.workers_cv.wait(state).unwrap();
            }
        };

        // Run outside the lock so other workers can pick up tasks.
        task();

        let mut state = shared.state.lock().unwrap();
        state.outstanding -= 1;
        if state.outstanding == 0 {
            shared.clients_cv.notify_all();
        }
    }
}

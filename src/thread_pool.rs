use log::{debug, error};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::utils::lock;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct State {
    queue: VecDeque<Job>,
    active: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    job_available: Condvar,
    drained: Condvar,
}

/// Fixed-size pool of workers executing a FIFO queue of jobs.
///
/// `wait` is a drain barrier: it returns once the queue is empty and no job is
/// running, whatever the number of jobs pushed before. Dropping the pool lets
/// running jobs finish, then joins every worker.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `size` workers (at least one)
    pub fn new(size: usize) -> ThreadPool {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(State { queue: VecDeque::new(), active: 0, shutdown: false }),
            job_available: Condvar::new(),
            drained: Condvar::new(),
        });

        let workers = (0..size)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("phaseopt-worker-{}", worker_id))
                    .spawn(move || worker_loop(shared, worker_id))
                    .unwrap_or_else(|e| {
                        error!("Cannot spawn pool worker {}: {}", worker_id, e);
                        std::process::abort()
                    })
            })
            .collect();

        debug!("Thread pool started with {} workers", size);
        ThreadPool { shared, workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues a job and wakes one idle worker
    pub fn push_job<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.shared.state).queue.push_back(Box::new(job));
        self.shared.job_available.notify_one();
    }

    /// Blocks until every queued job has been executed.
    ///
    /// No timeout: each finishing job signals `drained`, and evaluation jobs poll the
    /// running flag per individual, so an abort empties the queue promptly.
    pub fn wait(&self) {
        let mut state = lock(&self.shared.state);
        while !state.queue.is_empty() || state.active > 0 {
            state = self.shared.drained.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// True while a job is queued or running
    pub fn is_busy(&self) -> bool {
        let state = lock(&self.shared.state);
        !state.queue.is_empty() || state.active > 0
    }
}

fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    loop {
        let job = {
            let mut state = lock(&shared.state);
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.active += 1;
                    break job;
                }
                if state.shutdown {
                    return;
                }
                state = shared.job_available.wait(state).unwrap_or_else(|e| e.into_inner());
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("A job panicked on pool worker {}, aborting", worker_id);
            std::process::abort();
        }

        let mut state = lock(&shared.state);
        state.active -= 1;
        if state.active == 0 && state.queue.is_empty() {
            shared.drained.notify_all();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        lock(&self.shared.state).shutdown = true;
        self.shared.job_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("Thread pool stopped");
    }
}

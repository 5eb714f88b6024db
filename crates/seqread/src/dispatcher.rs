// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::pin::Pin;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::task::{Context, Poll};
use core::time::Duration;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Arc, OnceLock};

use async_task::{Runnable, Task};
use tracing::{Level, event};

const MAX_WORKERS: usize = 4;
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);
const WORKER_NAME: &str = "seqread-io";

static SHARED: OnceLock<Dispatcher> = OnceLock::new();

type Outcome<T> = std::thread::Result<T>;

/// State shared by every worker of one dispatcher.
///
/// Workers hold the receiving end only, so once the last [`Dispatcher`] handle and the last
/// scheduled job are gone the queue disconnects and the workers exit.
struct Pool {
    jobs: flume::Receiver<Runnable>,
    workers: AtomicUsize,
    queued: AtomicUsize,
}

impl Pool {
    /// Reserves a slot for one more worker if the queue is at least as deep as the pool and
    /// the pool is below its limit.
    fn claim_worker_slot(&self, queued_before: usize) -> Option<usize> {
        let mut workers = self.workers.load(Ordering::Acquire);
        while workers < MAX_WORKERS && queued_before >= workers {
            match self
                .workers
                .compare_exchange_weak(workers, workers + 1, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Some(workers + 1),
                Err(actual) => workers = actual,
            }
        }
        None
    }

    /// Gives up the calling worker's slot unless it is the last one.
    fn try_retire(&self) -> Option<usize> {
        let mut workers = self.workers.load(Ordering::Relaxed);
        while workers > 1 {
            match self
                .workers
                .compare_exchange_weak(workers, workers - 1, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Some(workers - 1),
                Err(actual) => workers = actual,
            }
        }
        None
    }

    fn work(&self) {
        loop {
            match self.jobs.recv_timeout(IDLE_TIMEOUT) {
                Ok(job) => {
                    let _ = job.run();
                    let _ = self.queued.fetch_sub(1, Ordering::Relaxed);
                }
                Err(flume::RecvTimeoutError::Timeout) => {
                    if let Some(remaining) = self.try_retire() {
                        event!(Level::DEBUG, message = "dispatcher worker retired", workers = remaining);
                        return;
                    }
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    let _ = self.workers.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            }
        }
    }
}

/// Starts a worker for a slot that has already been claimed. If the thread cannot be
/// created the slot is released, and a later submission tries again.
fn start_worker(pool: &Arc<Pool>) {
    let worker_pool = Arc::clone(pool);
    let spawned = std::thread::Builder::new()
        .name(WORKER_NAME.to_owned())
        .spawn(move || worker_pool.work());

    if let Err(e) = spawned {
        let _ = pool.workers.fetch_sub(1, Ordering::AcqRel);
        event!(Level::WARN, message = "failed to start dispatcher worker", error = %e);
    }
}

/// A thread pool that performs device reads for suspend-capable readers.
///
/// Starts with a single worker thread and adds workers, up to four, while submitted
/// operations queue up faster than they complete. Workers idle for ten seconds retire,
/// down to the last one.
#[derive(Clone)]
pub struct Dispatcher {
    submit: flume::Sender<Runnable>,
    pool: Arc<Pool>,
}

impl Dispatcher {
    /// Creates a dispatcher with one worker thread.
    #[must_use]
    pub fn new() -> Self {
        let (submit, jobs) = flume::unbounded();
        let pool = Arc::new(Pool {
            jobs,
            workers: AtomicUsize::new(1),
            queued: AtomicUsize::new(0),
        });
        start_worker(&pool);
        Self { submit, pool }
    }

    /// The process-wide dispatcher used by readers that were not given one explicitly.
    #[must_use]
    pub fn shared() -> &'static Self {
        SHARED.get_or_init(Self::new)
    }

    /// Runs a blocking operation on a worker thread.
    ///
    /// If the closure panics, the panic is re-raised on the awaiting task.
    pub fn dispatch<T: Send + 'static>(&self, f: impl FnOnce() -> T + Send + 'static) -> DispatchFuture<T> {
        DispatchFuture {
            task: self.submit(async move { catch_unwind(AssertUnwindSafe(f)) }),
        }
    }

    /// Runs a blocking operation that reaches into caller-owned memory through raw pointers.
    ///
    /// Dropping the returned future **blocks the current thread** until the closure has
    /// finished or is known never to run, so the memory it points into stays valid even
    /// when the caller abandons the operation.
    pub fn dispatch_scoped<T: Send + 'static>(&self, f: impl FnOnce() -> T + Send + 'static) -> ScopedDispatchFuture<T> {
        // Never sent on. The receiver observes the sender being dropped, which happens when
        // the job finishes and also when it is discarded unrun.
        let (finished, finished_rx) = flume::bounded::<()>(0);

        let task = self.submit(async move {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            drop(finished);
            outcome
        });

        ScopedDispatchFuture {
            task,
            finished: finished_rx,
        }
    }

    fn submit<F>(&self, job: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let submit = self.submit.clone();
        let (runnable, task) = async_task::spawn(job, move |runnable| {
            let _ = submit.send(runnable);
        });

        let queued_before = self.pool.queued.fetch_add(1, Ordering::Relaxed);
        if let Some(workers) = self.pool.claim_worker_slot(queued_before) {
            event!(Level::DEBUG, message = "dispatcher adding worker", workers, queued = queued_before + 1);
            start_worker(&self.pool);
        }

        runnable.schedule();
        task
    }

    #[cfg(test)]
    fn worker_count(&self) -> usize {
        self.pool.workers.load(Ordering::Acquire)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.pool.workers.load(Ordering::Relaxed))
            .field("queued", &self.pool.queued.load(Ordering::Relaxed))
            .finish()
    }
}

fn forward_panic<T>(outcome: Outcome<T>) -> T {
    match outcome {
        Ok(value) => value,
        Err(payload) => resume_unwind(payload),
    }
}

/// Resolves to the return value of a dispatched closure.
pub struct DispatchFuture<T> {
    task: Task<Outcome<T>>,
}

impl<T> Future for DispatchFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        Pin::new(&mut self.get_mut().task).poll(cx).map(forward_panic)
    }
}

impl<T> fmt::Debug for DispatchFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchFuture").finish_non_exhaustive()
    }
}

/// Resolves to the return value of a closure dispatched with
/// [`Dispatcher::dispatch_scoped`].
///
/// On the normal path it completes without blocking. Dropping it early blocks until the
/// closure is done with the caller's memory.
pub struct ScopedDispatchFuture<T> {
    task: Task<Outcome<T>>,
    finished: flume::Receiver<()>,
}

impl<T> Future for ScopedDispatchFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        Pin::new(&mut self.get_mut().task).poll(cx).map(forward_panic)
    }
}

impl<T> fmt::Debug for ScopedDispatchFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedDispatchFuture").finish_non_exhaustive()
    }
}

impl<T> Drop for ScopedDispatchFuture<T> {
    fn drop(&mut self) {
        // Returns once the job's sender is gone. The task is still alive here, so a job
        // that has not started yet will run before that happens.
        let _ = self.finished.recv();
    }
}

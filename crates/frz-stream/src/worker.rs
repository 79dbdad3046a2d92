//! Single-threaded work queue backing the multi-threaded streamer.

use crossbeam_channel::{unbounded, Sender};
use std::thread::{Scope, ScopedJoinHandle};
use tracing::trace;

type Job<'scope> = Box<dyn FnOnce() + Send + 'scope>;

/// A background thread that pulls closures off a FIFO queue and runs them
/// sequentially. The thread is scoped to the enclosing [`std::thread::scope`],
/// so every job has finished by the time the scope exits; dropping the worker
/// closes the queue, letting the thread drain pending jobs and exit.
pub struct Worker<'scope> {
    queue: Option<Sender<Job<'scope>>>,
    handle: Option<ScopedJoinHandle<'scope, ()>>,
}

impl<'scope> Worker<'scope> {
    pub fn new<'env>(scope: &'scope Scope<'scope, 'env>) -> Self {
        let (queue, jobs) = unbounded::<Job<'scope>>();
        let handle = scope.spawn(move || {
            for job in jobs {
                job();
            }
            trace!("worker queue drained, thread exiting");
        });
        Self {
            queue: Some(queue),
            handle: Some(handle),
        }
    }

    /// Enqueue a job. Jobs run in FIFO order.
    pub fn run(&self, job: impl FnOnce() + Send + 'scope) {
        self.queue
            .as_ref()
            .expect("worker queue already closed")
            .send(Box::new(job))
            .expect("worker thread exited early");
    }
}

impl Drop for Worker<'_> {
    fn drop(&mut self) {
        trace!("closing worker queue");
        self.queue.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

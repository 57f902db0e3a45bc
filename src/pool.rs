//! Worker pool and task groups.
//!
//! [`WorkerPool`] is a bounded queue drained by a fixed set of worker
//! threads. Submitting blocks while the queue is full, so a slow pool
//! stalls its producer instead of buffering without limit. [`TaskGroup`]
//! is a join barrier over scoped threads: `wait` returns only after every
//! task in the group has finished.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Scope, ScopedJoinHandle};

use parking_lot::Mutex;
use tracing::debug;

use crate::Result;

/// Capacity of the bounded hand-off queues.
pub const QUEUE_CAPACITY: usize = 100;

/// A bounded job queue served by a fixed number of worker threads.
pub struct WorkerPool<T: Send + 'static> {
    sender: Option<SyncSender<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Start `workers` threads (at least one) that call `handler` for
    /// every submitted job.
    pub fn new<F>(name: &str, workers: usize, capacity: usize, handler: F) -> Result<Self>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = sync_channel::<T>(capacity);
        let receiver: Arc<Mutex<Receiver<T>>> = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&handler);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || loop {
                    // the lock is released as soon as a job is taken
                    let job = receiver.lock().recv();
                    match job {
                        Ok(job) => handler(job),
                        Err(_) => break,
                    }
                })?;
            handles.push(handle);
        }
        debug!(pool = name, workers = handles.len(), "started worker pool");

        Ok(WorkerPool {
            sender: Some(sender),
            workers: handles,
        })
    }

    /// Queue a job, blocking while the queue is full.
    ///
    /// Returns `false` if every worker has exited.
    pub fn submit(&self, job: T) -> bool {
        match &self.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        }
    }

    /// Close the queue and wait for the workers to drain it.
    ///
    /// A panic in a worker is propagated to the caller.
    pub fn join(mut self) {
        self.sender.take();
        for handle in std::mem::take(&mut self.workers) {
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Join barrier over a set of scoped tasks.
pub struct TaskGroup<'scope, 'env: 'scope, T: Send + 'scope> {
    scope: &'scope Scope<'scope, 'env>,
    tasks: Vec<(String, ScopedJoinHandle<'scope, T>)>,
}

impl<'scope, 'env: 'scope, T: Send + 'scope> TaskGroup<'scope, 'env, T> {
    pub fn new(scope: &'scope Scope<'scope, 'env>) -> Self {
        TaskGroup {
            scope,
            tasks: Vec::new(),
        }
    }

    /// Start a named task in this group.
    pub fn spawn<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() -> T + Send + 'scope,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn_scoped(self.scope, f)?;
        self.tasks.push((name.to_string(), handle));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Block until every task has finished; results come back in spawn order.
    pub fn wait(self) -> Vec<(String, T)> {
        self.tasks
            .into_iter()
            .map(|(name, handle)| match handle.join() {
                Ok(value) => (name, value),
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    }
}

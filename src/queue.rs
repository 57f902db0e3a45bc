//! Transfer queue: many checks and transfers with bounded parallelism.
//!
//! Items are collected with [`TransferQueue::add`]. [`TransferQueue::wait`]
//! negotiates them with the server (batch API in chunks, or one check per
//! item when batching is disabled), hands every item that has work to do
//! to a [`WorkerPool`], and returns once all of them are done. Failures are
//! collected, not raised, so one bad object does not hold up the rest; a
//! fatal error stops new work from starting and is returned after the
//! in-flight items drain.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::batch::{relation, ObjectSpec};
use crate::client::ApiClient;
use crate::pool::{WorkerPool, QUEUE_CAPACITY};
use crate::transfer::Transferable;
use crate::{Error, Operation, Result};

/// Objects per batch API request.
pub const BATCH_SIZE: usize = 100;

/// Options for a [`TransferQueue`].
#[derive(Debug, Clone)]
pub struct TransferQueueOptions {
    /// Number of parallel workers.
    pub concurrency: usize,
    /// Only find out which objects the server can act on; move no data.
    pub check_only: bool,
}

impl Default for TransferQueueOptions {
    fn default() -> Self {
        TransferQueueOptions {
            concurrency: crate::config::DEFAULT_CONCURRENT_TRANSFERS,
            check_only: false,
        }
    }
}

/// Outcome of [`TransferQueue::wait`].
#[derive(Debug, Default)]
pub struct TransferSummary {
    /// Items that were checked (check-only) or transferred successfully.
    pub completed: usize,
    /// Items the server had no action for.
    pub skipped: usize,
    /// Bytes moved by completed transfers.
    pub bytes: u64,
    /// Per-item failures, in completion order.
    pub errors: Vec<Error>,
}

impl TransferSummary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// State shared between the queue and its workers.
struct Shared {
    client: ApiClient,
    operation: Operation,
    check_only: bool,
    watchers: Vec<SyncSender<String>>,
    summary: Mutex<TransferSummary>,
}

impl Shared {
    fn has_fatal(&self) -> bool {
        self.summary.lock().errors.iter().any(Error::is_fatal)
    }

    fn fail(&self, oid: &str, err: Error) {
        warn!(oid, error = %err, "transfer failed");
        self.summary.lock().errors.push(err);
    }

    fn skip(&self, oid: &str) {
        debug!(oid, "nothing to transfer");
        self.summary.lock().skipped += 1;
    }

    fn complete(&self, oid: &str, size: u64) {
        {
            let mut summary = self.summary.lock();
            summary.completed += 1;
            if !self.check_only {
                summary.bytes += size;
            }
        }
        for watcher in &self.watchers {
            // a dropped receiver only means nobody is listening any more
            let _ = watcher.send(oid.to_string());
        }
    }

    fn relation(&self) -> &'static str {
        match self.operation {
            Operation::Download => relation::DOWNLOAD,
            Operation::Upload => relation::UPLOAD,
        }
    }

    /// Worker body: check if needed, then transfer.
    fn process(&self, mut item: Box<dyn Transferable>) {
        if self.has_fatal() {
            return;
        }

        if item.object().is_none() {
            match item.check(&self.client) {
                Ok(Some(object)) => item.set_object(object),
                Ok(None) => return self.skip(item.oid()),
                Err(e) => return self.fail(item.oid(), e),
            }
        }

        let has_rel = item.object().is_some_and(|o| o.has_rel(self.relation()));
        if !has_rel {
            return self.skip(item.oid());
        }

        if self.check_only {
            return self.complete(item.oid(), item.size());
        }

        debug!(oid = item.oid(), name = item.name(), "transferring");
        match item.transfer(&self.client, None) {
            Ok(()) => self.complete(item.oid(), item.size()),
            Err(e) => self.fail(item.oid(), e),
        }
    }
}

/// Runs checks and transfers for a set of objects.
pub struct TransferQueue {
    client: ApiClient,
    operation: Operation,
    options: TransferQueueOptions,
    items: Vec<Box<dyn Transferable>>,
    watchers: Vec<SyncSender<String>>,
}

impl TransferQueue {
    pub fn new(client: ApiClient, operation: Operation, options: TransferQueueOptions) -> Self {
        TransferQueue {
            client,
            operation,
            options,
            items: Vec::new(),
            watchers: Vec::new(),
        }
    }

    /// A check-only download queue: reports which objects the remote has.
    pub fn download_check(client: ApiClient, concurrency: usize) -> Self {
        TransferQueue::new(
            client,
            Operation::Download,
            TransferQueueOptions {
                concurrency,
                check_only: true,
            },
        )
    }

    /// Queue one item. Items whose operation differs from the queue's are
    /// rejected.
    pub fn add(&mut self, item: Box<dyn Transferable>) -> Result<()> {
        if item.operation() != self.operation {
            return Err(Error::Config(format!(
                "cannot add a {} item to a {} queue",
                item.operation(),
                self.operation
            )));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Receive the OID of every item that completes.
    ///
    /// The receiver ends once [`TransferQueue::wait`] returns. It must be
    /// drained on another thread while `wait` runs: the channel is bounded
    /// and workers block when it is full.
    pub fn watch(&mut self) -> Receiver<String> {
        let (tx, rx) = sync_channel(QUEUE_CAPACITY);
        self.watchers.push(tx);
        rx
    }

    /// Process every queued item and return what happened.
    ///
    /// Returns `Err` only for a fatal error; everything else is reported in
    /// [`TransferSummary::errors`].
    pub fn wait(self) -> Result<TransferSummary> {
        let TransferQueue {
            client,
            operation,
            options,
            items,
            watchers,
        } = self;

        let total = items.len();
        let use_batch = client.config().batch_transfer();
        info!(%operation, total, check_only = options.check_only, batch = use_batch, "transfer queue starting");

        let shared = Arc::new(Shared {
            client,
            operation,
            check_only: options.check_only,
            watchers,
            summary: Mutex::new(TransferSummary::default()),
        });

        let worker_state = Arc::clone(&shared);
        let pool = WorkerPool::new("lfs-transfer", options.concurrency, QUEUE_CAPACITY, move |item: Box<dyn Transferable>| {
            worker_state.process(item)
        })?;

        if use_batch {
            submit_batched(&shared, &pool, items);
        } else {
            for item in items {
                if shared.has_fatal() {
                    break;
                }
                pool.submit(item);
            }
        }

        pool.join();

        // the pool held the other reference; dropping ours closes the watchers
        let shared = match Arc::try_unwrap(shared) {
            Ok(shared) => shared,
            Err(_) => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "transfer workers still running",
                )))
            }
        };
        let mut summary = shared.summary.into_inner();
        drop(shared.watchers);

        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "transfer queue finished"
        );

        if let Some(pos) = summary.errors.iter().position(Error::is_fatal) {
            return Err(summary.errors.swap_remove(pos));
        }
        Ok(summary)
    }
}

/// Negotiate items in chunks and submit those the server has actions for.
fn submit_batched(
    shared: &Shared,
    pool: &WorkerPool<Box<dyn Transferable>>,
    items: Vec<Box<dyn Transferable>>,
) {
    let mut items = items.into_iter().peekable();

    while items.peek().is_some() {
        if shared.has_fatal() {
            return;
        }

        let mut chunk: Vec<Box<dyn Transferable>> = items.by_ref().take(BATCH_SIZE).collect();
        let specs: Vec<ObjectSpec> = chunk
            .iter()
            .map(|item| ObjectSpec::new(item.oid(), item.size()))
            .collect();

        let objects = match shared.client.batch(&specs, shared.operation) {
            Ok(objects) => objects,
            Err(e) => {
                warn!(count = chunk.len(), error = %e, "batch request failed");
                shared.summary.lock().errors.push(e);
                continue;
            }
        };

        for object in objects {
            let Some(pos) = chunk.iter().position(|item| item.oid() == object.oid) else {
                debug!(oid = %object.oid, "server returned an object that was not requested");
                continue;
            };
            let mut item = chunk.swap_remove(pos);

            if let Some(err) = &object.error {
                shared.fail(
                    item.oid(),
                    Error::HttpStatus {
                        code: err.code,
                        message: format!("{} ({}): {}", item.name(), item.oid(), err.message),
                    },
                );
                continue;
            }

            if !object.has_rel(shared.relation()) {
                shared.skip(item.oid());
                continue;
            }

            item.set_object(object);
            pool.submit(item);
        }

        // anything the server left out of its response has nothing to do
        for item in chunk {
            shared.skip(item.oid());
        }
    }
}

//! LFS-aware repository wrapper.
//!
//! Ties a [`Config`], the local object store, an API client and the git
//! collaborators together and exposes the operations a command layer runs.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::checkout::{self, passes_filter, CheckoutReport};
use crate::clean;
use crate::git::{GitScanner, WorkingCopy, WrappedPointer};
use crate::progress::CopyCallback;
use crate::prune::{PruneOptions, PruneReport, Pruner};
use crate::queue::{TransferQueue, TransferQueueOptions, TransferSummary};
use crate::store::LocalStore;
use crate::transfer::{Downloadable, Uploadable};
use crate::{ApiClient, Config, Operation, Pointer, Result};

/// LFS-aware repository wrapper.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use lfs_transfer::{Config, LfsRepo, PruneOptions};
/// # fn scanner() -> Arc<dyn lfs_transfer::GitScanner> { unimplemented!() }
/// # fn working_copy() -> Arc<dyn lfs_transfer::WorkingCopy> { unimplemented!() }
///
/// let config = Arc::new(Config::default().with_remote("origin", "https://git.example.com/repo.git"));
/// let repo = LfsRepo::new(".git", config, "origin", scanner(), working_copy());
///
/// let report = repo.prune(&PruneOptions { dry_run: true, ..Default::default() }).unwrap();
/// for line in report.summary_lines() {
///     println!("{}", line);
/// }
/// ```
pub struct LfsRepo {
    config: Arc<Config>,
    store: LocalStore,
    client: ApiClient,
    scanner: Arc<dyn GitScanner>,
    working_copy: Arc<dyn WorkingCopy>,
}

impl LfsRepo {
    /// Open the LFS side of the repository whose git directory is `git_dir`,
    /// talking to `remote`.
    pub fn new<P: AsRef<Path>>(
        git_dir: P,
        config: Arc<Config>,
        remote: &str,
        scanner: Arc<dyn GitScanner>,
        working_copy: Arc<dyn WorkingCopy>,
    ) -> Self {
        LfsRepo {
            client: ApiClient::new(Arc::clone(&config), remote),
            store: LocalStore::for_repo(git_dir),
            config,
            scanner,
            working_copy,
        }
    }

    /// Use a preconfigured client, e.g. one with a custom credential helper.
    pub fn with_client(mut self, client: ApiClient) -> Self {
        self.client = client;
        self
    }

    pub fn with_store(mut self, store: LocalStore) -> Self {
        self.store = store;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Clean `reader` into the store and return its pointer.
    pub fn clean<R: Read>(
        &self,
        reader: R,
        file_name: &str,
        file_size: u64,
        callback: Option<Box<CopyCallback<'_>>>,
    ) -> Result<Pointer> {
        let extensions = self.config.sorted_extensions()?;
        let asset = clean::clean(&self.store, &extensions, reader, file_name, file_size, callback)?;
        asset.commit(&self.store)
    }

    /// Prune the local store.
    ///
    /// Verification runs against `lfs.pruneremotetocheck`. Delete failures
    /// come back as [`Error::DeleteFailed`](crate::Error::DeleteFailed) after
    /// every other object has been deleted.
    pub fn prune(&self, options: &PruneOptions) -> Result<PruneReport> {
        let client = self
            .client
            .for_remote(&self.config.fetch_prune().prune_remote_name);
        let report = Pruner::new(&self.store, self.scanner.as_ref(), &client, &self.config).run(options)?;
        for line in report.summary_lines() {
            info!("{}", line);
        }
        report.into_result()
    }

    /// Write local content for pointers at the current ref.
    pub fn checkout(&self, include: &[String], exclude: &[String]) -> Result<CheckoutReport> {
        checkout::checkout(
            self.scanner.as_ref(),
            self.working_copy.as_ref(),
            &self.store,
            include,
            exclude,
        )
    }

    /// Upload the content of `pointers` to the remote.
    pub fn push(&self, pointers: &[WrappedPointer]) -> Result<TransferSummary> {
        let mut queue = TransferQueue::new(self.client.clone(), Operation::Upload, self.queue_options());
        let mut seen = HashSet::new();
        for wp in pointers {
            if !seen.insert(wp.oid()) {
                continue;
            }
            queue.add(Box::new(Uploadable::new(&wp.oid(), &wp.name, &self.store)?))?;
        }
        queue.wait()
    }

    /// Download objects for `pointers` that are not already in the store.
    ///
    /// Paths are filtered by `lfs.fetchinclude` and `lfs.fetchexclude`.
    pub fn fetch(&self, pointers: &[WrappedPointer]) -> Result<TransferSummary> {
        let include = self.config.fetch_include_paths();
        let exclude = self.config.fetch_exclude_paths();

        let mut queue = TransferQueue::new(self.client.clone(), Operation::Download, self.queue_options());
        let mut seen = HashSet::new();
        for wp in pointers {
            if !passes_filter(&wp.name, include, exclude) {
                debug!(path = %wp.name, "excluded from fetch");
                continue;
            }
            if !seen.insert(wp.oid()) || self.store.contains_valid(wp.pointer.oid(), wp.pointer.size()) {
                continue;
            }
            queue.add(Box::new(Downloadable::new(&wp.pointer, &wp.name, self.store.clone())))?;
        }
        queue.wait()
    }

    fn queue_options(&self) -> TransferQueueOptions {
        TransferQueueOptions {
            concurrency: self.config.concurrent_transfers(),
            check_only: false,
        }
    }
}

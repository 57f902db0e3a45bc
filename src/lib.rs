//! # lfs-transfer
//!
//! Git LFS object transfer and local store maintenance.
//!
//! This crate provides:
//! - LFS pointer parsing and generation, and the clean pipeline that turns
//!   content into a pointer plus a stored object
//! - An API client for the batch and legacy per-object endpoints, with
//!   redirects, credential helpers and SSH-based discovery
//! - A transfer queue that checks, uploads and downloads objects in parallel
//! - Prune, which deletes local objects no retention source still needs,
//!   optionally after confirming the remote has them
//!
//! Git plumbing and working-tree writes are supplied by the caller through
//! [`GitScanner`] and [`WorkingCopy`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lfs_transfer::{ApiClient, Config, DownloadCheckable, Pointer, TransferQueue};
//!
//! // Generate a pointer for content
//! let content = b"Hello, this is a large file";
//! let pointer = Pointer::from_content(content);
//! println!("OID: {}", pointer.oid());
//! println!("Size: {}", pointer.size());
//!
//! // Ask the remote whether it has the object
//! let config = Arc::new(Config::default().with_remote("origin", "https://github.com/owner/repo.git"));
//! let client = ApiClient::new(config, "origin");
//! let mut queue = TransferQueue::download_check(client, 3);
//! queue.add(Box::new(DownloadCheckable::from_pointer(&pointer, "large.bin"))).unwrap();
//! let summary = queue.wait().unwrap();
//! println!("remote has {} of 1", summary.completed);
//! ```

mod batch;
mod checkout;
mod clean;
mod client;
mod config;
mod credentials;
mod endpoint;
mod error;
mod git;
mod oid;
mod pointer;
mod pool;
mod progress;
mod prune;
mod queue;
mod repo;
mod ssh;
mod store;
mod transfer;

pub use batch::{relation, BatchRequest, BatchResponse, ClientError, LinkRelation, ObjectError, ObjectResource, ObjectSpec, Operation};
pub use checkout::{checkout, passes_filter, CheckoutReport};
pub use clean::{clean, CleanedAsset, ExtensionStage};
pub use client::{default_error, ApiClient, Body, HttpRequest, ReadSeek};
pub use config::{AccessMode, Config, Extension, FetchPruneConfig};
pub use credentials::{CredentialHelper, Credentials, GitCredentialHelper};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use git::{GitRef, GitScanner, RefKind, WorkingCopy, WrappedPointer};
pub use oid::{Oid, OidHasher};
pub use pointer::{Pointer, PointerExtension};
pub use pool::{TaskGroup, WorkerPool, QUEUE_CAPACITY};
pub use progress::{copy_with_callback, humanize_bytes, CallbackReader, CopyCallback};
pub use prune::{check_verified, delete_objects, partition, PruneOptions, PruneReport, Pruner};
pub use queue::{TransferQueue, TransferQueueOptions, TransferSummary, BATCH_SIZE};
pub use repo::LfsRepo;
pub use ssh::{GitLfsAuthenticate, NoSsh, SshAuthResponse, SshAuthenticator};
pub use store::{LocalObject, LocalStore, ObjectWriter};
pub use transfer::{DownloadCheckable, Downloadable, Transferable, Uploadable};

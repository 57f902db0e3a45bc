//! Units of work for the transfer queue.
//!
//! A [`Transferable`] knows how to ask the server about one object
//! (`check`) and how to move its content (`transfer`). The queue either
//! fills in the object resource from a batch response or calls `check`
//! itself when the batch API is disabled.

use std::io;
use std::path::PathBuf;

use tracing::debug;

use crate::batch::ObjectResource;
use crate::client::ApiClient;
use crate::progress::{copy_with_callback, CopyCallback};
use crate::store::LocalStore;
use crate::{Oid, Operation, Pointer, Result};

/// One object moving through a [`TransferQueue`](crate::TransferQueue).
pub trait Transferable: Send {
    fn oid(&self) -> &str;

    fn size(&self) -> u64;

    /// Display name, usually the working-tree path.
    fn name(&self) -> &str;

    /// Which API operation this item needs.
    fn operation(&self) -> Operation;

    /// Ask the server about this object through the per-object API.
    ///
    /// `None` means there is nothing to do.
    fn check(&self, client: &ApiClient) -> Result<Option<ObjectResource>>;

    /// Move the content. Only called once [`Transferable::object`] carries
    /// the relation for [`Transferable::operation`].
    fn transfer(&self, client: &ApiClient, callback: Option<Box<CopyCallback<'_>>>) -> Result<()>;

    fn object(&self) -> Option<&ObjectResource>;

    fn set_object(&mut self, object: ObjectResource);
}

/// Checks that the remote has an object, without downloading it.
#[derive(Debug, Clone)]
pub struct DownloadCheckable {
    oid: String,
    size: u64,
    name: String,
    object: Option<ObjectResource>,
}

impl DownloadCheckable {
    pub fn new(oid: &str, size: u64, name: &str) -> Self {
        DownloadCheckable {
            oid: oid.to_string(),
            size,
            name: name.to_string(),
            object: None,
        }
    }

    pub fn from_pointer(pointer: &Pointer, name: &str) -> Self {
        DownloadCheckable::new(&pointer.oid().to_hex(), pointer.size(), name)
    }
}

impl Transferable for DownloadCheckable {
    fn oid(&self) -> &str {
        &self.oid
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn operation(&self) -> Operation {
        Operation::Download
    }

    fn check(&self, client: &ApiClient) -> Result<Option<ObjectResource>> {
        client.download_check(&self.oid).map(Some)
    }

    fn transfer(&self, _: &ApiClient, _: Option<Box<CopyCallback<'_>>>) -> Result<()> {
        Ok(())
    }

    fn object(&self) -> Option<&ObjectResource> {
        self.object.as_ref()
    }

    fn set_object(&mut self, object: ObjectResource) {
        self.object = Some(object);
    }
}

/// Downloads an object into the local store.
#[derive(Debug, Clone)]
pub struct Downloadable {
    check: DownloadCheckable,
    store: LocalStore,
}

impl Downloadable {
    pub fn new(pointer: &Pointer, name: &str, store: LocalStore) -> Self {
        Downloadable {
            check: DownloadCheckable::from_pointer(pointer, name),
            store,
        }
    }
}

impl Transferable for Downloadable {
    fn oid(&self) -> &str {
        self.check.oid()
    }

    fn size(&self) -> u64 {
        self.check.size()
    }

    fn name(&self) -> &str {
        self.check.name()
    }

    fn operation(&self) -> Operation {
        Operation::Download
    }

    fn check(&self, client: &ApiClient) -> Result<Option<ObjectResource>> {
        self.check.check(client)
    }

    fn transfer(&self, client: &ApiClient, callback: Option<Box<CopyCallback<'_>>>) -> Result<()> {
        let object = self
            .object()
            .ok_or_else(|| crate::Error::RelationMissing(crate::batch::relation::DOWNLOAD.into()))?;
        let oid = Oid::from_hex(self.oid())?;

        let (body, length) = client.download_object(object)?;
        let total = length.unwrap_or(self.size());
        let mut writer = self.store.writer(&oid, self.size())?;
        copy_with_callback(&mut writer, body, total, callback)?;
        let path = writer.finish(&self.store)?;
        debug!(oid = %oid, path = %path.display(), "downloaded");
        Ok(())
    }

    fn object(&self) -> Option<&ObjectResource> {
        self.check.object()
    }

    fn set_object(&mut self, object: ObjectResource) {
        self.check.set_object(object);
    }
}

/// Uploads an object from the local store.
#[derive(Debug, Clone)]
pub struct Uploadable {
    oid: String,
    size: u64,
    name: String,
    path: PathBuf,
    object: Option<ObjectResource>,
}

impl Uploadable {
    /// Fails if the object is not in the local store.
    pub fn new(oid: &str, name: &str, store: &LocalStore) -> Result<Self> {
        let path = store.object_path_for(oid)?;
        let meta = std::fs::metadata(&path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("{} ({}) is not in the local store: {}", name, oid, e),
            )
        })?;
        Ok(Uploadable {
            oid: oid.to_string(),
            size: meta.len(),
            name: name.to_string(),
            path,
            object: None,
        })
    }
}

impl Transferable for Uploadable {
    fn oid(&self) -> &str {
        &self.oid
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn operation(&self) -> Operation {
        Operation::Upload
    }

    fn check(&self, client: &ApiClient) -> Result<Option<ObjectResource>> {
        client.upload_check(&self.path)
    }

    fn transfer(&self, client: &ApiClient, callback: Option<Box<CopyCallback<'_>>>) -> Result<()> {
        let object = self
            .object()
            .ok_or_else(|| crate::Error::RelationMissing(crate::batch::relation::UPLOAD.into()))?;
        client.upload_object(object, &self.path, callback)
    }

    fn object(&self) -> Option<&ObjectResource> {
        self.object.as_ref()
    }

    fn set_object(&mut self, object: ObjectResource) {
        self.object = Some(object);
    }
}

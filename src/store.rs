//! Local content store for LFS objects.
//!
//! Objects live in the git-lfs layout `<root>/oid[0:2]/oid[2:4]/oid`.
//! Writes are staged in a sibling temp directory and renamed into place,
//! so a partially written object is never visible under its final name.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::{Error, Oid, OidHasher, Result};

/// A stored object found by [`LocalStore::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalObject {
    pub oid: Oid,
    pub size: u64,
}

/// Content store rooted at `.git/lfs/objects`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    tmp: PathBuf,
}

impl LocalStore {
    /// Create a store with explicit object and temp directories.
    ///
    /// The two should be on the same filesystem so staging can rename.
    pub fn new<P: AsRef<Path>, T: AsRef<Path>>(root: P, tmp: T) -> Self {
        LocalStore {
            root: root.as_ref().to_path_buf(),
            tmp: tmp.as_ref().to_path_buf(),
        }
    }

    /// Store for a repository: `<git_dir>/lfs/objects` and `<git_dir>/lfs/tmp`.
    pub fn for_repo<P: AsRef<Path>>(git_dir: P) -> Self {
        let lfs = git_dir.as_ref().join("lfs");
        LocalStore::new(lfs.join("objects"), lfs.join("tmp"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp
    }

    /// Get the path where an object with the given OID would be stored.
    pub fn object_path(&self, oid: &Oid) -> PathBuf {
        let hex = oid.to_hex();
        self.root.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }

    /// Path for an OID given as text; needs at least 4 hex characters.
    pub fn object_path_for(&self, oid: &str) -> Result<PathBuf> {
        if oid.len() < 4 || !oid.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidOid(oid.to_string()));
        }
        Ok(self.root.join(&oid[0..2]).join(&oid[2..4]).join(oid))
    }

    pub fn contains(&self, oid: &Oid) -> bool {
        self.object_path(oid).is_file()
    }

    /// Whether the object exists with the expected size.
    pub fn contains_valid(&self, oid: &Oid, size: u64) -> bool {
        fs::metadata(self.object_path(oid))
            .map(|meta| meta.is_file() && meta.len() == size)
            .unwrap_or(false)
    }

    /// A fresh temp file in the staging directory, removed on drop.
    pub fn temp_file(&self) -> Result<NamedTempFile> {
        fs::create_dir_all(&self.tmp)?;
        Ok(NamedTempFile::new_in(&self.tmp)?)
    }

    /// Move a staged file into place as `oid`.
    pub fn commit(&self, staged: NamedTempFile, oid: &Oid) -> Result<PathBuf> {
        let path = self.object_path(oid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        staged.as_file().sync_all()?;
        staged.persist(&path).map_err(|e| Error::Io(e.error))?;
        debug!(%oid, path = %path.display(), "stored object");
        Ok(path)
    }

    /// Create a writer that verifies content against `oid` and `size`
    /// before storing it.
    pub fn writer(&self, oid: &Oid, size: u64) -> Result<ObjectWriter> {
        Ok(ObjectWriter {
            file: self.temp_file()?,
            hasher: OidHasher::new(),
            written: 0,
            expected: oid.clone(),
            size,
        })
    }

    /// Remove an object. Returns `false` if it was not present.
    pub fn remove(&self, oid: &Oid) -> Result<bool> {
        match fs::remove_file(self.object_path(oid)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Enumerate every stored object.
    ///
    /// Any filesystem error aborts the scan: a partial listing cannot be
    /// used to decide what exists. Files that are not named like an object
    /// or sit outside the two-level fan-out are skipped.
    pub fn scan(&self) -> Result<Vec<LocalObject>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(oid) = entry
                .file_name()
                .to_str()
                .and_then(|name| Oid::from_hex(name).ok())
            else {
                continue;
            };
            let size = entry.metadata().map_err(|e| Error::Io(e.into()))?.len();
            objects.push(LocalObject { oid, size });
        }
        Ok(objects)
    }
}

/// Writer for streaming content into the store.
///
/// Content is hashed as it is written; [`ObjectWriter::finish`] only moves
/// it into place when it matches the expected OID and size. Dropping an
/// unfinished writer removes the temp file.
pub struct ObjectWriter {
    file: NamedTempFile,
    hasher: OidHasher,
    written: u64,
    expected: Oid,
    size: u64,
}

impl ObjectWriter {
    pub fn finish(self, store: &LocalStore) -> Result<PathBuf> {
        let actual = self.hasher.finish();
        if actual != self.expected {
            return Err(Error::ChecksumMismatch {
                expected: self.expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
        if self.written != self.size {
            return Err(Error::ChecksumMismatch {
                expected: format!("{} ({} bytes)", self.expected, self.size),
                actual: format!("{} bytes", self.written),
            });
        }
        store.commit(self.file, &self.expected)
    }
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

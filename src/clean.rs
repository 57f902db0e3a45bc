//! Clean: turn working-tree content into a pointer and a staged object.
//!
//! The input is copied to a temp file in the store's staging directory
//! while it is hashed. Configured extensions then run in priority order,
//! each reading the previous stage on stdin and writing the next stage on
//! stdout. The last stage's hash and size become the pointer.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::Extension;
use crate::pointer::MAX_POINTER_SIZE;
use crate::progress::{copy_with_callback, CopyCallback};
use crate::store::LocalStore;
use crate::{Error, Oid, OidHasher, Pointer, PointerExtension, Result};

/// One extension run during clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionStage {
    pub name: String,
    pub priority: u32,
    /// Hash of the content the extension consumed.
    pub oid_before: Oid,
    /// Hash of the content the extension produced.
    pub oid_after: Oid,
}

/// Cleaned content waiting to be moved into the store.
///
/// Dropping it without calling [`CleanedAsset::commit`] removes the staged
/// file.
#[derive(Debug)]
pub struct CleanedAsset {
    pointer: Pointer,
    stages: Vec<ExtensionStage>,
    staged: NamedTempFile,
}

impl CleanedAsset {
    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }

    pub fn stages(&self) -> &[ExtensionStage] {
        &self.stages
    }

    /// Path of the staged content.
    pub fn path(&self) -> &Path {
        self.staged.path()
    }

    /// Move the staged content to its place in the store.
    pub fn commit(self, store: &LocalStore) -> Result<Pointer> {
        store.commit(self.staged, self.pointer.oid())?;
        Ok(self.pointer)
    }
}

/// Writes to a file while hashing what was written.
struct HashingWriter<'a> {
    file: &'a mut File,
    hasher: OidHasher,
}

impl Write for HashingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Clean `reader`, the content of `file_name`.
///
/// `extensions` must already be in priority order (see
/// [`Config::sorted_extensions`](crate::Config::sorted_extensions)).
/// Fails with [`Error::AlreadyPointer`] when the content is itself a
/// pointer record.
pub fn clean<R: Read>(
    store: &LocalStore,
    extensions: &[Extension],
    mut reader: R,
    file_name: &str,
    file_size: u64,
    callback: Option<Box<CopyCallback<'_>>>,
) -> Result<CleanedAsset> {
    let mut prefix = Vec::with_capacity(MAX_POINTER_SIZE);
    (&mut reader)
        .take(MAX_POINTER_SIZE as u64)
        .read_to_end(&mut prefix)?;

    if Pointer::is_pointer(&prefix) {
        if let Ok(pointer) = Pointer::parse(&prefix) {
            return Err(Error::AlreadyPointer(Box::new(pointer)));
        }
    }

    let mut staged = store.temp_file()?;
    let mut writer = HashingWriter {
        file: staged.as_file_mut(),
        hasher: OidHasher::new(),
    };
    let size = copy_with_callback(
        &mut writer,
        prefix.as_slice().chain(reader),
        file_size,
        callback,
    )?;
    writer.flush()?;
    let mut oid = writer.hasher.finish();
    let mut final_size = size;
    debug!(file = file_name, %oid, size, "cleaned content");

    let mut stages = Vec::with_capacity(extensions.len());
    for ext in extensions {
        let (next, next_oid, next_size) = run_extension(store, ext, &staged, file_name)?;
        stages.push(ExtensionStage {
            name: ext.name.clone(),
            priority: ext.priority,
            oid_before: oid,
            oid_after: next_oid.clone(),
        });
        // previous stage is removed when `staged` is replaced
        staged = next;
        oid = next_oid;
        final_size = next_size;
    }

    let pointer_exts = stages
        .iter()
        .map(|s| PointerExtension::new(s.name.clone(), s.priority, s.oid_before.clone()))
        .collect();

    Ok(CleanedAsset {
        pointer: Pointer::with_extensions(oid, final_size, pointer_exts),
        stages,
        staged,
    })
}

fn run_extension(
    store: &LocalStore,
    ext: &Extension,
    input: &NamedTempFile,
    file_name: &str,
) -> Result<(NamedTempFile, Oid, u64)> {
    let command = ext.clean.replace("%f", file_name);
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or_else(|| Error::Extension {
        name: ext.name.clone(),
        message: "no clean command configured".into(),
    })?;

    let output = store.temp_file()?;
    debug!(extension = %ext.name, command = %command, "running clean extension");

    let result = Command::new(program)
        .args(parts)
        .stdin(Stdio::from(File::open(input.path())?))
        .stdout(Stdio::from(output.as_file().try_clone()?))
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| Error::Extension {
            name: ext.name.clone(),
            message: e.to_string(),
        })?;

    if !result.status.success() {
        return Err(Error::Extension {
            name: ext.name.clone(),
            message: format!(
                "{}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            ),
        });
    }

    let (oid, size) = Oid::from_reader(File::open(output.path())?)?;
    Ok((output, oid, size))
}

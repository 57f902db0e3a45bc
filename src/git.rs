//! Interfaces to git plumbing.
//!
//! Ref resolution, tree scanning and index updates are done by git itself;
//! this crate only consumes their results through [`GitScanner`] and
//! [`WorkingCopy`].

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::{Pointer, Result};

/// What kind of ref a [`GitRef`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    LocalBranch,
    RemoteBranch,
    LocalTag,
    RemoteTag,
    /// A detached `HEAD`.
    Head,
    Other,
}

impl RefKind {
    /// Classify a full ref name such as `refs/heads/main`.
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("refs/heads/") {
            RefKind::LocalBranch
        } else if name.starts_with("refs/remotes/tags/") {
            RefKind::RemoteTag
        } else if name.starts_with("refs/remotes/") {
            RefKind::RemoteBranch
        } else if name.starts_with("refs/tags/") {
            RefKind::LocalTag
        } else if name == "HEAD" {
            RefKind::Head
        } else {
            RefKind::Other
        }
    }
}

/// A ref and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
    pub name: String,
    pub kind: RefKind,
    /// Commit SHA-1 of the tip.
    pub sha: String,
    /// Commit date of the tip.
    pub commit_date: DateTime<Utc>,
}

impl GitRef {
    pub fn new(name: &str, sha: &str, commit_date: DateTime<Utc>) -> Self {
        GitRef {
            name: name.to_string(),
            kind: RefKind::from_name(name),
            sha: sha.to_string(),
            commit_date,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, RefKind::RemoteBranch | RefKind::RemoteTag)
    }
}

/// A pointer found in git, with the path it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedPointer {
    /// Working-tree path.
    pub name: String,
    /// Blob SHA-1 of the pointer file.
    pub sha1: String,
    pub pointer: Pointer,
}

impl WrappedPointer {
    pub fn new(name: &str, pointer: Pointer) -> Self {
        WrappedPointer {
            name: name.to_string(),
            sha1: String::new(),
            pointer,
        }
    }

    pub fn oid(&self) -> String {
        self.pointer.oid().to_hex()
    }
}

/// Finds pointers in repository history.
///
/// Implementations must be callable from several threads at once: prune
/// runs its retention scans in parallel.
pub trait GitScanner: Send + Sync {
    /// The checked-out ref.
    fn current_ref(&self) -> Result<GitRef>;

    /// Pointers in the tree at `rev`.
    fn scan_tree(&self, rev: &str) -> Result<Vec<WrappedPointer>>;

    /// Pointers that were replaced on `rev` by commits dated after `since`.
    fn scan_previous_versions(&self, rev: &str, since: DateTime<Utc>) -> Result<Vec<WrappedPointer>>;

    /// Refs whose tip is newer than `since`.
    fn recent_refs(&self, since: DateTime<Utc>, include_remote: bool) -> Result<Vec<GitRef>>;

    /// Pointers introduced by commits that no ref of `remote` contains.
    fn scan_unpushed(&self, remote: &str) -> Result<Vec<WrappedPointer>>;

    /// Pointers in the index and working tree.
    fn scan_worktree(&self) -> Result<Vec<WrappedPointer>>;

    /// Pointers reachable from any ref of `remote`.
    fn scan_remote_refs(&self, remote: &str) -> Result<Vec<WrappedPointer>>;
}

/// Writes object content into the working tree.
pub trait WorkingCopy: Send + Sync {
    /// The pointer currently at `path`.
    ///
    /// `Ok(None)` when the file does not exist; [`Error::NotAPointer`] when
    /// it holds anything other than a pointer.
    ///
    /// [`Error::NotAPointer`]: crate::Error::NotAPointer
    fn read_pointer(&self, path: &str) -> Result<Option<Pointer>>;

    /// Replace the pointer file at `path` with the content at `content`.
    fn write_file(&self, path: &str, pointer: &Pointer, content: &Path) -> Result<()>;

    /// Refresh the index entries for `paths` after their content changed.
    fn update_index(&self, paths: &[String]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_kinds() {
        assert_eq!(RefKind::from_name("refs/heads/main"), RefKind::LocalBranch);
        assert_eq!(RefKind::from_name("refs/remotes/origin/main"), RefKind::RemoteBranch);
        assert_eq!(RefKind::from_name("refs/tags/v1"), RefKind::LocalTag);
        assert_eq!(RefKind::from_name("HEAD"), RefKind::Head);
        assert_eq!(RefKind::from_name("refs/notes/x"), RefKind::Other);

        let r = GitRef::new("refs/remotes/origin/dev", "abc", Utc::now());
        assert!(r.is_remote());
    }
}

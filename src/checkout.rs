//! Checkout: put object content into the working copy.
//!
//! Pointers in the tree at the current ref are filtered by include and
//! exclude patterns. A file is only (over)written when it is missing or
//! still holds the same pointer; files with real content, or with a
//! pointer to a different object, are left alone.

use tracing::{debug, info, warn};

use crate::git::{GitScanner, WorkingCopy};
use crate::store::LocalStore;
use crate::{Error, Result};

/// What a checkout did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckoutReport {
    /// Paths whose content was written.
    pub checked_out: Vec<String>,
    /// Paths whose object is not in the local store.
    pub missing: Vec<String>,
    /// Paths left alone because they hold other content.
    pub skipped: Vec<String>,
}

/// Check out every pointer at the current ref that passes the filters.
pub fn checkout(
    scanner: &dyn GitScanner,
    working_copy: &dyn WorkingCopy,
    store: &LocalStore,
    include: &[String],
    exclude: &[String],
) -> Result<CheckoutReport> {
    let head = scanner.current_ref()?;
    let pointers = scanner.scan_tree(&head.sha)?;
    let mut report = CheckoutReport::default();

    for wp in pointers {
        if !passes_filter(&wp.name, include, exclude) {
            continue;
        }

        match working_copy.read_pointer(&wp.name) {
            Ok(None) => {}
            Ok(Some(current)) if current.oid() == wp.pointer.oid() => {}
            Ok(Some(_)) => {
                debug!(path = %wp.name, "pointer for another object, leaving it alone");
                report.skipped.push(wp.name);
                continue;
            }
            Err(e) if e.is_not_a_pointer() || matches!(e, Error::InvalidPointer(_)) => {
                debug!(path = %wp.name, "file has real content, leaving it alone");
                report.skipped.push(wp.name);
                continue;
            }
            Err(e) => return Err(e),
        }

        let oid = wp.pointer.oid();
        if !store.contains_valid(oid, wp.pointer.size()) {
            warn!(path = %wp.name, %oid, "object not in local store, skipping");
            report.missing.push(wp.name);
            continue;
        }

        working_copy.write_file(&wp.name, &wp.pointer, &store.object_path(oid))?;
        report.checked_out.push(wp.name);
    }

    if !report.checked_out.is_empty() {
        working_copy.update_index(&report.checked_out)?;
    }

    info!(
        checked_out = report.checked_out.len(),
        missing = report.missing.len(),
        skipped = report.skipped.len(),
        "checkout finished"
    );
    Ok(report)
}

/// Whether `path` passes include and exclude patterns.
///
/// An empty include list includes everything; any exclude match wins.
pub fn passes_filter(path: &str, include: &[String], exclude: &[String]) -> bool {
    let included = include.is_empty() || include.iter().any(|p| pattern_matches(p, path));
    included && !exclude.iter().any(|p| pattern_matches(p, path))
}

/// Match a gitattributes-style pattern against a repository path.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let pattern = pattern.trim().trim_start_matches("./").trim_end_matches('/');
    if pattern.is_empty() {
        return false;
    }

    if pattern == path {
        return true;
    }

    // a directory matches everything beneath it
    if !pattern.contains('*') && path.starts_with(pattern) && path[pattern.len()..].starts_with('/') {
        return true;
    }

    // *.ext with no directory part matches in any directory
    if let Some(ext) = pattern.strip_prefix('*') {
        if !ext.contains('/') && !ext.contains('*') {
            return path.ends_with(ext);
        }
    }

    if let Some(suffix) = pattern.strip_prefix("**/") {
        return path == suffix
            || path.ends_with(&format!("/{}", suffix))
            || glob_match(suffix, file_name(path));
    }

    if pattern.contains('*') {
        return glob_match(pattern, path);
    }

    false
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Wildcard match where `*` matches any run of characters.
fn glob_match(pattern: &str, path: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == path;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !path.starts_with(first) || path.len() < first.len() + last.len() {
        return false;
    }

    let mut pos = first.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match path[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }

    path[pos..].ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("*.bin", "file.bin"));
        assert!(pattern_matches("*.bin", "path/to/file.bin"));
        assert!(!pattern_matches("*.bin", "file.txt"));

        assert!(pattern_matches("**/data.bin", "data.bin"));
        assert!(pattern_matches("**/data.bin", "deep/nested/data.bin"));

        assert!(pattern_matches("assets/*.png", "assets/logo.png"));
        assert!(!pattern_matches("assets/*.png", "other/logo.png"));

        assert!(pattern_matches("media", "media/video.mp4"));
        assert!(pattern_matches("media/", "media/sub/video.mp4"));
        assert!(!pattern_matches("media", "mediafile.mp4"));

        assert!(pattern_matches("exact.dat", "exact.dat"));
        assert!(!pattern_matches("", "anything"));
    }

    #[test]
    fn test_glob_overlap() {
        // prefix and suffix must not share characters
        assert!(!glob_match("ab*ba", "aba"));
        assert!(glob_match("ab*ba", "abba"));
    }

    #[test]
    fn test_include_exclude() {
        assert!(passes_filter("a/x.bin", &[], &[]));
        assert!(passes_filter("a/x.bin", &s(&["a"]), &[]));
        assert!(!passes_filter("b/x.bin", &s(&["a"]), &[]));
        assert!(!passes_filter("a/x.bin", &s(&["a"]), &s(&["*.bin"])));
        assert!(passes_filter("a/x.psd", &s(&["a"]), &s(&["*.bin"])));
    }
}

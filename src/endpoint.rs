//! LFS API endpoints and their derivation from Git remote URLs.

use url::Url;

use crate::{Error, Result};

/// A resolved LFS API endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    /// Base URL of the LFS API, without a trailing slash.
    pub url: String,
    /// `user@host` for SSH authentication discovery, empty for HTTP remotes.
    pub ssh_user_and_host: String,
    /// Repository path on the SSH host.
    pub ssh_path: String,
}

impl Endpoint {
    /// An endpoint configured directly as an LFS API URL.
    pub fn new(url: &str) -> Self {
        Endpoint {
            url: url.trim().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Derive the LFS endpoint from a Git clone URL.
    ///
    /// HTTP(S) remotes get `.git/info/lfs` appended (keeping an existing
    /// `.git`). SSH remotes (`ssh://user@host/path` or `user@host:path`)
    /// map to `https://host/path/info/lfs` and keep the SSH coordinates
    /// for authentication discovery.
    pub fn from_clone_url(clone_url: &str) -> Result<Self> {
        let clone_url = clone_url.trim();

        if let Ok(url) = Url::parse(clone_url) {
            match url.scheme() {
                "http" | "https" => {
                    let mut url = url;
                    let path = with_git_suffix(url.path().trim_end_matches('/'));
                    url.set_path(&format!("{}/info/lfs", path));
                    return Ok(Endpoint::new(url.as_str()));
                }
                "ssh" => {
                    let host = url
                        .host_str()
                        .ok_or_else(|| Error::InvalidUrl(clone_url.to_string()))?;
                    let user_and_host = if url.username().is_empty() {
                        host.to_string()
                    } else {
                        format!("{}@{}", url.username(), host)
                    };
                    return Ok(ssh_endpoint(&user_and_host, host, url.path()));
                }
                // scp-like remotes such as `git@host:path` parse with a bogus scheme
                _ => {}
            }
        }

        // scp-like: [user@]host:path
        if let Some((user_and_host, path)) = clone_url.split_once(':') {
            if !user_and_host.contains('/') && !path.starts_with("//") {
                let host = user_and_host
                    .rsplit_once('@')
                    .map(|(_, h)| h)
                    .unwrap_or(user_and_host);
                return Ok(ssh_endpoint(user_and_host, host, path));
            }
        }

        Err(Error::InvalidUrl(clone_url.to_string()))
    }

    /// Whether SSH authentication discovery applies to this endpoint.
    pub fn has_ssh(&self) -> bool {
        !self.ssh_user_and_host.is_empty()
    }

    /// URL of `<endpoint>/objects/<oid>`, or `<endpoint>/objects` when `oid` is empty.
    pub fn object_url(&self, oid: &str) -> Result<Url> {
        object_url(&self.url, oid)
    }
}

/// Join `objects[/<oid>]` onto an endpoint base URL.
pub fn object_url(base: &str, oid: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::InvalidUrl(base.to_string()))?;
        segments.pop_if_empty().push("objects");
        if !oid.is_empty() {
            segments.push(oid);
        }
    }
    Ok(url)
}

fn with_git_suffix(path: &str) -> String {
    if path.ends_with(".git") {
        path.to_string()
    } else {
        format!("{}.git", path)
    }
}

fn ssh_endpoint(user_and_host: &str, host: &str, path: &str) -> Endpoint {
    let path = path.trim_start_matches('/');
    Endpoint {
        url: format!("https://{}/{}/info/lfs", host, with_git_suffix(path)),
        ssh_user_and_host: user_and_host.to_string(),
        ssh_path: path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_clone_url() {
        let e = Endpoint::from_clone_url("https://github.com/owner/repo.git").unwrap();
        assert_eq!(e.url, "https://github.com/owner/repo.git/info/lfs");
        assert!(!e.has_ssh());
    }

    #[test]
    fn test_https_clone_url_no_git() {
        // URLs without .git get it added - GitHub requires it
        let e = Endpoint::from_clone_url("https://github.com/owner/repo").unwrap();
        assert_eq!(e.url, "https://github.com/owner/repo.git/info/lfs");
    }

    #[test]
    fn test_scp_clone_url() {
        let e = Endpoint::from_clone_url("git@github.com:owner/repo.git").unwrap();
        assert_eq!(e.url, "https://github.com/owner/repo.git/info/lfs");
        assert_eq!(e.ssh_user_and_host, "git@github.com");
        assert_eq!(e.ssh_path, "owner/repo.git");
    }

    #[test]
    fn test_ssh_scheme_clone_url() {
        let e = Endpoint::from_clone_url("ssh://git@example.com/owner/repo").unwrap();
        assert_eq!(e.url, "https://example.com/owner/repo.git/info/lfs");
        assert_eq!(e.ssh_user_and_host, "git@example.com");
        assert_eq!(e.ssh_path, "owner/repo");
    }

    #[test]
    fn test_object_urls() {
        let e = Endpoint::new("https://example.com/repo.git/info/lfs/");
        assert_eq!(
            e.object_url("batch").unwrap().as_str(),
            "https://example.com/repo.git/info/lfs/objects/batch"
        );
        assert_eq!(
            e.object_url("").unwrap().as_str(),
            "https://example.com/repo.git/info/lfs/objects"
        );
        assert_eq!(
            e.object_url("deadbeef").unwrap().as_str(),
            "https://example.com/repo.git/info/lfs/objects/deadbeef"
        );
    }
}

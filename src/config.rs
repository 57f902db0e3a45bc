//! LFS configuration.
//!
//! A [`Config`] is built once at startup and shared as `Arc<Config>` by
//! every component. Values come from builder methods or from the
//! `key=value` listing produced by `git config --list`; reading git config
//! files themselves is the caller's job.
//!
//! The only state that changes after construction is the per-endpoint
//! access mode (upgraded when a server answers 401) and the cache of
//! resolved endpoints. Both are guarded by locks.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::{Endpoint, Error, Result};

/// The remote used when none is configured.
pub const DEFAULT_REMOTE: &str = "origin";

/// Default number of concurrent transfers.
pub const DEFAULT_CONCURRENT_TRANSFERS: usize = 3;

/// How an endpoint must be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Requests go out without credentials.
    #[default]
    None,
    /// Requests carry credentials from the credential helper.
    Basic,
}

impl AccessMode {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => AccessMode::None,
            _ => AccessMode::Basic,
        }
    }
}

/// A content extension run over file content before it is hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extension {
    pub name: String,
    /// Clean command; `%f` is replaced by the file name.
    pub clean: String,
    /// Smudge command; `%f` is replaced by the file name.
    pub smudge: String,
    pub priority: u32,
}

/// Options that control which objects fetch considers recent and prune retains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPruneConfig {
    /// Days before now for which refs other than the current one are recent.
    /// 0 means only the current ref.
    pub fetch_recent_refs_days: u32,
    /// Whether remote refs count as recent refs too.
    pub fetch_recent_refs_include_remotes: bool,
    /// Days before a ref's tip for which earlier versions of files are kept.
    /// 0 means only the versions at the tip.
    pub fetch_recent_commits_days: u32,
    /// Whether fetch always includes recent refs and commits.
    pub fetch_recent_always: bool,
    /// Days added to the recent windows before prune deletes anything.
    pub prune_offset_days: u32,
    /// Whether prune always verifies with the remote.
    pub prune_verify_remote_always: bool,
    /// Remote that prune checks for pushed and reachable objects.
    pub prune_remote_name: String,
}

impl Default for FetchPruneConfig {
    fn default() -> Self {
        FetchPruneConfig {
            fetch_recent_refs_days: 7,
            fetch_recent_refs_include_remotes: true,
            fetch_recent_commits_days: 0,
            fetch_recent_always: false,
            prune_offset_days: 3,
            prune_verify_remote_always: false,
            prune_remote_name: DEFAULT_REMOTE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RemoteConfig {
    url: Option<String>,
    lfs_url: Option<String>,
}

/// LFS configuration shared by all components.
#[derive(Debug)]
pub struct Config {
    lfs_url: Option<String>,
    remotes: BTreeMap<String, RemoteConfig>,
    concurrent_transfers: usize,
    batch: bool,
    extensions: BTreeMap<String, Extension>,
    fetch_include: Vec<String>,
    fetch_exclude: Vec<String>,
    fetch_prune: FetchPruneConfig,
    access: RwLock<HashMap<String, AccessMode>>,
    endpoints: Mutex<HashMap<String, Endpoint>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lfs_url: None,
            remotes: BTreeMap::new(),
            concurrent_transfers: DEFAULT_CONCURRENT_TRANSFERS,
            batch: true,
            extensions: BTreeMap::new(),
            fetch_include: Vec::new(),
            fetch_exclude: Vec::new(),
            fetch_prune: FetchPruneConfig::default(),
            access: RwLock::new(HashMap::new()),
            endpoints: Mutex::new(HashMap::new()),
        }
    }
}

impl Config {
    /// Build a configuration from `git config --list` style output.
    ///
    /// Section and variable names are case-insensitive; remote names and
    /// URLs in the middle of a key keep their case, as in git.
    /// Later lines override earlier ones. Unknown keys are ignored;
    /// unparseable values for known keys keep the default.
    pub fn from_git_config_list(listing: &str) -> Result<Self> {
        let mut config = Config::default();

        for line in listing.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            config.apply(&normalize_key(key), value.trim())?;
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["lfs", "url"] => self.lfs_url = Some(value.to_string()),
            ["lfs", "concurrenttransfers"] => {
                if let Ok(n) = value.parse::<usize>() {
                    if n > 0 {
                        self.concurrent_transfers = n;
                    }
                }
            }
            ["lfs", "batch"] => self.batch = parse_bool(value, true),
            ["lfs", "fetchinclude"] => self.fetch_include = split_list(value),
            ["lfs", "fetchexclude"] => self.fetch_exclude = split_list(value),
            ["lfs", "fetchrecentrefsdays"] => {
                parse_days(value, &mut self.fetch_prune.fetch_recent_refs_days)
            }
            ["lfs", "fetchrecentremoterefs"] => {
                self.fetch_prune.fetch_recent_refs_include_remotes = parse_bool(value, true)
            }
            ["lfs", "fetchrecentcommitsdays"] => {
                parse_days(value, &mut self.fetch_prune.fetch_recent_commits_days)
            }
            ["lfs", "fetchrecentalways"] => {
                self.fetch_prune.fetch_recent_always = parse_bool(value, false)
            }
            ["lfs", "pruneoffsetdays"] => {
                parse_days(value, &mut self.fetch_prune.prune_offset_days)
            }
            ["lfs", "pruneverifyremotealways"] => {
                self.fetch_prune.prune_verify_remote_always = parse_bool(value, false)
            }
            ["lfs", "pruneremotetocheck"] => {
                if !value.is_empty() {
                    self.fetch_prune.prune_remote_name = value.to_string();
                }
            }
            ["lfs", "extension", name, field] => {
                let ext = self.extensions.entry(name.to_string()).or_default();
                ext.name = name.to_string();
                match *field {
                    "clean" => ext.clean = value.to_string(),
                    "smudge" => ext.smudge = value.to_string(),
                    "priority" => {
                        ext.priority = value.parse().map_err(|_| {
                            Error::Config(format!("invalid priority for extension {}", name))
                        })?
                    }
                    _ => {}
                }
            }
            ["remote", .., "url"] | ["remote", .., "lfsurl"] if parts.len() >= 3 => {
                // remote names may themselves contain dots
                let name = parts[1..parts.len() - 1].join(".");
                let remote = self.remotes.entry(name).or_default();
                if parts[parts.len() - 1] == "url" {
                    remote.url = Some(value.to_string());
                } else {
                    remote.lfs_url = Some(value.to_string());
                }
            }
            // lfs.<url>.access, where the url itself contains dots
            ["lfs", .., "access"] if parts.len() > 2 => {
                let url = key["lfs.".len()..key.len() - ".access".len()].to_string();
                self.access.write().insert(url, AccessMode::parse(value));
            }
            _ => {}
        }

        Ok(())
    }

    /// Use a fixed LFS API URL for every remote.
    pub fn with_lfs_url(mut self, url: &str) -> Self {
        self.lfs_url = Some(url.to_string());
        self
    }

    /// Add a remote by its clone URL.
    pub fn with_remote(mut self, name: &str, clone_url: &str) -> Self {
        self.remotes.entry(name.to_string()).or_default().url = Some(clone_url.to_string());
        self
    }

    pub fn with_concurrent_transfers(mut self, n: usize) -> Self {
        if n > 0 {
            self.concurrent_transfers = n;
        }
        self
    }

    /// Enable or disable the batch API. When disabled the legacy API is used.
    pub fn with_batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_extension(mut self, ext: Extension) -> Self {
        self.extensions.insert(ext.name.clone(), ext);
        self
    }

    pub fn with_fetch_prune(mut self, fetch_prune: FetchPruneConfig) -> Self {
        self.fetch_prune = fetch_prune;
        self
    }

    pub fn with_fetch_filters(mut self, include: Vec<String>, exclude: Vec<String>) -> Self {
        self.fetch_include = include;
        self.fetch_exclude = exclude;
        self
    }

    /// Resolve the endpoint for a remote.
    ///
    /// `lfs.url` wins, then `remote.<name>.lfsurl`, then the remote's clone
    /// URL. Unknown remotes fall back to `origin`. Results are cached for the
    /// lifetime of the config.
    pub fn endpoint(&self, remote: &str) -> Endpoint {
        let remote = if remote.is_empty() { DEFAULT_REMOTE } else { remote };

        let mut cache = self.endpoints.lock();
        if let Some(endpoint) = cache.get(remote) {
            return endpoint.clone();
        }

        let endpoint = match &self.lfs_url {
            Some(url) => Endpoint::new(url),
            None => {
                let resolved = self.remote_endpoint(remote);
                if resolved.url.is_empty() && remote != DEFAULT_REMOTE {
                    warn!(remote, "remote has no LFS endpoint, using {}", DEFAULT_REMOTE);
                    self.remote_endpoint(DEFAULT_REMOTE)
                } else {
                    resolved
                }
            }
        };
        debug!(remote, url = %endpoint.url, "resolved endpoint");
        cache.insert(remote.to_string(), endpoint.clone());
        endpoint
    }

    fn remote_endpoint(&self, remote: &str) -> Endpoint {
        let Some(cfg) = self.remotes.get(remote) else {
            return Endpoint::default();
        };
        if let Some(url) = &cfg.lfs_url {
            return Endpoint::new(url);
        }
        cfg.url
            .as_deref()
            .and_then(|url| Endpoint::from_clone_url(url).ok())
            .unwrap_or_default()
    }

    /// Names of all configured remotes.
    pub fn remotes(&self) -> Vec<String> {
        self.remotes.keys().cloned().collect()
    }

    pub fn concurrent_transfers(&self) -> usize {
        self.concurrent_transfers
    }

    pub fn batch_transfer(&self) -> bool {
        self.batch
    }

    pub fn fetch_prune(&self) -> &FetchPruneConfig {
        &self.fetch_prune
    }

    pub fn fetch_include_paths(&self) -> &[String] {
        &self.fetch_include
    }

    pub fn fetch_exclude_paths(&self) -> &[String] {
        &self.fetch_exclude
    }

    pub fn extensions(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.values()
    }

    /// Configured extensions ordered by priority.
    ///
    /// Two extensions with the same priority are a configuration error.
    pub fn sorted_extensions(&self) -> Result<Vec<Extension>> {
        let mut sorted: Vec<Extension> = self.extensions.values().cloned().collect();
        sorted.sort_by_key(|e| e.priority);
        for pair in sorted.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(Error::Config(format!(
                    "extensions {} and {} have the same priority {}",
                    pair[0].name, pair[1].name, pair[0].priority
                )));
            }
        }
        Ok(sorted)
    }

    /// How requests to `endpoint` must be authenticated.
    pub fn endpoint_access(&self, endpoint: &Endpoint) -> AccessMode {
        self.access
            .read()
            .get(&endpoint.url)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_endpoint_access(&self, endpoint: &Endpoint, mode: AccessMode) {
        debug!(url = %endpoint.url, ?mode, "setting repository access");
        let mut access = self.access.write();
        match mode {
            AccessMode::None => access.remove(&endpoint.url),
            mode => access.insert(endpoint.url.clone(), mode),
        };
    }

    /// Whether API requests to `endpoint` carry credentials.
    pub fn private_access(&self, endpoint: &Endpoint) -> bool {
        self.endpoint_access(endpoint) != AccessMode::None
    }
}

/// Fold the section and variable of `section[.subsection].variable`.
fn normalize_key(key: &str) -> String {
    let key = key.trim();
    match (key.split_once('.'), key.rsplit_once('.')) {
        (Some((section, rest)), Some((subsection, variable))) if rest.len() > variable.len() => {
            format!(
                "{}.{}.{}",
                section.to_ascii_lowercase(),
                &subsection[section.len() + 1..],
                variable.to_ascii_lowercase()
            )
        }
        _ => key.to_ascii_lowercase(),
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "" | "true" | "yes" | "on" => true,
        "false" | "no" | "off" => false,
        // Any numeric value except 0 is considered true
        v => v.parse::<i64>().map(|n| n != 0).unwrap_or(default),
    }
}

fn parse_days(value: &str, out: &mut u32) {
    if let Ok(n) = value.parse() {
        *out = n;
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.concurrent_transfers(), 3);
        assert!(config.batch_transfer());
        assert_eq!(config.fetch_prune().fetch_recent_refs_days, 7);
        assert_eq!(config.fetch_prune().prune_offset_days, 3);
        assert_eq!(config.fetch_prune().prune_remote_name, "origin");
    }

    #[test]
    fn test_from_git_config_list() {
        let config = Config::from_git_config_list(
            "remote.origin.url=https://github.com/owner/repo\n\
             remote.fork.url=git@github.com:me/repo.git\n\
             lfs.concurrenttransfers=8\n\
             lfs.batch=0\n\
             lfs.fetchrecentrefsdays=14\n\
             lfs.fetchrecentremoterefs=false\n\
             lfs.pruneoffsetdays=1\n\
             lfs.fetchinclude=a/*, b/*\n\
             lfs.extension.foo.clean=foo-clean %f\n\
             lfs.extension.foo.priority=2\n\
             not a config line\n",
        )
        .unwrap();

        assert_eq!(config.concurrent_transfers(), 8);
        assert!(!config.batch_transfer());
        assert_eq!(config.fetch_prune().fetch_recent_refs_days, 14);
        assert!(!config.fetch_prune().fetch_recent_refs_include_remotes);
        assert_eq!(config.fetch_prune().prune_offset_days, 1);
        assert_eq!(config.fetch_include_paths(), ["a/*", "b/*"]);
        assert_eq!(config.remotes(), vec!["fork", "origin"]);

        let exts = config.sorted_extensions().unwrap();
        assert_eq!(exts[0].name, "foo");
        assert_eq!(exts[0].clean, "foo-clean %f");
        assert_eq!(exts[0].priority, 2);

        assert_eq!(
            config.endpoint("origin").url,
            "https://github.com/owner/repo.git/info/lfs"
        );
        assert_eq!(config.endpoint("fork").ssh_user_and_host, "git@github.com");
    }

    #[test]
    fn test_lfs_url_overrides_remote() {
        let config = Config::from_git_config_list(
            "remote.origin.url=https://github.com/owner/repo\nlfs.url=https://lfs.example.com/api\n",
        )
        .unwrap();
        assert_eq!(config.endpoint("origin").url, "https://lfs.example.com/api");
    }

    #[test]
    fn test_unknown_remote_falls_back_to_origin() {
        let config = Config::default().with_remote("origin", "https://h/r.git");
        assert_eq!(config.endpoint("nope").url, "https://h/r.git/info/lfs");
    }

    #[test]
    fn test_access_from_listing_and_upgrade() {
        let config = Config::from_git_config_list(
            "lfs.https://h/r.git/info/lfs.access=basic\n",
        )
        .unwrap();
        let endpoint = Endpoint::new("https://h/r.git/info/lfs");
        assert_eq!(config.endpoint_access(&endpoint), AccessMode::Basic);

        let other = Endpoint::new("https://other/info/lfs");
        assert!(!config.private_access(&other));
        config.set_endpoint_access(&other, AccessMode::Basic);
        assert!(config.private_access(&other));
        config.set_endpoint_access(&other, AccessMode::None);
        assert!(!config.private_access(&other));
    }

    #[test]
    fn test_subsection_keeps_case() {
        let config = Config::from_git_config_list(
            "remote.origin.url=https://h/origin.git\n\
             Remote.MyFork.URL=https://h/MyFork.git\n\
             LFS.PruneRemoteToCheck=MyFork\n\
             lfs.https://h/MyFork.git/info/lfs.Access=basic\n",
        )
        .unwrap();

        assert_eq!(config.remotes(), vec!["MyFork", "origin"]);
        assert_eq!(config.fetch_prune().prune_remote_name, "MyFork");

        let endpoint = config.endpoint("MyFork");
        assert_eq!(endpoint.url, "https://h/MyFork.git/info/lfs");
        assert_eq!(config.endpoint_access(&endpoint), AccessMode::Basic);
        assert_eq!(normalize_key(" Core.Editor "), "core.editor");
    }

    #[test]
    fn test_duplicate_extension_priority() {
        let config = Config::default()
            .with_extension(Extension {
                name: "a".into(),
                priority: 1,
                ..Default::default()
            })
            .with_extension(Extension {
                name: "b".into(),
                priority: 1,
                ..Default::default()
            });
        assert!(config.sorted_extensions().is_err());
    }
}

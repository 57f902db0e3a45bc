//! Credentials exchanged with an external credential helper.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};

use base64::Engine;
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// Opaque key/value credential payload (`protocol`, `host`, `path`,
/// `username`, `password`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new() -> Self {
        Credentials::default()
    }

    /// The lookup key for a request URL: protocol, host and path.
    pub fn for_url(url: &Url) -> Self {
        let mut creds = Credentials::new();
        let host = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        creds.set("protocol", url.scheme());
        creds.set("host", &host);
        creds.set("path", url.path().trim_start_matches('/'));
        creds
    }

    /// Credentials embedded in a URL as `user:pass@host`, if any.
    pub fn from_url_userinfo(url: &Url) -> Option<Self> {
        let password = url.password()?;
        let mut creds = Credentials::for_url(url);
        creds.set("username", url.username());
        creds.set("password", password);
        Some(creds)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn username(&self) -> Option<&str> {
        self.get("username")
    }

    pub fn password(&self) -> Option<&str> {
        self.get("password")
    }

    /// `Authorization` header value, or `None` if there is no user or password.
    pub fn basic_auth(&self) -> Option<String> {
        let user = self.username().unwrap_or_default();
        let pass = self.password().unwrap_or_default();
        if user.is_empty() && pass.is_empty() {
            return None;
        }
        let token = format!("{}:{}", user, pass);
        Some(format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(token.as_bytes())
        ))
    }

    /// Encode in the `key=value` line format of `git credential`.
    pub fn to_helper_input(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, v))
            .collect()
    }

    /// Decode `key=value` lines; lines without `=` are skipped.
    pub fn parse_helper_output(output: &str) -> Self {
        let mut creds = Credentials::new();
        for line in output.lines() {
            if let Some((k, v)) = line.split_once('=') {
                creds.set(k, v);
            }
        }
        creds
    }
}

/// External credential store.
pub trait CredentialHelper: Send + Sync {
    /// Fill in a username and password for `input` (protocol, host, path).
    fn fill(&self, input: &Credentials) -> Result<Credentials>;

    /// Persist credentials that the server accepted.
    fn approve(&self, creds: &Credentials) -> Result<()>;

    /// Discard credentials that the server rejected.
    fn reject(&self, creds: &Credentials) -> Result<()>;
}

/// Credential helper backed by `git credential <fill|approve|reject>`.
#[derive(Debug, Clone, Default)]
pub struct GitCredentialHelper;

impl GitCredentialHelper {
    fn exec(&self, input: &Credentials, subcommand: &str) -> Result<String> {
        debug!(subcommand, host = ?input.get("host"), "git credential");

        // stderr stays attached: the credential cache daemon never closes it
        let mut child = Command::new("git")
            .args(["credential", subcommand])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Credentials(format!("'git credential {}': {}", subcommand, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.to_helper_input().as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::Credentials(format!(
                "'git credential {}' exited with {}",
                subcommand, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl CredentialHelper for GitCredentialHelper {
    fn fill(&self, input: &Credentials) -> Result<Credentials> {
        let out = self.exec(input, "fill")?;
        Ok(Credentials::parse_helper_output(&out))
    }

    fn approve(&self, creds: &Credentials) -> Result<()> {
        self.exec(creds, "approve").map(|_| ())
    }

    fn reject(&self, creds: &Credentials) -> Result<()> {
        self.exec(creds, "reject").map(|_| ())
    }
}

//! SSH authentication discovery.
//!
//! For SSH remotes the LFS server can hand out an HTTP href and headers
//! (usually a short-lived token) through `git-lfs-authenticate`. Discovery
//! is best effort: callers log failures and fall back to the configured URL.

use std::collections::HashMap;
use std::process::Command;

use serde::Deserialize;
use tracing::debug;

use crate::{Endpoint, Error, Operation, Result};

/// Endpoint override returned by SSH discovery.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SshAuthResponse {
    /// Replacement API URL; empty keeps the configured one.
    #[serde(default)]
    pub href: String,
    /// Extra headers for the request.
    #[serde(default)]
    pub header: HashMap<String, String>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Pluggable SSH authentication provider.
pub trait SshAuthenticator: Send + Sync {
    fn authenticate(
        &self,
        endpoint: &Endpoint,
        operation: Operation,
        oid: &str,
    ) -> Result<SshAuthResponse>;
}

/// Runs `ssh <user@host> git-lfs-authenticate <path> <operation> [oid]`.
#[derive(Debug, Clone)]
pub struct GitLfsAuthenticate {
    ssh_program: String,
}

impl Default for GitLfsAuthenticate {
    fn default() -> Self {
        GitLfsAuthenticate {
            ssh_program: std::env::var("GIT_SSH").unwrap_or_else(|_| "ssh".to_string()),
        }
    }
}

impl GitLfsAuthenticate {
    pub fn with_program(program: &str) -> Self {
        GitLfsAuthenticate {
            ssh_program: program.to_string(),
        }
    }
}

impl SshAuthenticator for GitLfsAuthenticate {
    fn authenticate(
        &self,
        endpoint: &Endpoint,
        operation: Operation,
        oid: &str,
    ) -> Result<SshAuthResponse> {
        if !endpoint.has_ssh() {
            return Ok(SshAuthResponse::default());
        }

        let mut cmd = Command::new(&self.ssh_program);
        cmd.arg(&endpoint.ssh_user_and_host)
            .arg("git-lfs-authenticate")
            .arg(&endpoint.ssh_path)
            .arg(operation.as_str());
        if !oid.is_empty() {
            cmd.arg(oid);
        }
        debug!(host = %endpoint.ssh_user_and_host, %operation, "ssh: git-lfs-authenticate");

        let output = cmd.output()?;
        if !output.status.success() {
            return Err(Error::Ssh(format!(
                "git-lfs-authenticate failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Authenticator for endpoints that never use SSH.
#[derive(Debug, Clone, Default)]
pub struct NoSsh;

impl SshAuthenticator for NoSsh {
    fn authenticate(&self, _: &Endpoint, _: Operation, _: &str) -> Result<SshAuthResponse> {
        Ok(SshAuthResponse::default())
    }
}

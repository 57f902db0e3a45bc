//! Error types for LFS transfer and prune operations.

use thiserror::Error;

use crate::Pointer;

/// Result type for lfs-transfer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during LFS operations.
///
/// Every failure mode is its own variant; callers switch on the variant
/// (or on [`Error::is_fatal`]) rather than probing for capabilities.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure, no response was received.
    #[error("network error for {method} {url}: {message}")]
    Network {
        method: String,
        url: String,
        message: String,
    },

    /// The server answered with a non-fatal error status.
    #[error("{message}")]
    HttpStatus { code: u16, message: String },

    /// The server failed in a way a retry cannot fix (5xx other than 501/509).
    #[error("fatal server error (HTTP {code}): {message}")]
    ServerFatal { code: u16, message: String },

    /// Downloaded or staged content does not hash to the expected OID.
    #[error("object {expected} failed verification: content hashes to {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The endpoint does not implement the requested API.
    #[error("API not implemented by server (HTTP {code})")]
    ProtocolUnsupported { code: u16 },

    /// An API request sent without credentials was refused with 401.
    ///
    /// Triggers the one credential upgrade; if it recurs it is reported
    /// as [`Error::HttpStatus`].
    #[error("{message}")]
    AuthRequired { message: String },

    /// A 307 redirect was received for a request whose body cannot be replayed.
    #[error("request body needs to be seekable to handle redirects")]
    RedirectBodyNotSeekable,

    /// Content is not an LFS pointer at all.
    #[error("not an LFS pointer: {0}")]
    NotAPointer(String),

    /// Content looks like an LFS pointer but a field is malformed.
    #[error("invalid LFS pointer: {0}")]
    InvalidPointer(String),

    /// Clean was asked to process content that is already a pointer.
    #[error("cannot clean a Git LFS pointer, skipping")]
    AlreadyPointer(Box<Pointer>),

    /// OID parsing error
    #[error("invalid OID: {0}")]
    InvalidOid(String),

    /// The object resource has no action with this relation name.
    #[error("relation does not exist: {0}")]
    RelationMissing(String),

    /// Prunable objects are reachable on the remote but could not be verified there.
    #[error("failed to find prunable objects on remote, aborting:\n{}", .oids.join("\n"))]
    RetentionSafetyViolation { oids: Vec<String> },

    /// Some local objects could not be deleted.
    #[error("failed to delete some files:\n{}", .failures.join("\n"))]
    DeleteFailed { failures: Vec<String> },

    /// A clean extension failed.
    #[error("extension {name} failed: {message}")]
    Extension { name: String, message: String },

    /// The credential helper failed.
    #[error("credential helper error: {0}")]
    Credentials(String),

    /// SSH authentication discovery failed.
    #[error("ssh error: {0}")]
    Ssh(String),

    /// A git plumbing collaborator failed.
    #[error("git error: {0}")]
    Git(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Classify an HTTP error status.
    ///
    /// 5xx statuses abort the whole operation tree, except 501 and 509
    /// which mean the server does not implement the API.
    pub fn from_status(code: u16, message: String) -> Self {
        match code {
            501 | 509 => Error::ProtocolUnsupported { code },
            c if c > 499 => Error::ServerFatal { code, message },
            _ => Error::HttpStatus { code, message },
        }
    }

    /// Whether this error must stop the whole transfer or prune run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ServerFatal { .. }
                | Error::RedirectBodyNotSeekable
                | Error::RetentionSafetyViolation { .. }
        )
    }

    /// Whether this error means "leave this file alone".
    pub fn is_not_a_pointer(&self) -> bool {
        matches!(self, Error::NotAPointer(_) | Error::AlreadyPointer(_))
    }

    /// HTTP status code carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { code, .. }
            | Error::ServerFatal { code, .. }
            | Error::ProtocolUnsupported { code } => Some(*code),
            Error::AuthRequired { .. } => Some(401),
            _ => None,
        }
    }

    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            2
        } else {
            1
        }
    }
}

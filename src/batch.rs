//! LFS API wire types.
//!
//! The batch API negotiates transfer actions for many objects in one
//! round trip; the legacy API does the same for one object at a time.
//! Both return the same [`ObjectResource`] shape.
//! See: https://github.com/git-lfs/git-lfs/blob/main/docs/api/batch.md

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// LFS API media type, sent on every API request.
pub const MEDIA_TYPE: &str = "application/vnd.git-lfs+json; charset=utf-8";

/// Operation type for batch requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Download objects from the server.
    Download,
    /// Upload objects to the server.
    Upload,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Download => "download",
            Operation::Upload => "upload",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An `{oid, size}` pair as sent to the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub oid: String,
    pub size: u64,
}

impl ObjectSpec {
    pub fn new(oid: &str, size: u64) -> Self {
        ObjectSpec {
            oid: oid.to_string(),
            size,
        }
    }
}

/// A batch request to the LFS server.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest<'a> {
    /// The objects to operate on.
    pub objects: &'a [ObjectSpec],
    /// The operation to perform.
    pub operation: Operation,
}

/// A batch response from the LFS server.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchResponse {
    /// The objects with their actions.
    #[serde(default)]
    pub objects: Vec<ObjectResource>,
}

/// Relation names an object resource can carry.
pub mod relation {
    pub const DOWNLOAD: &str = "download";
    pub const UPLOAD: &str = "upload";
    pub const VERIFY: &str = "verify";
}

/// Server-side negotiation result for one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectResource {
    /// The SHA256 OID of the object.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub oid: String,
    /// The size of the object in bytes.
    #[serde(default)]
    pub size: u64,
    /// Actions available for this object (batch API).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<HashMap<String, LinkRelation>>,
    /// Actions available for this object (legacy API).
    #[serde(default, rename = "_links", skip_serializing_if = "Option::is_none")]
    pub links: Option<HashMap<String, LinkRelation>>,
    /// Error information if the object failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectError>,
}

impl ObjectResource {
    pub fn new(oid: &str, size: u64) -> Self {
        ObjectResource {
            oid: oid.to_string(),
            size,
            ..Default::default()
        }
    }

    /// Look up a relation. `actions` takes precedence over `_links`.
    pub fn rel(&self, name: &str) -> Option<&LinkRelation> {
        match &self.actions {
            Some(actions) => actions.get(name),
            None => self.links.as_ref()?.get(name),
        }
    }

    pub fn has_rel(&self, name: &str) -> bool {
        self.rel(name).is_some()
    }

    /// The `{oid, size}` body sent for verify and legacy requests.
    pub fn spec(&self) -> ObjectSpec {
        ObjectSpec::new(&self.oid, self.size)
    }
}

/// An action (upload/download/verify URL) for an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRelation {
    /// The URL for the action.
    pub href: String,
    /// HTTP headers to include in the request.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub header: HashMap<String, String>,
}

/// Per-object error in a batch response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectError {
    /// HTTP status code.
    #[serde(default)]
    pub code: u16,
    /// Error message.
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Structured error body returned with 4xx/5xx API responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub documentation_url: String,
    #[serde(default)]
    pub request_id: String,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if !self.documentation_url.is_empty() {
            write!(f, "\nDocs: {}", self.documentation_url)?;
        }
        if !self.request_id.is_empty() {
            write!(f, "\nRequest ID: {}", self.request_id)?;
        }
        Ok(())
    }
}

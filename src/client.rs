//! LFS HTTP client.
//!
//! Every call follows the same path: resolve the endpoint, let SSH
//! discovery override it, build the request, send it, then react to the
//! status. 401 on an API call upgrades the endpoint to private access and
//! retries once with credentials; 307 replays the request against the
//! `Location` header; 404/410 (and 501/509) on the batch endpoint fall
//! back to the legacy per-object API.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use crate::batch::{
    relation, BatchRequest, BatchResponse, ClientError, LinkRelation, ObjectError,
    ObjectResource, ObjectSpec, MEDIA_TYPE,
};
use crate::config::AccessMode;
use crate::credentials::{CredentialHelper, Credentials, GitCredentialHelper};
use crate::progress::{CallbackReader, CopyCallback};
use crate::ssh::{GitLfsAuthenticate, SshAuthenticator};
use crate::{Config, Endpoint, Error, Operation, Result};

const USER_AGENT: &str = concat!("lfs-transfer/", env!("CARGO_PKG_VERSION"));

/// Headers that survive a redirect; everything else is dropped.
const REPLAY_HEADERS: &[&str] = &["accept", "content-type", "content-length"];

/// Request body. Only seekable bodies can be replayed after a 307.
pub enum Body<'a> {
    Empty,
    Bytes(Vec<u8>),
    Seekable(&'a mut dyn ReadSeek),
    Stream(&'a mut dyn Read),
}

/// A readable, seekable request body.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// One HTTP request, possibly re-targeted by redirects.
pub struct HttpRequest<'a> {
    pub method: &'static str,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Body<'a>,
}

impl<'a> HttpRequest<'a> {
    pub fn new(method: &'static str, url: Url) -> Self {
        HttpRequest {
            method,
            url,
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        self.headers.push((key.to_string(), value.to_string()));
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// JSON body with the LFS media type.
    pub fn json_body(mut self, body: Vec<u8>) -> Self {
        self.set_header("Content-Type", MEDIA_TYPE);
        self.set_header("Content-Length", &body.len().to_string());
        self.body = Body::Bytes(body);
        self
    }

    pub fn body(mut self, body: Body<'a>) -> Self {
        self.body = body;
        self
    }

    fn rewind(&mut self) -> Result<()> {
        match &mut self.body {
            Body::Empty | Body::Bytes(_) => Ok(()),
            Body::Seekable(r) => {
                r.seek(SeekFrom::Start(0))?;
                Ok(())
            }
            Body::Stream(_) => Err(Error::RedirectBodyNotSeekable),
        }
    }
}

/// Which credentials a request may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredsMode {
    /// LFS API: credentials once the endpoint is marked private.
    Api,
    /// Storage href: credentials only for the API host of a private endpoint.
    Storage,
}

struct RequestCreds {
    creds: Credentials,
    /// Whether the helper supplied these (and should hear about the outcome).
    from_helper: bool,
}

/// LFS client for communicating with an LFS server.
///
/// This type is cheaply cloneable - multiple clones share the same underlying
/// HTTP agent and configuration.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

#[derive(Clone)]
struct ApiClientInner {
    config: Arc<Config>,
    /// Remote whose endpoint this client talks to.
    remote: String,
    /// HTTP agent; redirects are handled here, not by the agent.
    agent: ureq::Agent,
    credentials: Arc<dyn CredentialHelper>,
    ssh: Arc<dyn SshAuthenticator>,
}

impl ApiClient {
    /// Create a client for `remote` using `git credential` and
    /// `git-lfs-authenticate` as collaborators.
    pub fn new(config: Arc<Config>, remote: &str) -> Self {
        ApiClient {
            inner: Arc::new(ApiClientInner {
                config,
                remote: remote.to_string(),
                agent: ureq::AgentBuilder::new()
                    .redirects(0)
                    .user_agent(USER_AGENT)
                    .build(),
                credentials: Arc::new(GitCredentialHelper),
                ssh: Arc::new(GitLfsAuthenticate::default()),
            }),
        }
    }

    /// Replace the credential helper.
    pub fn with_credential_helper(self, helper: Arc<dyn CredentialHelper>) -> Self {
        self.rebuild(|inner| inner.credentials = helper)
    }

    /// Replace the SSH authentication provider.
    pub fn with_ssh(self, ssh: Arc<dyn SshAuthenticator>) -> Self {
        self.rebuild(|inner| inner.ssh = ssh)
    }

    /// A client for another remote sharing this one's collaborators.
    pub fn for_remote(&self, remote: &str) -> Self {
        self.clone().rebuild(|inner| inner.remote = remote.to_string())
    }

    fn rebuild(self, f: impl FnOnce(&mut ApiClientInner)) -> Self {
        let mut inner = (*self.inner).clone();
        f(&mut inner);
        ApiClient {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.inner.config
    }

    pub fn remote(&self) -> &str {
        &self.inner.remote
    }

    /// The configured endpoint of this client's remote.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let endpoint = self.inner.config.endpoint(&self.inner.remote);
        if endpoint.url.is_empty() {
            return Err(Error::InvalidUrl(format!(
                "no LFS endpoint configured for remote {:?}",
                self.inner.remote
            )));
        }
        Ok(endpoint)
    }

    /// Negotiate transfer actions for `objects`.
    ///
    /// Falls back to one legacy request per object when batch is disabled
    /// or the server does not implement it.
    pub fn batch(&self, objects: &[ObjectSpec], operation: Operation) -> Result<Vec<ObjectResource>> {
        if objects.is_empty() {
            return Ok(vec![]);
        }

        if !self.inner.config.batch_transfer() {
            return self.legacy_batch(objects, operation);
        }

        match self.batch_api(objects, operation) {
            Err(Error::ProtocolUnsupported { code }) => {
                info!(code, "api: batch not implemented, using legacy API");
                self.legacy_batch(objects, operation)
            }
            other => other,
        }
    }

    fn batch_api(&self, objects: &[ObjectSpec], operation: Operation) -> Result<Vec<ObjectResource>> {
        let body = serde_json::to_vec(&BatchRequest { objects, operation })?;
        debug!(count = objects.len(), %operation, "api: batch");

        let res = self.api_request(|| {
            let (url, headers) = self.api_url(operation, "", "batch")?;
            let mut req = HttpRequest::new("POST", url).json_body(body.clone());
            req.headers.extend(headers);
            Ok(req)
        });

        let res = match res {
            Err(Error::HttpStatus { code, .. }) if code == 404 || code == 410 => {
                return Err(Error::ProtocolUnsupported { code })
            }
            other => other?,
        };

        if res.status() != 200 {
            return Err(Error::HttpStatus {
                code: res.status(),
                message: format!("Invalid status for POST {}: {}", res.get_url(), res.status()),
            });
        }

        let response: BatchResponse = decode_api_response(res)?.unwrap_or_default();
        Ok(response.objects)
    }

    /// Legacy equivalent of a batch call: one request per object.
    ///
    /// Non-fatal failures are recorded on the object's `error`; fatal ones
    /// abort the call.
    fn legacy_batch(&self, objects: &[ObjectSpec], operation: Operation) -> Result<Vec<ObjectResource>> {
        let mut out = Vec::with_capacity(objects.len());
        for spec in objects {
            let result = match operation {
                Operation::Download => self.legacy_download_check(&spec.oid),
                Operation::Upload => self
                    .legacy_upload_check(spec)
                    .map(|obj| obj.unwrap_or_else(|| ObjectResource::new(&spec.oid, spec.size))),
            };

            match result {
                Ok(mut obj) => {
                    if obj.oid.is_empty() {
                        obj.oid = spec.oid.clone();
                    }
                    if obj.size == 0 {
                        obj.size = spec.size;
                    }
                    out.push(obj);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(oid = %spec.oid, error = %e, "api: legacy request failed");
                    let mut obj = ObjectResource::new(&spec.oid, spec.size);
                    obj.error = Some(ObjectError {
                        code: e.status().unwrap_or_default(),
                        message: e.to_string(),
                    });
                    out.push(obj);
                }
            }
        }
        Ok(out)
    }

    /// Ask the legacy API where to download `oid` from.
    pub fn download_check(&self, oid: &str) -> Result<ObjectResource> {
        let obj = self.legacy_download_check(oid)?;
        if !obj.has_rel(relation::DOWNLOAD) {
            return Err(Error::RelationMissing(relation::DOWNLOAD.into()));
        }
        Ok(obj)
    }

    fn legacy_download_check(&self, oid: &str) -> Result<ObjectResource> {
        let res = self.api_request(|| {
            let (url, headers) = self.api_url(Operation::Download, oid, oid)?;
            let mut req = HttpRequest::new("GET", url);
            req.headers.extend(headers);
            Ok(req)
        })?;
        debug!(oid, status = res.status(), "lfs.api.download");
        let mut obj: ObjectResource = decode_api_response(res)?.unwrap_or_default();
        if obj.oid.is_empty() {
            obj.oid = oid.to_string();
        }
        Ok(obj)
    }

    /// Ask the remote whether the object stored at `path` is already present.
    ///
    /// The object's OID is the file name. Returns `None` when the server
    /// already has it and the upload must be skipped.
    pub fn upload_check(&self, path: &Path) -> Result<Option<ObjectResource>> {
        let oid = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidOid(path.display().to_string()))?;
        let size = std::fs::metadata(path)?.len();
        self.legacy_upload_check(&ObjectSpec::new(oid, size))
    }

    fn legacy_upload_check(&self, spec: &ObjectSpec) -> Result<Option<ObjectResource>> {
        let body = serde_json::to_vec(spec)?;
        debug!(oid = %spec.oid, "api: uploading");

        let res = self.api_request(|| {
            let (url, headers) = self.api_url(Operation::Upload, &spec.oid, "")?;
            let mut req = HttpRequest::new("POST", url).json_body(body.clone());
            req.headers.extend(headers);
            Ok(req)
        })?;
        debug!(oid = %spec.oid, status = res.status(), "lfs.api.upload");

        if res.status() == 200 {
            return Ok(None);
        }

        let mut obj: ObjectResource = decode_api_response(res)?.unwrap_or_default();
        if obj.oid.is_empty() {
            obj.oid = spec.oid.clone();
        }
        if obj.size == 0 {
            obj.size = spec.size;
        }
        Ok(Some(obj))
    }

    /// PUT the file at `path` to the object's `upload` relation, then POST
    /// to its `verify` relation if the server advertised one.
    pub fn upload_object(
        &self,
        obj: &ObjectResource,
        path: &Path,
        callback: Option<Box<CopyCallback<'_>>>,
    ) -> Result<()> {
        let rel = obj
            .rel(relation::UPLOAD)
            .ok_or_else(|| Error::RelationMissing(relation::UPLOAD.into()))?;

        let file = File::open(path)?;
        let mut reader = CallbackReader::new(file, obj.size, callback);

        let mut req = storage_request("PUT", rel)?;
        let chunked = req
            .get_header("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        // the agent chunks any body sent without a Content-Length
        req.headers.retain(|(k, _)| !k.eq_ignore_ascii_case("Transfer-Encoding"));
        if req.get_header("Content-Type").is_none() {
            req.set_header("Content-Type", "application/octet-stream");
        }
        if !chunked {
            req.set_header("Content-Length", &obj.size.to_string());
        }
        req.body = Body::Seekable(&mut reader);

        let res = self.send(&mut req, CredsMode::Storage)?;
        debug!(oid = %obj.oid, status = res.status(), "lfs.data.upload");
        if res.status() > 299 {
            return Err(Error::HttpStatus {
                code: res.status(),
                message: format!("Invalid status for PUT {}: {}", res.get_url(), res.status()),
            });
        }
        drain(res);

        let Some(verify) = obj.rel(relation::VERIFY) else {
            return Ok(());
        };

        let body = serde_json::to_vec(&obj.spec())?;
        let mut req = storage_request("POST", verify)?.json_body(body);
        let res = self.send(&mut req, CredsMode::Api).map_err(auth_as_status)?;
        debug!(oid = %obj.oid, status = res.status(), "lfs.data.verify");
        drain(res);
        Ok(())
    }

    /// GET the object's `download` relation.
    ///
    /// Returns the body stream and the advertised content length.
    pub fn download_object(&self, obj: &ObjectResource) -> Result<(Box<dyn Read + Send + Sync>, Option<u64>)> {
        let rel = obj
            .rel(relation::DOWNLOAD)
            .ok_or_else(|| Error::RelationMissing(relation::DOWNLOAD.into()))?;

        let mut req = storage_request("GET", rel)?;
        let res = self.send(&mut req, CredsMode::Storage)?;
        debug!(oid = %obj.oid, status = res.status(), "lfs.data.download");

        let length = res
            .header("Content-Length")
            .and_then(|v| v.trim().parse().ok());
        Ok((res.into_reader(), length))
    }

    /// Build an API URL, letting SSH discovery override the endpoint.
    ///
    /// Discovery failures are logged and the configured URL is used.
    fn api_url(&self, operation: Operation, ssh_oid: &str, object: &str) -> Result<(Url, Vec<(String, String)>)> {
        let mut endpoint = self.endpoint()?;
        let mut headers = vec![("Accept".to_string(), MEDIA_TYPE.to_string())];

        match self.inner.ssh.authenticate(&endpoint, operation, ssh_oid) {
            Ok(res) => {
                if !res.href.is_empty() {
                    endpoint.url = res.href;
                }
                headers.extend(res.header);
            }
            Err(e) => {
                debug!(host = %endpoint.ssh_user_and_host, error = %e, "ssh: authentication failed");
            }
        }

        Ok((endpoint.object_url(object)?, headers))
    }

    /// Send an API request; on a first 401 mark the endpoint private and
    /// retry once with credentials.
    fn api_request<'b>(&self, build: impl Fn() -> Result<HttpRequest<'b>>) -> Result<ureq::Response> {
        let endpoint = self.endpoint()?;
        let mut req = build()?;
        match self.send(&mut req, CredsMode::Api) {
            Err(Error::AuthRequired { .. }) if !self.inner.config.private_access(&endpoint) => {
                info!(url = %endpoint.url, "api: not authorized, submitting with auth");
                self.inner
                    .config
                    .set_endpoint_access(&endpoint, AccessMode::Basic);
                let mut req = build()?;
                self.send(&mut req, CredsMode::Api).map_err(auth_as_status)
            }
            other => other.map_err(auth_as_status),
        }
    }

    /// Send a request, following 307 redirects.
    fn send(&self, req: &mut HttpRequest<'_>, mode: CredsMode) -> Result<ureq::Response> {
        let mut via: Vec<String> = Vec::new();

        loop {
            let creds = self.request_credentials(req, mode)?;
            let res = match self.send_once(req, creds.as_ref()) {
                Ok(res) => res,
                // nothing was attached that the server could have refused
                Err(Error::HttpStatus { code: 401, message })
                    if mode == CredsMode::Api && creds.is_none() =>
                {
                    return Err(Error::AuthRequired { message })
                }
                Err(e) => {
                    if !via.is_empty() {
                        warn!(via = ?via, error = %e, "request failed after redirect");
                    }
                    return Err(e);
                }
            };

            if res.status() != 307 {
                return Ok(res);
            }

            let location = res.header("Location").unwrap_or_default().trim().to_string();
            if location.is_empty() {
                return Err(Error::InvalidUrl(format!("307 without Location from {}", req.url)));
            }
            let next = req.url.join(&location)?;
            via.push(req.url.to_string());
            if via.contains(&next.to_string()) {
                warn!(via = ?via, to = %next, "redirect loop");
                return Err(Error::InvalidUrl(format!("redirect loop at {}", next)));
            }
            req.rewind()?;
            debug!(from = %req.url, to = %next, hops = via.len(), "following redirect");

            req.url = next;
            req.headers
                .retain(|(k, _)| REPLAY_HEADERS.contains(&k.to_ascii_lowercase().as_str()));
        }
    }

    fn send_once(&self, req: &mut HttpRequest<'_>, creds: Option<&RequestCreds>) -> Result<ureq::Response> {
        let mut url = req.url.clone();
        // userinfo is sent as an Authorization header, never in the URL
        let _ = url.set_username("");
        let _ = url.set_password(None);

        debug!(method = req.method, url = %url, "HTTP request");
        let mut builder = self.inner.agent.request(req.method, url.as_str());
        for (key, value) in &req.headers {
            builder = builder.set(key, value);
        }
        if let Some(auth) = creds.and_then(|c| c.creds.basic_auth()) {
            builder = builder.set("Authorization", &auth);
        }

        let result = match &mut req.body {
            Body::Empty => builder.call(),
            Body::Bytes(bytes) => builder.send_bytes(bytes),
            Body::Seekable(r) => builder.send(&mut **r),
            Body::Stream(r) => builder.send(&mut **r),
        };

        let res = match result {
            Ok(res) => res,
            Err(ureq::Error::Status(_, res)) => res,
            Err(e) => {
                return Err(Error::Network {
                    method: req.method.to_string(),
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
        };
        debug!(status = res.status(), url = %url, "HTTP response");

        self.save_credentials(creds, res.status());

        if res.status() >= 400 {
            return Err(error_from_response(&url, res));
        }
        Ok(res)
    }

    fn request_credentials(&self, req: &HttpRequest<'_>, mode: CredsMode) -> Result<Option<RequestCreds>> {
        if req.get_header("Authorization").is_some() {
            return Ok(None);
        }

        if let Some(creds) = Credentials::from_url_userinfo(&req.url) {
            warn!("current Git remote contains credentials");
            return Ok(Some(RequestCreds {
                creds,
                from_helper: false,
            }));
        }

        let endpoint = self.endpoint()?;
        if !self.inner.config.private_access(&endpoint) {
            return Ok(None);
        }

        if mode == CredsMode::Storage {
            let api = Url::parse(&endpoint.url)?;
            if api.scheme() != req.url.scheme() || api.host_str() != req.url.host_str() {
                return Ok(None);
            }
        }

        let creds = self.inner.credentials.fill(&Credentials::for_url(&req.url))?;
        Ok(Some(RequestCreds {
            creds,
            from_helper: true,
        }))
    }

    fn save_credentials(&self, creds: Option<&RequestCreds>, status: u16) {
        let Some(creds) = creds.filter(|c| c.from_helper) else {
            return;
        };
        let result = if status < 300 {
            self.inner.credentials.approve(&creds.creds)
        } else if status == 401 || status == 403 {
            self.inner.credentials.reject(&creds.creds)
        } else {
            Ok(())
        };
        if let Err(e) = result {
            warn!(error = %e, "credential helper failed");
        }
    }
}

/// A 401 that outlives the credential upgrade is an ordinary status error.
fn auth_as_status(err: Error) -> Error {
    match err {
        Error::AuthRequired { message } => Error::HttpStatus { code: 401, message },
        e => e,
    }
}

fn storage_request<'a>(method: &'static str, rel: &LinkRelation) -> Result<HttpRequest<'a>> {
    let mut req = HttpRequest::new(method, Url::parse(&rel.href)?);
    for (key, value) in &rel.header {
        req.set_header(key, value);
    }
    Ok(req)
}

fn is_json_media_type(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    ct == "application/vnd.git-lfs+json" || ct == "application/json"
}

/// Decode a JSON API body. Non-JSON or empty bodies decode to `None`.
fn decode_api_response<T: DeserializeOwned>(res: ureq::Response) -> Result<Option<T>> {
    if !is_json_media_type(res.content_type()) {
        drain(res);
        return Ok(None);
    }
    let mut body = String::new();
    res.into_reader().read_to_string(&mut body)?;
    if body.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&body)?))
}

fn error_from_response(url: &Url, res: ureq::Response) -> Error {
    let code = res.status();
    let message = decode_api_response::<ClientError>(res)
        .ok()
        .flatten()
        .filter(|e| !e.message.is_empty())
        .map(|e| e.to_string())
        .unwrap_or_else(|| default_error(code, url));
    Error::from_status(code, message)
}

/// Templated message for an error status without a usable body.
pub fn default_error(code: u16, url: &Url) -> String {
    match code {
        400 => format!("Client error: {}", url),
        401 | 403 => format!(
            "Authorization error: {}\nCheck that you have proper access to the repository",
            url
        ),
        404 => format!(
            "Repository or object not found: {}\nCheck that it exists and that you have proper access to it",
            url
        ),
        500 => format!("Server error: {}", url),
        c if c < 500 => format!("Client error: {} from HTTP {}", url, c),
        c => format!("Server error: {} from HTTP {}", url, c),
    }
}

fn drain(res: ureq::Response) {
    let _ = std::io::copy(&mut res.into_reader(), &mut std::io::sink());
}

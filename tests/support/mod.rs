//! Shared fixtures: an in-process LFS server and fake git collaborators.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lfs_transfer::{
    ApiClient, Config, Error, GitRef, GitScanner, LocalStore, NoSsh, Oid, Pointer, Result,
    WorkingCopy, WrappedPointer,
};
use parking_lot::Mutex;

/// A request as the mock server saw it.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    /// Header names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// A scripted response.
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        MockResponse {
            status,
            headers: vec![(
                "Content-Type".into(),
                "application/vnd.git-lfs+json".into(),
            )],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn empty(status: u16) -> Self {
        MockResponse {
            status,
            headers: vec![],
            body: vec![],
        }
    }

    pub fn bytes(body: &[u8]) -> Self {
        MockResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "application/octet-stream".into())],
            body: body.to_vec(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        MockResponse {
            status: 307,
            headers: vec![("Location".into(), location.into())],
            body: vec![],
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let reason = match self.status {
            200 => "OK",
            202 => "Accepted",
            307 => "Temporary Redirect",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            _ => "Status",
        };
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason);
        for (k, v) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", k, v));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Mock LFS server for testing.
///
/// Listens on a random port and answers every request with the handler's
/// response. The handler receives the request and the server's base URL.
pub struct MockLfsServer {
    port: u16,
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<Vec<MockRequest>>>,
}

impl MockLfsServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&MockRequest, &str) -> MockResponse + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let base = format!("http://127.0.0.1:{}", port);
        let (shutdown_tx, shutdown_rx) = mpsc::channel();

        // Set socket to non-blocking for graceful shutdown
        listener.set_nonblocking(true).unwrap();

        let handle = thread::spawn(move || {
            let mut requests = Vec::new();

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                match listener.accept() {
                    Ok((mut stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        stream
                            .set_read_timeout(Some(Duration::from_secs(5)))
                            .unwrap();

                        if let Some(request) = read_request(&mut stream) {
                            let response = handler(&request, &base);
                            let _ = stream.write_all(&response.to_bytes());
                            let _ = stream.flush();
                            requests.push(request);
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }

            requests
        });

        MockLfsServer {
            port,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn base(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Clone URL of the test repository.
    pub fn url(&self) -> String {
        format!("{}/test/repo.git", self.base())
    }

    /// Stop the server and return the requests it served, in order.
    pub fn stop(mut self) -> Vec<MockRequest> {
        let _ = self.shutdown_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => vec![],
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Option<MockRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut first = lines.next()?.split_whitespace();
    let method = first.next()?.to_string();
    let path = first.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(MockRequest {
        method,
        path,
        headers,
        body,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A batch response object with a download action pointing at the server.
pub fn download_action(base: &str, oid: &str, size: u64) -> String {
    format!(
        r#"{{"oid":"{oid}","size":{size},"actions":{{"download":{{"href":"{base}/storage/{oid}"}}}}}}"#
    )
}

pub fn batch_body(objects: &[String]) -> String {
    format!(r#"{{"transfer":"basic","objects":[{}]}}"#, objects.join(","))
}

/// Client for `origin` at the server's test repository.
pub fn client_for(server: &MockLfsServer, config: Config) -> (Arc<Config>, ApiClient) {
    let config = Arc::new(config.with_remote("origin", &server.url()));
    let client = ApiClient::new(Arc::clone(&config), "origin").with_ssh(Arc::new(NoSsh));
    (config, client)
}

/// Put `content` into the store and return its pointer.
pub fn store_object(store: &LocalStore, content: &[u8]) -> Pointer {
    let pointer = Pointer::from_content(content);
    let mut w = store.writer(pointer.oid(), pointer.size()).unwrap();
    w.write_all(content).unwrap();
    w.finish(store).unwrap();
    pointer
}

pub fn wrapped(name: &str, pointer: &Pointer) -> WrappedPointer {
    WrappedPointer::new(name, pointer.clone())
}

/// Scripted git history.
pub struct FakeScanner {
    pub head: GitRef,
    /// Tree pointers by commit SHA.
    pub trees: HashMap<String, Vec<WrappedPointer>>,
    /// Previous versions by commit SHA.
    pub previous: HashMap<String, Vec<WrappedPointer>>,
    pub refs: Vec<GitRef>,
    pub unpushed: Vec<WrappedPointer>,
    pub worktree: Vec<WrappedPointer>,
    pub remote: Vec<WrappedPointer>,
    /// Scans that fail: "tree", "refs", "unpushed", "worktree", "remote".
    pub failing: HashSet<&'static str>,
    /// `since` arguments passed to `scan_previous_versions`.
    pub previous_since: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeScanner {
    pub fn new(head_tree: Vec<WrappedPointer>) -> Self {
        let head = GitRef::new("refs/heads/main", "c0ffee", Utc::now());
        let mut trees = HashMap::new();
        trees.insert(head.sha.clone(), head_tree);
        FakeScanner {
            head,
            trees,
            previous: HashMap::new(),
            refs: vec![],
            unpushed: vec![],
            worktree: vec![],
            remote: vec![],
            failing: HashSet::new(),
            previous_since: Mutex::new(vec![]),
        }
    }

    pub fn with_ref(mut self, r: GitRef, tree: Vec<WrappedPointer>) -> Self {
        self.trees.insert(r.sha.clone(), tree);
        self.refs.push(r);
        self
    }

    fn check(&self, scan: &str) -> Result<()> {
        if self.failing.contains(scan) {
            return Err(Error::Git(format!("{} scan failed", scan)));
        }
        Ok(())
    }
}

impl GitScanner for FakeScanner {
    fn current_ref(&self) -> Result<GitRef> {
        Ok(self.head.clone())
    }

    fn scan_tree(&self, rev: &str) -> Result<Vec<WrappedPointer>> {
        self.check("tree")?;
        Ok(self.trees.get(rev).cloned().unwrap_or_default())
    }

    fn scan_previous_versions(&self, rev: &str, since: DateTime<Utc>) -> Result<Vec<WrappedPointer>> {
        self.previous_since.lock().push(since);
        Ok(self.previous.get(rev).cloned().unwrap_or_default())
    }

    fn recent_refs(&self, since: DateTime<Utc>, include_remote: bool) -> Result<Vec<GitRef>> {
        self.check("refs")?;
        let mut refs: Vec<GitRef> = self
            .refs
            .iter()
            .filter(|r| r.commit_date > since)
            .filter(|r| include_remote || !r.is_remote())
            .cloned()
            .collect();
        if self.head.commit_date > since {
            refs.push(self.head.clone());
        }
        Ok(refs)
    }

    fn scan_unpushed(&self, _remote: &str) -> Result<Vec<WrappedPointer>> {
        self.check("unpushed")?;
        Ok(self.unpushed.clone())
    }

    fn scan_worktree(&self) -> Result<Vec<WrappedPointer>> {
        self.check("worktree")?;
        Ok(self.worktree.clone())
    }

    fn scan_remote_refs(&self, _remote: &str) -> Result<Vec<WrappedPointer>> {
        self.check("remote")?;
        Ok(self.remote.clone())
    }
}

/// Working copy rooted in a directory; index updates are recorded.
pub struct DirWorkingCopy {
    pub root: std::path::PathBuf,
    pub indexed: Mutex<Vec<String>>,
}

impl DirWorkingCopy {
    pub fn new(root: &Path) -> Self {
        DirWorkingCopy {
            root: root.to_path_buf(),
            indexed: Mutex::new(vec![]),
        }
    }
}

impl WorkingCopy for DirWorkingCopy {
    fn read_pointer(&self, path: &str) -> Result<Option<Pointer>> {
        match std::fs::read(self.root.join(path)) {
            Ok(content) => Pointer::parse(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, path: &str, _pointer: &Pointer, content: &Path) -> Result<()> {
        let dest = self.root.join(path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(content, dest)?;
        Ok(())
    }

    fn update_index(&self, paths: &[String]) -> Result<()> {
        self.indexed.lock().extend(paths.iter().cloned());
        Ok(())
    }
}

pub fn oid_of(content: &[u8]) -> String {
    Oid::from_content(content).to_hex()
}

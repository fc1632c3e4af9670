//! Scripted stand-in for the LXD socket.
//!
//! Each accepted connection consumes the next canned reply; once the script
//! is exhausted the listener is dropped and further connections fail.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

/// One request as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

pub struct MockLxd {
    _dir: TempDir,
    path: PathBuf,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockLxd {
    /// Serves `replies` in order, one connection each. Must run inside a runtime.
    pub fn start(replies: Vec<Vec<u8>>) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("lxd.sock");
        let listener = UnixListener::bind(&path).expect("bind mock socket");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            for reply in replies {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let mut reader = BufReader::new(stream);
                if let Some(request) = read_request(&mut reader).await {
                    recorded.lock().unwrap().push(request);
                }
                let stream = reader.get_mut();
                let _ = stream.write_all(&reply).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            _dir: dir,
            path,
            requests,
            handle,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Request lines (`METHOD path`) received so far.
    pub fn request_lines(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

impl Drop for MockLxd {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request<R>(reader: &mut BufReader<R>) -> Option<RecordedRequest>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.ok()?;

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

/// A reply with the given status line code and raw body.
pub fn reply(status: u16, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// A `200 OK` reply carrying `value`.
pub fn json_reply(value: Value) -> Vec<u8> {
    reply(200, &value.to_string())
}

/// A sync answer wrapping `metadata`, as LXD sends it.
pub fn sync(metadata: Value) -> Vec<u8> {
    json_reply(serde_json::json!({
        "type": "sync",
        "status": "Success",
        "status_code": 200,
        "operation": "",
        "error_code": 0,
        "error": "",
        "metadata": metadata,
    }))
}

/// An async answer naming a background operation.
pub fn operation_handle(id: &str) -> Vec<u8> {
    reply(
        202,
        &serde_json::json!({
            "type": "async",
            "status": "Operation created",
            "status_code": 100,
            "operation": format!("/1.0/operations/{id}"),
            "error_code": 0,
            "error": "",
            "metadata": {"id": id, "class": "task", "status": "Running", "status_code": 103},
        })
        .to_string(),
    )
}

/// The `/wait` answer for a finished operation.
pub fn operation_done(id: &str, status_code: i64, err: &str) -> Vec<u8> {
    let status = if status_code < 400 { "Success" } else { "Failure" };
    sync(serde_json::json!({
        "id": id,
        "class": "task",
        "status": status,
        "status_code": status_code,
        "err": err,
    }))
}

/// A container state answer with the given `eth0` addresses.
pub fn state_with_addresses(addresses: Value) -> Vec<u8> {
    sync(serde_json::json!({
        "status": "Running",
        "status_code": 103,
        "network": {
            "eth0": {"addresses": addresses, "state": "up"},
            "lo": {"addresses": [{"family": "inet", "address": "127.0.0.1"}]}
        }
    }))
}

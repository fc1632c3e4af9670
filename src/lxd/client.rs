//! Request/response exchange with the control plane.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::LxdError;
use crate::lxd::answer::Answer;
use crate::lxd::framing::{encode_request, Method, ResponseHead};
use crate::lxd::transport::UnixTransport;

/// Client for the control-plane socket.
///
/// Every call dials a new connection, sends one request, reads one answer
/// and closes the connection. Answers naming a background operation are
/// resolved before they are returned, so callers only ever see terminal
/// answers.
#[derive(Debug, Clone)]
pub struct LxdClient {
    socket_path: PathBuf,
}

impl LxdClient {
    /// Creates a client for the socket at `socket_path`. Nothing is dialed yet.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn get(&self, path: &str) -> Result<Answer, LxdError> {
        self.send(Method::Get, path, None).await
    }

    pub async fn post(&self, path: &str, body: &[u8]) -> Result<Answer, LxdError> {
        self.send(Method::Post, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &[u8]) -> Result<Answer, LxdError> {
        self.send(Method::Put, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Answer, LxdError> {
        self.send(Method::Delete, path, None).await
    }

    /// Sends one request and returns its terminal answer.
    ///
    /// # Errors
    ///
    /// Connection, transport, framing and JSON decode failures are returned
    /// as `LxdError`. HTTP statuses outside `1..=399` are not errors: they
    /// produce a synthetic answer with `status` 999 (see
    /// [`Answer::transport_failure`]).
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
    ) -> Result<Answer, LxdError> {
        let mut conn = UnixTransport::connect(&self.socket_path).await?;

        let request = encode_request(method, path, body);
        debug!(
            method = %method,
            path = path,
            body_len = body.map_or(0, <[u8]>::len),
            "Sending request"
        );
        conn.write_all(&request).await?;

        let answer = read_answer(&mut conn).await?;
        conn.close().await;

        let answer = match answer.operation() {
            Some(operation) => {
                let operation = operation.to_string();
                debug!(path = path, operation = %operation, "Answer is an operation handle");
                self.wait_operation(&operation).await?
            }
            None => answer,
        };

        debug!(path = path, answer = %answer.as_value(), "Answer received");
        Ok(answer)
    }

    /// Blocks until the background `operation` finishes and returns its record.
    ///
    /// Always dials a new connection. The wait reply is returned as-is, even if
    /// it names another operation.
    pub async fn wait_operation(&self, operation: &str) -> Result<Answer, LxdError> {
        let mut conn = UnixTransport::connect(&self.socket_path).await?;

        let path = format!("{}/wait", operation.trim_end_matches('/'));
        debug!(path = %path, "Waiting for operation");
        conn.write_all(&encode_request(Method::Get, &path, None))
            .await?;

        let answer = read_answer(&mut conn).await;
        conn.close().await;
        answer
    }
}

/// Reads a reply head and, for successful statuses, its exact-length body.
async fn read_answer(conn: &mut UnixTransport) -> Result<Answer, LxdError> {
    let head = read_head(conn).await?;

    if !head.is_success() {
        // Body of a failed exchange may be malformed; it is never read.
        let length = head.content_length().ok().flatten().unwrap_or(0);
        debug!(
            status = head.status_or_zero(),
            length = length,
            "Reply status outside 1..=399"
        );
        return Ok(Answer::transport_failure(head.status_or_zero(), length));
    }

    let length = head
        .content_length()?
        .ok_or_else(|| LxdError::Protocol("reply has no Content-Length".to_string()))?;
    debug!(status = head.status_or_zero(), length = length, "Reading body");

    let body = conn.read_exact(length).await?;
    Ok(Answer::from_slice(&body)?)
}

async fn read_head(conn: &mut UnixTransport) -> Result<ResponseHead, LxdError> {
    let mut head = ResponseHead::default();
    while let Some(line) = conn.read_line().await? {
        if line.is_empty() {
            break;
        }
        head.push_line(&line)?;
    }
    Ok(head)
}

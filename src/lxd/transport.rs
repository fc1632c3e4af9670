//! Byte-level access to the control-plane socket.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::trace;

use crate::error::LxdError;

const INITIAL_BODY_CAPACITY: usize = 8 * 1024;

/// One Unix stream connection to the control plane.
///
/// A transport carries exactly one request/response exchange and is closed
/// afterwards. There are no read or write timeouts.
#[derive(Debug)]
pub struct UnixTransport {
    reader: BufReader<UnixStream>,
    path: PathBuf,
}

impl UnixTransport {
    /// Opens a new connection to the socket at `path`.
    ///
    /// # Errors
    ///
    /// Returns `LxdError::Connection` if the socket is absent or refuses.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, LxdError> {
        let path = path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&path)
            .await
            .map_err(|source| LxdError::Connection {
                path: path.clone(),
                source,
            })?;

        trace!(socket = %path.display(), "Connected");

        Ok(Self {
            reader: BufReader::new(stream),
            path,
        })
    }

    /// Returns the socket path this transport was dialed to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the whole buffer and flushes it.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), LxdError> {
        let stream = self.reader.get_mut();
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads one line with its CR/LF terminator stripped.
    ///
    /// Returns `None` once the peer has closed the connection.
    pub async fn read_line(&mut self) -> Result<Option<String>, LxdError> {
        let mut line = String::new();
        let read = match self.reader.read_line(&mut line).await {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(LxdError::Protocol(
                    "reply head is not valid UTF-8".to_string(),
                ))
            }
            Err(e) => return Err(LxdError::Transport(e)),
        };
        if read == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(&['\r', '\n'][..]).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    /// Reads exactly `len` bytes.
    ///
    /// The buffer grows with the data actually received, so a bogus length
    /// cannot force a huge allocation up front.
    ///
    /// # Errors
    ///
    /// A connection that closes early is a `LxdError::Protocol`; the body is
    /// never returned truncated.
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, LxdError> {
        let mut buf = Vec::with_capacity(len.min(INITIAL_BODY_CAPACITY));
        (&mut self.reader)
            .take(len as u64)
            .read_to_end(&mut buf)
            .await?;

        if buf.len() < len {
            return Err(LxdError::Protocol(format!(
                "truncated body: expected {len} bytes, got {}",
                buf.len()
            )));
        }
        Ok(buf)
    }

    /// Shuts the connection down.
    pub async fn close(mut self) {
        if let Err(e) = self.reader.get_mut().shutdown().await {
            trace!(socket = %self.path.display(), error = %e, "Shutdown failed");
        }
    }
}

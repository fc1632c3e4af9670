//! Minimal LXD control-plane client over a Unix domain socket.
//!
//! Requests are framed as plain HTTP/1.1 on a fresh socket per call; replies
//! are read with an exact Content-Length and decoded as JSON. Long-running
//! actions answer with an operation handle, which the client resolves by
//! issuing `GET {operation}/wait` on a newly dialed socket before returning.
//!
//! ```text
//! caller ──► LxdClient ──► UnixTransport ──► unix.socket
//!               │
//!               └─ operation? ──► wait_operation ──► new UnixTransport
//! ```
//!
//! # Example
//!
//! ```ignore
//! use lxd_site_manager::lxd::LxdClient;
//!
//! let client = LxdClient::new("/var/snap/lxd/common/lxd/unix.socket");
//! let answer = client.get("/1.0/containers").await?;
//! println!("{:?}", answer.metadata());
//! ```

pub mod answer;
pub mod client;
pub mod framing;
pub mod transport;

pub use answer::{Answer, AnswerKind};
pub use client::LxdClient;
pub use framing::{Method, ResponseHead};
pub use transport::UnixTransport;

/// Default location of the LXD socket on snap installations.
pub const DEFAULT_SOCKET_PATH: &str = "/var/snap/lxd/common/lxd/unix.socket";

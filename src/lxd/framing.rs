//! HTTP/1.1 request framing and response-head parsing.
//!
//! Only the subset the control plane speaks is supported: a request line,
//! a fixed header set, an optional body and a reply whose body size is given
//! by `Content-Length`. There is no chunked encoding and no keep-alive.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::LxdError;

/// Value sent in the `Host` header; the socket has no real host name.
pub const HOST: &str = "lxd";

/// Value sent in the `User-Agent` header.
pub const USER_AGENT: &str = concat!("lxd-site-manager/", env!("CARGO_PKG_VERSION"));

/// Upper bound on the number of header lines accepted in one reply.
const MAX_HEADER_LINES: usize = 100;

/// HTTP methods used against the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializes a complete request, body included.
pub fn encode_request(method: Method, path: &str, body: Option<&[u8]>) -> Vec<u8> {
    let body = body.unwrap_or_default();
    let head = format!(
        "{method} {path} HTTP/1.1\r\n\
         Host: {HOST}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Accept: */*\r\n\
         Content-Length: {}\r\n\
         Content-Type: application/json\r\n\
         \r\n",
        body.len()
    );

    let mut bytes = Vec::with_capacity(head.len() + body.len());
    bytes.extend_from_slice(head.as_bytes());
    bytes.extend_from_slice(body);
    bytes
}

fn status_line_regex() -> &'static Regex {
    static STATUS_LINE: OnceLock<Regex> = OnceLock::new();
    STATUS_LINE.get_or_init(|| {
        Regex::new(r"^HTTP/[0-9.]+ +(\d{1,3})\b").expect("status line pattern is valid")
    })
}

/// Extracts the numeric status from a status line such as `HTTP/1.1 200 OK`.
pub fn parse_status_line(line: &str) -> Option<u16> {
    status_line_regex()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Splits a `Name: value` header line.
pub fn parse_header(line: &str) -> Option<(String, String)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Status line and headers of a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    /// Numeric status, `None` if the status line was absent or malformed.
    pub status: Option<u16>,
    /// Headers in the order received.
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Feeds one non-empty line of the reply head.
    ///
    /// The first line is the status line; every later line is a header.
    pub fn push_line(&mut self, line: &str) -> Result<(), LxdError> {
        if self.status.is_none() && self.headers.is_empty() {
            if let Some(status) = parse_status_line(line) {
                self.status = Some(status);
                return Ok(());
            }
        }

        if self.headers.len() >= MAX_HEADER_LINES {
            return Err(LxdError::Protocol(format!(
                "more than {MAX_HEADER_LINES} header lines"
            )));
        }

        if let Some(header) = parse_header(line) {
            self.headers.push(header);
        }
        Ok(())
    }

    /// Returns the first header with the given name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parses the declared body length.
    ///
    /// # Errors
    ///
    /// A non-numeric `Content-Length` is a `LxdError::Protocol`.
    pub fn content_length(&self) -> Result<Option<usize>, LxdError> {
        self.header("Content-Length")
            .map(|raw| {
                raw.parse::<usize>().map_err(|_| {
                    LxdError::Protocol(format!("invalid Content-Length '{raw}'"))
                })
            })
            .transpose()
    }

    /// Status code as observed, `0` when absent.
    pub fn status_or_zero(&self) -> u16 {
        self.status.unwrap_or(0)
    }

    /// True for statuses in `1..=399`.
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(1..=399))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request_with_body() {
        let bytes = encode_request(Method::Post, "/1.0/containers", Some(br#"{"name":"x"}"#));
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("POST /1.0/containers HTTP/1.1\r\n"));
        assert!(text.contains("Host: lxd\r\n"));
        assert!(text.contains("Accept: */*\r\n"));
        assert!(text.contains("Content-Length: 12\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"name\":\"x\"}"));
    }

    #[test]
    fn test_encode_request_without_body() {
        let text = String::from_utf8(encode_request(Method::Get, "/1.0/images", None)).unwrap();

        assert!(text.starts_with("GET /1.0/images HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK"), Some(200));
        assert_eq!(parse_status_line("HTTP/1.0 404 Not Found"), Some(404));
        assert_eq!(parse_status_line("HTTP/1.1 100"), Some(100));
        assert_eq!(parse_status_line("garbage"), None);
        assert_eq!(parse_status_line("HTTP/1.1 abc"), None);
    }

    #[test]
    fn test_response_head_collects_headers() {
        let mut head = ResponseHead::default();
        head.push_line("HTTP/1.1 202 Accepted").unwrap();
        head.push_line("Content-Type: application/json").unwrap();
        head.push_line("content-length: 17").unwrap();

        assert_eq!(head.status, Some(202));
        assert!(head.is_success());
        assert_eq!(head.headers.len(), 2);
        assert_eq!(head.content_length().unwrap(), Some(17));
        assert_eq!(head.header("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn test_response_head_without_status() {
        let mut head = ResponseHead::default();
        head.push_line("Content-Length: 3").unwrap();

        assert_eq!(head.status, None);
        assert_eq!(head.status_or_zero(), 0);
        assert!(!head.is_success());
    }

    #[test]
    fn test_response_head_error_statuses() {
        for (line, success) in [
            ("HTTP/1.1 399 Whatever", true),
            ("HTTP/1.1 400 Bad Request", false),
            ("HTTP/1.1 500 Internal Server Error", false),
        ] {
            let mut head = ResponseHead::default();
            head.push_line(line).unwrap();
            assert_eq!(head.is_success(), success, "{line}");
        }
    }

    #[test]
    fn test_invalid_content_length() {
        let mut head = ResponseHead::default();
        head.push_line("HTTP/1.1 200 OK").unwrap();
        head.push_line("Content-Length: lots").unwrap();

        assert!(matches!(head.content_length(), Err(LxdError::Protocol(_))));
    }

    #[test]
    fn test_too_many_headers() {
        let mut head = ResponseHead::default();
        head.push_line("HTTP/1.1 200 OK").unwrap();
        for i in 0..MAX_HEADER_LINES {
            head.push_line(&format!("X-Header-{i}: v")).unwrap();
        }
        assert!(head.push_line("X-One-More: v").is_err());
    }
}

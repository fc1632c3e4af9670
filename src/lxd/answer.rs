//! Decoded control-plane answers.

use serde_json::{json, Map, Value};

/// Status reported by synthetic answers for replies outside `1..=399`.
pub const TRANSPORT_FAILURE_STATUS: i64 = 999;

/// A decoded JSON answer from the control plane.
///
/// Answers are kept as raw JSON so that list endpoints can hand back their
/// `metadata` verbatim. [`Answer::kind`] gives the classified view.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer(Value);

/// Classified view of an [`Answer`], decided once from its shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerKind<'a> {
    /// `null` or `{}`.
    Empty,
    /// Background task reference to be resolved with `{operation}/wait`.
    OperationHandle(&'a str),
    /// Synthetic answer for a reply whose status was outside `1..=399`.
    TransportFailure { original_status: i64, length: i64 },
    /// An error answer from the control plane itself.
    ErrorAnswer { code: i64, message: &'a str },
    /// A collection listing (images, profiles, containers...).
    List(&'a [Value]),
    /// A single resource or operation record.
    Resource(&'a Map<String, Value>),
    /// Anything else, such as a sync answer with `null` metadata.
    Other,
}

impl Answer {
    /// Wraps already decoded JSON.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Decodes a reply body; an empty body is an empty object.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::empty());
        }
        serde_json::from_slice(body).map(Self)
    }

    /// The empty answer `{}`.
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Synthetic answer standing in for a failed HTTP exchange.
    pub fn transport_failure(original_status: u16, length: usize) -> Self {
        Self(json!({
            "status": TRANSPORT_FAILURE_STATUS,
            "original_status": original_status,
            "length": length,
        }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// True for `null` and `{}`.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Non-empty `operation` field, if any.
    pub fn operation(&self) -> Option<&str> {
        self.0
            .get("operation")
            .and_then(Value::as_str)
            .filter(|op| !op.is_empty())
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.0.get("metadata").filter(|m| !m.is_null())
    }

    /// Top-level `status` field as a number, if numeric.
    pub fn status(&self) -> Option<i64> {
        self.0.get("status").and_then(Value::as_i64)
    }

    pub fn status_code(&self) -> Option<i64> {
        self.0.get("status_code").and_then(Value::as_i64)
    }

    /// HTTP status preserved in synthetic transport-failure answers.
    pub fn original_status(&self) -> Option<i64> {
        self.0.get("original_status").and_then(Value::as_i64)
    }

    /// `metadata.status_code`, as reported for resources and operations.
    pub fn metadata_status_code(&self) -> Option<i64> {
        self.metadata()
            .and_then(|m| m.get("status_code"))
            .and_then(Value::as_i64)
    }

    pub fn error_code(&self) -> Option<i64> {
        self.0.get("error_code").and_then(Value::as_i64)
    }

    /// Error message, from the answer or from the operation record it wraps.
    pub fn error(&self) -> Option<&str> {
        let top = self.0.get("error").and_then(Value::as_str);
        let nested = self
            .metadata()
            .and_then(|m| m.get("err"))
            .and_then(Value::as_str);
        top.filter(|e| !e.is_empty())
            .or(nested.filter(|e| !e.is_empty()))
    }

    /// Short human description of why this answer is not a success.
    pub fn describe_failure(&self) -> String {
        match self.kind() {
            AnswerKind::Empty => "empty answer".to_string(),
            AnswerKind::TransportFailure {
                original_status, ..
            } => format!("HTTP status {original_status}"),
            AnswerKind::ErrorAnswer { code, message } => format!("error {code}: {message}"),
            _ => match (self.metadata_status_code(), self.error()) {
                (_, Some(message)) => message.to_string(),
                (Some(code), None) => format!("status code {code}"),
                (None, None) => "unexpected answer".to_string(),
            },
        }
    }

    /// Classifies the answer by its shape.
    pub fn kind(&self) -> AnswerKind<'_> {
        if self.is_empty() {
            return AnswerKind::Empty;
        }
        if let Some(op) = self.operation() {
            return AnswerKind::OperationHandle(op);
        }
        if self.status() == Some(TRANSPORT_FAILURE_STATUS) {
            if let Some(original_status) = self.original_status() {
                return AnswerKind::TransportFailure {
                    original_status,
                    length: self.0.get("length").and_then(Value::as_i64).unwrap_or(0),
                };
            }
        }
        if let Some(code) = self.error_code().filter(|c| *c >= 400) {
            return AnswerKind::ErrorAnswer {
                code,
                message: self.error().unwrap_or_default(),
            };
        }
        match self.metadata() {
            Some(Value::Array(items)) => AnswerKind::List(items),
            Some(Value::Object(map)) => AnswerKind::Resource(map),
            _ => AnswerKind::Other,
        }
    }

    /// `metadata` as a list, order preserved; empty for any other shape.
    pub fn list(&self) -> Vec<Value> {
        match self.kind() {
            AnswerKind::List(items) => items.to_vec(),
            _ => Vec::new(),
        }
    }
}

impl From<Value> for Answer {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

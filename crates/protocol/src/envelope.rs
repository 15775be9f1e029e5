use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message exchanged on the stdio bus or the broker's local gateway endpoint.
///
/// Wire shape is externally tagged on `type`, matching the four kinds the fabric defines:
/// `request`, `response`, `event`, `error`. `id` is a correlation token chosen by whoever
/// issues the request; the router never reinterprets it, only echoes or forwards it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Request {
        id: String,
        method: String,
        #[serde(default)]
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Response {
        id: String,
        method: String,
        #[serde(default)]
        payload: Value,
    },
    Event {
        topic: String,
        #[serde(default)]
        payload: Value,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        code: ErrorCode,
        message: String,
    },
}

impl Envelope {
    pub fn request(id: impl Into<String>, method: impl Into<String>, payload: Value) -> Self {
        Envelope::Request {
            id: id.into(),
            method: method.into(),
            payload,
            target: None,
            timeout_ms: None,
        }
    }

    pub fn request_to(
        id: impl Into<String>,
        method: impl Into<String>,
        payload: Value,
        target: impl Into<String>,
        timeout_ms: Option<u64>,
    ) -> Self {
        Envelope::Request {
            id: id.into(),
            method: method.into(),
            payload,
            target: Some(target.into()),
            timeout_ms,
        }
    }

    pub fn response(id: impl Into<String>, method: impl Into<String>, payload: Value) -> Self {
        Envelope::Response {
            id: id.into(),
            method: method.into(),
            payload,
        }
    }

    pub fn event(topic: impl Into<String>, payload: Value) -> Self {
        Envelope::Event {
            topic: topic.into(),
            payload,
        }
    }

    pub fn error(id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Envelope::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// The correlation id carried by this envelope, if any.
    ///
    /// Events have no correlation id; they are fire-and-forget by definition.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Envelope::Request { id, .. } | Envelope::Response { id, .. } => Some(id.as_str()),
            Envelope::Error { id, .. } => id.as_deref(),
            Envelope::Event { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request { method, .. } | Envelope::Response { method, .. } => {
                Some(method.as_str())
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Request { .. } => "request",
            Envelope::Response { .. } => "response",
            Envelope::Event { .. } => "event",
            Envelope::Error { .. } => "error",
        }
    }
}

/// The fabric's error taxonomy (§7 of the spec). Serialized as its snake_case name on the wire.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    DuplicateId,
    Timeout,
    ChildExited,
    Transport,
    Upstream,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "validation",
            ErrorCode::NotFound => "not_found",
            ErrorCode::DuplicateId => "duplicate_id",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ChildExited => "child_exited",
            ErrorCode::Transport => "transport",
            ErrorCode::Upstream => "upstream",
            ErrorCode::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

use thiserror::Error;

use protocol::ErrorCode;

/// Errors a handler or the outbound `Invoke` primitive can surface (§4.E, §7).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("missing or invalid parameter: {0}")]
    Validation(String),
    #[error("no handler registered for method `{0}`")]
    UnknownMethod(String),
    #[error("invoke to `{target}` timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },
    #[error("stdio transport to the broker closed")]
    TransportClosed,
    #[error("broker reported an error for `{method}`: {message}")]
    Upstream { method: String, message: String },
    #[error("handler for `{0}` failed: {1}")]
    Handler(String, String),
}

impl HandlerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HandlerError::Validation(_) => ErrorCode::Validation,
            HandlerError::UnknownMethod(_) => ErrorCode::NotFound,
            HandlerError::Timeout { .. } => ErrorCode::Timeout,
            HandlerError::TransportClosed => ErrorCode::ChildExited,
            HandlerError::Upstream { .. } => ErrorCode::Upstream,
            HandlerError::Handler(..) => ErrorCode::Internal,
        }
    }
}

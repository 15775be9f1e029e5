use axum::http::StatusCode;
use thiserror::Error;

use protocol::ErrorCode;

/// Errors the gateway itself can raise, distinct from errors the broker reports back over the
/// wire (those are mapped straight into the uniform `{retcode, message, payload}` envelope by
/// the route handlers instead, per §4.F).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to connect to the broker's local endpoint at `{path}`: {source}")]
    Connect {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connection to the broker closed")]
    Disconnected,
    #[error("request to the broker timed out after {0}ms")]
    Timeout(u64),
}

/// Maps a wire [`ErrorCode`] to the HTTP status a resource-oriented route should answer with
/// (§4.F: "process-management routes may return HTTP 4xx/5xx directly").
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation | ErrorCode::DuplicateId => StatusCode::BAD_REQUEST,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::ChildExited | ErrorCode::Transport => StatusCode::BAD_GATEWAY,
        ErrorCode::Upstream | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Same idea as [`status_for`], but for failures that never made it to the broker at all.
pub fn status_for_local(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::Connect { .. } | GatewayError::Disconnected => StatusCode::BAD_GATEWAY,
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

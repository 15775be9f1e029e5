use thiserror::Error;

use protocol::ErrorCode;

/// Errors surfaced by the router, supervisor, and broker-side transports.
///
/// Every variant maps onto exactly one wire [`ErrorCode`] via [`BrokerError::code`], so a
/// handler failure can be turned into an `Envelope::Error` without losing its taxonomy.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("missing or invalid parameter: {0}")]
    Validation(String),
    #[error("process `{0}` is not known to the supervisor")]
    UnknownProcess(String),
    #[error("no handler registered for method `{0}`")]
    UnknownMethod(String),
    #[error("process id `{0}` is already live")]
    DuplicateId(String),
    #[error("request timed out after {0}ms")]
    Timeout(u64),
    #[error("target process `{0}` exited before replying")]
    ChildExited(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("outbound queue to `{0}` is full")]
    QueueFull(String),
    #[error("upstream collaborator reported failure: {0}")]
    Upstream(String),
    #[error("failed to spawn `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read configuration from `{path}`: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration from `{path}`: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to bind gateway socket at `{path}`: {source}")]
    SocketBind {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("internal fault: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BrokerError::Validation(_) => ErrorCode::Validation,
            BrokerError::UnknownProcess(_) | BrokerError::UnknownMethod(_) => ErrorCode::NotFound,
            BrokerError::DuplicateId(_) => ErrorCode::DuplicateId,
            BrokerError::Timeout(_) => ErrorCode::Timeout,
            BrokerError::ChildExited(_) => ErrorCode::ChildExited,
            BrokerError::Transport(_) | BrokerError::QueueFull(_) | BrokerError::Spawn { .. } => {
                ErrorCode::Transport
            }
            BrokerError::Upstream(_) => ErrorCode::Upstream,
            BrokerError::ConfigRead { .. }
            | BrokerError::ConfigParse { .. }
            | BrokerError::SocketBind { .. }
            | BrokerError::Internal(_) => ErrorCode::Internal,
        }
    }
}

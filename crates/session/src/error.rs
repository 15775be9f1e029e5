use thiserror::Error;

/// Errors the session controller and its collaborators can raise (§4.G).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a non-terminal session `{0}` already exists")]
    SessionExists(String),
    #[error("no session is active")]
    NoSession,
    #[error("session is in a terminal state and cannot be resumed")]
    Terminal,
    #[error("remote catalog signalled a rate limit")]
    RateLimited,
    #[error("remote catalog call failed: {0}")]
    RemoteFailed(String),
    #[error("local store call failed: {0}")]
    StoreFailed(String),
    #[error("failed to read session state from `{path}`: {source}")]
    PersistRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write session state to `{path}`: {source}")]
    PersistWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize persisted session state: {0}")]
    Serde(#[source] serde_json::Error),
}

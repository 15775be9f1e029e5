use thiserror::Error;

/// Errors that may occur while framing or parsing envelopes on the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode line as envelope: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("line exceeded maximum length of {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("i/o error on codec stream: {0}")]
    Io(#[source] std::io::Error),
}

impl ProtocolError {
    /// The line that failed to decode, when this error carries one.
    pub fn offending_line(&self) -> Option<&str> {
        match self {
            ProtocolError::Decode { line, .. } => Some(line.as_str()),
            _ => None,
        }
    }
}

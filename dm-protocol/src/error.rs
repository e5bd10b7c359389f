//! Error types for protocol decoding

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload has no reqId")]
    MissingReqId,

    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("invalid {kind} value: {value}")]
    InvalidValue { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

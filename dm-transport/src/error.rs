//! Error types for the transport layer

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("invalid topic filter '{0}'")]
    InvalidFilter(String),

    #[error("reconnect cancelled")]
    Cancelled,

    #[error("transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

//! Error types for the device-management client

use std::fmt;
use std::time::Duration;

use dm_protocol::{FirmwareUpdateStatus, ProtocolError, ResponseCode};
use dm_transport::TransportError;
use resource_tree::ResourceError;
use thiserror::Error;

/// Class of management command a device can support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Firmware,
    DeviceAction,
    CustomAction,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Firmware => "firmware",
            Capability::DeviceAction => "device-action",
            Capability::CustomAction => "custom-action",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by [`crate::ManagedClient`] operations
#[derive(Debug, Error)]
pub enum DmError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// No matching response arrived in time; the slot has been released
    #[error("request {req_id} on '{topic}' timed out after {timeout:?}")]
    Timeout {
        topic: String,
        req_id: String,
        timeout: Duration,
    },

    /// The server answered with a non-success response code
    #[error("request rejected with rc {rc}: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected {
        rc: ResponseCode,
        message: Option<String>,
    },

    #[error("device is not managed")]
    NotManaged,

    #[error("a {0} handler is already registered")]
    HandlerAlreadyRegistered(Capability),

    #[error("device data has no {0} resource")]
    MissingResource(&'static str),

    #[error("invalid lifetime {0}s: must be 0 or at least {min}s", min = crate::config::MIN_LIFETIME.as_secs())]
    InvalidLifetime(u64),

    /// A blocking request was issued from the transport's delivery thread
    #[error("blocking request issued on the transport delivery thread")]
    BlockingOnDeliveryThread,

    #[error("invalid device data: {0}")]
    InvalidDeviceData(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to spawn {0} thread")]
    Spawn(&'static str),

    #[error("client closed")]
    Closed,
}

/// Errors raised by action dispatchers
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{0} queue is full")]
    QueueFull(Capability),

    #[error("{0} dispatcher is stopped")]
    Stopped(Capability),

    #[error("{capability} worker did not stop within {timeout:?}")]
    ShutdownTimedOut {
        capability: Capability,
        timeout: Duration,
    },

    #[error("failed to spawn {0} worker")]
    Spawn(Capability),
}

/// Failure reported by device handler code
///
/// Firmware handlers may attach the update status that best describes the
/// failure; otherwise a default for the operation is used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub status: Option<FirmwareUpdateStatus>,
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: FirmwareUpdateStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, DmError>;

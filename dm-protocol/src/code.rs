//! Response codes and state enumerations carried on the wire

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

// ============================================================================
// ResponseCode
// ============================================================================

/// Integer result code of a response; the 200 class means success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseCode(pub u16);

impl ResponseCode {
    pub const SUCCESS: ResponseCode = ResponseCode(200);
    pub const ACCEPTED: ResponseCode = ResponseCode(202);
    pub const CHANGED: ResponseCode = ResponseCode(204);
    pub const BAD_REQUEST: ResponseCode = ResponseCode(400);
    pub const NOT_FOUND: ResponseCode = ResponseCode(404);
    pub const INTERNAL_ERROR: ResponseCode = ResponseCode(500);
    pub const NOT_IMPLEMENTED: ResponseCode = ResponseCode(501);

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Firmware
// ============================================================================

/// Lifecycle of the firmware resource
///
/// Serialized by name; inbound values are also accepted as numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FirmwareState {
    #[default]
    Idle,
    Downloading,
    Downloaded,
    Updating,
}

impl FirmwareState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirmwareState::Idle => "IDLE",
            FirmwareState::Downloading => "DOWNLOADING",
            FirmwareState::Downloaded => "DOWNLOADED",
            FirmwareState::Updating => "UPDATING",
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            FirmwareState::Idle => 0,
            FirmwareState::Downloading => 1,
            FirmwareState::Downloaded => 2,
            FirmwareState::Updating => 3,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let state = match value {
            Value::String(s) => match s.as_str() {
                "IDLE" => Some(FirmwareState::Idle),
                "DOWNLOADING" => Some(FirmwareState::Downloading),
                "DOWNLOADED" => Some(FirmwareState::Downloaded),
                "UPDATING" => Some(FirmwareState::Updating),
                _ => None,
            },
            Value::Number(n) => match n.as_u64() {
                Some(0) => Some(FirmwareState::Idle),
                Some(1) => Some(FirmwareState::Downloading),
                Some(2) => Some(FirmwareState::Downloaded),
                Some(3) => Some(FirmwareState::Updating),
                _ => None,
            },
            Value::Null => Some(FirmwareState::Idle),
            _ => None,
        };
        state.ok_or_else(|| ProtocolError::InvalidValue {
            kind: "firmware state",
            value: value.to_string(),
        })
    }
}

impl fmt::Display for FirmwareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent firmware download or update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareUpdateStatus {
    Success,
    InProgress,
    OutOfMemory,
    ConnectionLost,
    VerificationFailed,
    UnsupportedImage,
    InvalidUri,
}

impl FirmwareUpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FirmwareUpdateStatus::Success => "SUCCESS",
            FirmwareUpdateStatus::InProgress => "IN_PROGRESS",
            FirmwareUpdateStatus::OutOfMemory => "OUT_OF_MEMORY",
            FirmwareUpdateStatus::ConnectionLost => "CONNECTION_LOST",
            FirmwareUpdateStatus::VerificationFailed => "VERIFICATION_FAILED",
            FirmwareUpdateStatus::UnsupportedImage => "UNSUPPORTED_IMAGE",
            FirmwareUpdateStatus::InvalidUri => "INVALID_URI",
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            FirmwareUpdateStatus::Success => 0,
            FirmwareUpdateStatus::InProgress => 1,
            FirmwareUpdateStatus::OutOfMemory => 2,
            FirmwareUpdateStatus::ConnectionLost => 3,
            FirmwareUpdateStatus::VerificationFailed => 4,
            FirmwareUpdateStatus::UnsupportedImage => 5,
            FirmwareUpdateStatus::InvalidUri => 6,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        const ALL: [FirmwareUpdateStatus; 7] = [
            FirmwareUpdateStatus::Success,
            FirmwareUpdateStatus::InProgress,
            FirmwareUpdateStatus::OutOfMemory,
            FirmwareUpdateStatus::ConnectionLost,
            FirmwareUpdateStatus::VerificationFailed,
            FirmwareUpdateStatus::UnsupportedImage,
            FirmwareUpdateStatus::InvalidUri,
        ];
        let found = match value {
            Value::String(s) => ALL.iter().find(|st| st.as_str() == s),
            Value::Number(n) => ALL.iter().find(|st| Some(st.code() as u64) == n.as_u64()),
            _ => None,
        };
        found.copied().ok_or_else(|| ProtocolError::InvalidValue {
            kind: "firmware update status",
            value: value.to_string(),
        })
    }

    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            FirmwareUpdateStatus::Success | FirmwareUpdateStatus::InProgress
        )
    }
}

impl fmt::Display for FirmwareUpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Device actions
// ============================================================================

/// Device action currently requested by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceActionKind {
    #[default]
    None,
    Reboot,
    FactoryReset,
}

impl DeviceActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceActionKind::None => "NONE",
            DeviceActionKind::Reboot => "REBOOT",
            DeviceActionKind::FactoryReset => "FACTORY_RESET",
        }
    }
}

/// Status a handler reports for a device or custom action
///
/// Each status is reported to the server as the matching response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionStatus {
    Accepted,
    Failed,
    NotSupported,
}

impl ActionStatus {
    pub fn response_code(&self) -> ResponseCode {
        match self {
            ActionStatus::Accepted => ResponseCode::ACCEPTED,
            ActionStatus::Failed => ResponseCode::INTERNAL_ERROR,
            ActionStatus::NotSupported => ResponseCode::NOT_IMPLEMENTED,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Accepted => "ACCEPTED",
            ActionStatus::Failed => "FAILED",
            ActionStatus::NotSupported => "NOTSUPPORTED",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ACCEPTED" => Some(ActionStatus::Accepted),
            "FAILED" => Some(ActionStatus::Failed),
            "NOTSUPPORTED" => Some(ActionStatus::NotSupported),
            _ => None,
        }
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Severity of a diagnostic log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogSeverity {
    #[default]
    Informational,
    Warning,
    Error,
}

impl LogSeverity {
    pub fn code(&self) -> u8 {
        match self {
            LogSeverity::Informational => 0,
            LogSeverity::Warning => 1,
            LogSeverity::Error => 2,
        }
    }
}

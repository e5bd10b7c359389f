//! IoT device-management protocol vocabulary
//!
//! Shared constants and wire types used by the device-side client:
//! - [`DeviceTopic`] / [`ServerTopic`]: the fixed topic set
//! - [`ResponseCode`]: integer result codes (200 class = success)
//! - [`Request`] / [`Response`]: `reqId`-correlated JSON envelopes
//! - firmware, action and diagnostic enumerations

pub mod code;
pub mod error;
pub mod message;
pub mod topic;

pub use code::{
    ActionStatus, DeviceActionKind, FirmwareState, FirmwareUpdateStatus, LogSeverity,
    ResponseCode,
};
pub use error::{ProtocolError, Result};
pub use message::{
    data, with_req_id, CancelBody, FieldList, FieldValue, ManageBody, Request, Response,
    Supports, REQ_ID,
};
pub use topic::{DeviceTopic, ServerTopic, SERVER_WILDCARD};

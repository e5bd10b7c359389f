//! Fixed topic set of the device-management protocol
//!
//! Devices publish on `iotdevice-1/...` topics and receive server requests
//! on `iotdm-1/...` topics.

use std::fmt;

/// Wildcard subscription covering every server-to-device topic
pub const SERVER_WILDCARD: &str = "iotdm-1/#";

const CUSTOM_PREFIX: &str = "iotdm-1/mgmt/custom/";

/// Topics the device publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceTopic {
    Manage,
    Unmanage,
    UpdateLocation,
    AddErrorCode,
    ClearErrorCodes,
    AddLog,
    ClearLogs,
    Notify,
    /// Responses to server-initiated requests
    Response,
}

impl DeviceTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceTopic::Manage => "iotdevice-1/mgmt/manage",
            DeviceTopic::Unmanage => "iotdevice-1/mgmt/unmanage",
            DeviceTopic::UpdateLocation => "iotdevice-1/device/update/location",
            DeviceTopic::AddErrorCode => "iotdevice-1/add/diag/errorCodes",
            DeviceTopic::ClearErrorCodes => "iotdevice-1/clear/diag/errorCodes",
            DeviceTopic::AddLog => "iotdevice-1/add/diag/log",
            DeviceTopic::ClearLogs => "iotdevice-1/clear/diag/log",
            DeviceTopic::Notify => "iotdevice-1/notify",
            DeviceTopic::Response => "iotdevice-1/response",
        }
    }
}

impl fmt::Display for DeviceTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topics the server publishes on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerTopic {
    /// Responses to device-initiated requests
    Response,
    Observe,
    Cancel,
    Reboot,
    FactoryReset,
    FirmwareDownload,
    FirmwareUpdate,
    DeviceUpdate,
    CustomAction { bundle_id: String, action_id: String },
}

impl ServerTopic {
    /// Classify an inbound topic; `None` for topics outside the protocol
    pub fn parse(topic: &str) -> Option<ServerTopic> {
        let parsed = match topic {
            "iotdm-1/response" => ServerTopic::Response,
            "iotdm-1/observe" => ServerTopic::Observe,
            "iotdm-1/cancel" => ServerTopic::Cancel,
            "iotdm-1/mgmt/initiate/device/reboot" => ServerTopic::Reboot,
            "iotdm-1/mgmt/initiate/device/factory_reset" => ServerTopic::FactoryReset,
            "iotdm-1/mgmt/initiate/firmware/download" => ServerTopic::FirmwareDownload,
            "iotdm-1/mgmt/initiate/firmware/update" => ServerTopic::FirmwareUpdate,
            "iotdm-1/device/update" => ServerTopic::DeviceUpdate,
            other => {
                let rest = other.strip_prefix(CUSTOM_PREFIX)?;
                let (bundle_id, action_id) = rest.split_once('/')?;
                if bundle_id.is_empty() || action_id.is_empty() || action_id.contains('/') {
                    return None;
                }
                ServerTopic::CustomAction {
                    bundle_id: bundle_id.to_string(),
                    action_id: action_id.to_string(),
                }
            }
        };
        Some(parsed)
    }

    pub fn to_topic(&self) -> String {
        match self {
            ServerTopic::Response => "iotdm-1/response".to_string(),
            ServerTopic::Observe => "iotdm-1/observe".to_string(),
            ServerTopic::Cancel => "iotdm-1/cancel".to_string(),
            ServerTopic::Reboot => "iotdm-1/mgmt/initiate/device/reboot".to_string(),
            ServerTopic::FactoryReset => "iotdm-1/mgmt/initiate/device/factory_reset".to_string(),
            ServerTopic::FirmwareDownload => "iotdm-1/mgmt/initiate/firmware/download".to_string(),
            ServerTopic::FirmwareUpdate => "iotdm-1/mgmt/initiate/firmware/update".to_string(),
            ServerTopic::DeviceUpdate => "iotdm-1/device/update".to_string(),
            ServerTopic::CustomAction {
                bundle_id,
                action_id,
            } => format!("{}{}/{}", CUSTOM_PREFIX, bundle_id, action_id),
        }
    }
}

//! Device data model
//!
//! [`DeviceData`] is the root aggregate of the device-state tree:
//!
//! ```text
//! (root)
//! ├── deviceInfo      serialNumber, manufacturer, model, ... fwVersion
//! ├── location        latitude, longitude, elevation, measuredDateTime, accuracy
//! ├── metadata        free-form JSON
//! ├── diag            errorCodes, log
//! └── mgmt
//!     ├── firmware    version, name, url, verifier, state, updateStatus
//!     ├── deviceAction (created on first request)
//!     └── customAction (created on first request)
//! ```
//!
//! Device code mutates the tree through the typed accessors or directly via
//! [`DeviceData::root`]; while the device is managed, changes to synced and
//! observed fields are published to the server.

mod action;
mod diagnostic;
mod firmware;
mod info;
mod location;

use std::sync::Arc;

use resource_tree::Resource;
use serde_json::Value;

pub(crate) use action::{
    ActionNode, CUSTOM_ACTION, CUSTOM_ACTION_LEAVES, DEVICE_ACTION, DEVICE_ACTION_LEAVES,
};
pub use diagnostic::{DeviceDiagnostic, LogEntry};
pub use firmware::{DeviceFirmware, FirmwareResource};
pub use info::DeviceInfo;
pub use location::DeviceLocation;

use crate::error::{DmError, Result};

pub const DEVICE_INFO: &str = "deviceInfo";
pub const LOCATION: &str = "location";
pub const METADATA: &str = "metadata";
pub const DIAG: &str = "diag";
pub const MGMT: &str = "mgmt";
pub const FIRMWARE: &str = "mgmt.firmware";
pub const FW_VERSION: &str = "deviceInfo.fwVersion";

/// Root aggregate of a device's state
///
/// Cloning is cheap; clones share the same tree.
///
/// # Example
///
/// ```rust,ignore
/// use dm_client::{DeviceData, DeviceFirmware, DeviceInfo};
///
/// let data = DeviceData::builder()
///     .type_id("iotsample-gateway")
///     .device_id("gw-01")
///     .device_info(DeviceInfo::new().with_serial_number("10087").with_fw_version("1.0.0"))
///     .firmware(DeviceFirmware::new().with_version("1.0.0"))
///     .build()?;
///
/// assert_eq!(data.root().resolve("deviceInfo.serialNumber").unwrap().value().as_str(), Some("10087"));
/// ```
#[derive(Debug, Clone)]
pub struct DeviceData {
    type_id: String,
    device_id: String,
    root: Arc<Resource>,
    diagnostic: DeviceDiagnostic,
    firmware: Option<FirmwareResource>,
}

impl DeviceData {
    pub fn builder() -> DeviceDataBuilder {
        DeviceDataBuilder::default()
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn root(&self) -> &Arc<Resource> {
        &self.root
    }

    /// Resolve a resource by canonical name
    pub fn resource(&self, canonical_name: &str) -> Option<Arc<Resource>> {
        self.root.resolve(canonical_name)
    }

    pub fn firmware(&self) -> Option<&FirmwareResource> {
        self.firmware.as_ref()
    }

    pub fn diagnostic(&self) -> &DeviceDiagnostic {
        &self.diagnostic
    }

    pub fn device_info(&self) -> Value {
        self.wire(DEVICE_INFO)
    }

    pub fn metadata(&self) -> Option<Value> {
        match self.wire(METADATA) {
            Value::Null => None,
            other => Some(other),
        }
    }

    pub fn location(&self) -> Value {
        self.wire(LOCATION)
    }

    pub(crate) fn node(&self, canonical_name: &'static str) -> Result<Arc<Resource>> {
        self.root
            .resolve(canonical_name)
            .ok_or(DmError::MissingResource(canonical_name))
    }

    fn wire(&self, canonical_name: &str) -> Value {
        self.root
            .resolve(canonical_name)
            .map(|n| n.to_wire())
            .unwrap_or(Value::Null)
    }
}

/// Builder for [`DeviceData`]; type and device ids are required
#[derive(Debug, Default)]
pub struct DeviceDataBuilder {
    type_id: Option<String>,
    device_id: Option<String>,
    info: DeviceInfo,
    metadata: Option<Value>,
    firmware: Option<DeviceFirmware>,
}

impl DeviceDataBuilder {
    pub fn type_id(mut self, type_id: impl Into<String>) -> Self {
        self.type_id = Some(type_id.into());
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn device_info(mut self, info: DeviceInfo) -> Self {
        self.info = info;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn firmware(mut self, firmware: DeviceFirmware) -> Self {
        self.firmware = Some(firmware);
        self
    }

    pub fn build(self) -> Result<DeviceData> {
        let type_id = required(self.type_id, "type id")?;
        let device_id = required(self.device_id, "device id")?;

        let root = Resource::root();
        self.info.build(&root.add_child(DEVICE_INFO, ())?)?;
        DeviceLocation::build(&root.add_child(LOCATION, ())?)?;
        root.add_child(METADATA, self.metadata)?;
        let diagnostic = DeviceDiagnostic::build(&root.add_child(DIAG, ())?)?;
        let mgmt = root.add_child(MGMT, ())?;
        let firmware = match &self.firmware {
            Some(fw) => Some(fw.build(&mgmt.add_child("firmware", ())?)?),
            None => None,
        };

        Ok(DeviceData {
            type_id,
            device_id,
            root,
            diagnostic,
            firmware,
        })
    }
}

fn required(value: Option<String>, what: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DmError::InvalidDeviceData(format!("{} is required", what))),
    }
}

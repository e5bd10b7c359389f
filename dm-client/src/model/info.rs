//! Device identity attributes reported at manage time

use std::sync::Arc;

use resource_tree::{Resource, Result};
use serde::{Deserialize, Serialize};

/// Attributes of the `deviceInfo` resource
///
/// Unset attributes are omitted from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub device_class: Option<String>,
    pub description: Option<String>,
    pub fw_version: Option<String>,
    pub hw_version: Option<String>,
    pub descriptive_location: Option<String>,
}

impl DeviceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_serial_number(mut self, value: impl Into<String>) -> Self {
        self.serial_number = Some(value.into());
        self
    }

    pub fn with_manufacturer(mut self, value: impl Into<String>) -> Self {
        self.manufacturer = Some(value.into());
        self
    }

    pub fn with_model(mut self, value: impl Into<String>) -> Self {
        self.model = Some(value.into());
        self
    }

    pub fn with_device_class(mut self, value: impl Into<String>) -> Self {
        self.device_class = Some(value.into());
        self
    }

    pub fn with_description(mut self, value: impl Into<String>) -> Self {
        self.description = Some(value.into());
        self
    }

    pub fn with_fw_version(mut self, value: impl Into<String>) -> Self {
        self.fw_version = Some(value.into());
        self
    }

    pub fn with_hw_version(mut self, value: impl Into<String>) -> Self {
        self.hw_version = Some(value.into());
        self
    }

    pub fn with_descriptive_location(mut self, value: impl Into<String>) -> Self {
        self.descriptive_location = Some(value.into());
        self
    }

    /// Populate a `deviceInfo` node with one child per attribute
    pub(crate) fn build(&self, node: &Arc<Resource>) -> Result<()> {
        node.add_child("serialNumber", self.serial_number.clone())?;
        node.add_child("manufacturer", self.manufacturer.clone())?;
        node.add_child("model", self.model.clone())?;
        node.add_child("deviceClass", self.device_class.clone())?;
        node.add_child("description", self.description.clone())?;
        node.add_child("fwVersion", self.fw_version.clone())?;
        node.add_child("hwVersion", self.hw_version.clone())?;
        node.add_child("descriptiveLocation", self.descriptive_location.clone())?;
        Ok(())
    }
}

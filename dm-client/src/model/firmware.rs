//! Firmware resource and its typed accessors

use std::sync::Arc;

use dm_protocol::{FirmwareState, FirmwareUpdateStatus};
use resource_tree::{Resource, ResourceError, Result};
use tracing::warn;

/// Initial firmware attributes supplied by device code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFirmware {
    pub version: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
    pub verifier: Option<String>,
}

impl DeviceFirmware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.verifier = Some(verifier.into());
        self
    }

    pub(crate) fn build(&self, node: &Arc<Resource>) -> Result<FirmwareResource> {
        node.add_child("version", self.version.clone())?;
        node.add_child("name", self.name.clone())?;
        node.add_child("url", self.url.clone())?;
        node.add_child("verifier", self.verifier.clone())?;
        node.add_child("state", FirmwareState::Idle.as_str())?;
        node.add_child("updateStatus", ())?;
        Ok(FirmwareResource {
            node: Arc::clone(node),
        })
    }
}

/// Typed view over the `mgmt.firmware` node
///
/// JSON shape: `{version, name, url, verifier, state, updateStatus}`.
#[derive(Debug, Clone)]
pub struct FirmwareResource {
    node: Arc<Resource>,
}

impl FirmwareResource {
    pub fn node(&self) -> &Arc<Resource> {
        &self.node
    }

    pub fn state(&self) -> FirmwareState {
        let value = self.leaf("state").map(|n| n.value().to_json());
        match value {
            Some(v) => FirmwareState::from_value(&v).unwrap_or_else(|e| {
                warn!("Unreadable firmware state, treating as IDLE: {}", e);
                FirmwareState::Idle
            }),
            None => FirmwareState::Idle,
        }
    }

    pub fn update_status(&self) -> Option<FirmwareUpdateStatus> {
        let value = self.leaf("updateStatus")?.value();
        if value.is_empty() {
            return None;
        }
        FirmwareUpdateStatus::from_value(&value.to_json()).ok()
    }

    pub fn version(&self) -> Option<String> {
        self.text("version")
    }

    pub fn name(&self) -> Option<String> {
        self.text("name")
    }

    pub fn url(&self) -> Option<String> {
        self.text("url")
    }

    pub fn verifier(&self) -> Option<String> {
        self.text("verifier")
    }

    pub fn set_state(&self, state: FirmwareState, fire: bool) -> Result<()> {
        self.require("state")?.update(state.as_str(), fire)
    }

    pub fn set_update_status(&self, status: FirmwareUpdateStatus, fire: bool) -> Result<()> {
        self.require("updateStatus")?.update(status.as_str(), fire)
    }

    /// Change state and status together, notifying once
    pub(crate) fn transition(
        &self,
        state: FirmwareState,
        status: FirmwareUpdateStatus,
    ) -> Result<()> {
        self.set_update_status(status, false)?;
        self.set_state(state, true)
    }

    fn leaf(&self, name: &str) -> Option<Arc<Resource>> {
        self.node.get_child(name)
    }

    fn require(&self, name: &str) -> Result<Arc<Resource>> {
        self.leaf(name).ok_or_else(|| {
            ResourceError::NotFound(format!("{}.{}", self.node.canonical_name(), name))
        })
    }

    fn text(&self, name: &str) -> Option<String> {
        self.leaf(name)?.value().as_str().map(str::to_string)
    }
}

//! Public entry point for device code

use std::sync::Arc;
use std::time::Duration;

use dm_protocol::{data, DeviceTopic, ResponseCode, Supports};
use dm_transport::Transport;
use serde_json::{json, Value};

use crate::clock::{Clock, SystemClock};
use crate::config::ManagedClientConfig;
use crate::error::{DmError, Result};
use crate::handler::{CustomActionHandler, DeviceActionHandler, FirmwareHandler, RegisteredHandler};
use crate::model::{DeviceData, DeviceLocation, LogEntry, LOCATION};
use crate::session::{Inner, SessionState};

/// A device's connection to the management server
///
/// The client owns the device's [`DeviceData`] tree, the management session
/// and the background threads that serve it. Dropping the client stops those
/// threads; call [`ManagedClient::disconnect`] first to unmanage cleanly.
///
/// # Example
///
/// ```rust,ignore
/// use dm_client::{DeviceData, DeviceFirmware, ManagedClient, ManagedClientConfig};
///
/// let data = DeviceData::builder()
///     .type_id("iotsample-gateway")
///     .device_id("gw-01")
///     .firmware(DeviceFirmware::new().with_version("1.0.0"))
///     .build()?;
///
/// let client = ManagedClient::new(data, transport, ManagedClientConfig::default())?;
/// client.add_firmware_handler(Arc::new(MyFlasher))?;
/// client.manage()?;
///
/// client.add_error_code(12)?;
/// client.disconnect()?;
/// ```
pub struct ManagedClient {
    inner: Arc<Inner>,
}

impl ManagedClient {
    /// Create a client; nothing is sent until [`ManagedClient::manage`]
    pub fn new(
        data: DeviceData,
        transport: Arc<dyn Transport>,
        config: ManagedClientConfig,
    ) -> Result<Self> {
        Self::with_clock(data, transport, config, Arc::new(SystemClock))
    }

    /// Create a client whose session deadlines follow `clock`
    pub fn with_clock(
        data: DeviceData,
        transport: Arc<dyn Transport>,
        config: ManagedClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            inner: Inner::new(data, transport, config, clock)?,
        })
    }

    pub fn device_data(&self) -> &DeviceData {
        &self.inner.data
    }

    pub fn config(&self) -> &ManagedClientConfig {
        &self.inner.config
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Register the firmware handler; requires a firmware resource
    pub fn add_firmware_handler(&self, handler: Arc<dyn FirmwareHandler>) -> Result<()> {
        self.inner.register(RegisteredHandler::Firmware(handler))
    }

    pub fn add_device_action_handler(&self, handler: Arc<dyn DeviceActionHandler>) -> Result<()> {
        self.inner.register(RegisteredHandler::DeviceAction(handler))
    }

    pub fn add_custom_action_handler(&self, handler: Arc<dyn CustomActionHandler>) -> Result<()> {
        self.inner.register(RegisteredHandler::CustomAction(handler))
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Manage the device with the configured lifetime
    pub fn manage(&self) -> Result<()> {
        self.inner.manage(self.inner.config.lifetime)
    }

    /// Manage the device for `lifetime`; zero never expires
    ///
    /// Calling this while managed re-sends the manage request and moves the
    /// session deadline.
    pub fn manage_with_lifetime(&self, lifetime: Duration) -> Result<()> {
        self.inner.manage(lifetime)
    }

    /// End the session
    ///
    /// Dispatchers are stopped and capability flags cleared even if the
    /// unmanage request fails; the failure is still returned. Calling this
    /// while unmanaged does nothing.
    pub fn unmanage(&self) -> Result<()> {
        self.inner.unmanage()
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.session_state()
    }

    pub fn is_managed(&self) -> bool {
        self.inner.session_state().is_managed()
    }

    /// Capabilities declared in the current session
    pub fn supports(&self) -> Supports {
        self.inner.supports()
    }

    /// Fields the server is currently observing
    pub fn observed_fields(&self) -> Vec<String> {
        self.inner.sync.observed()
    }

    // ========================================================================
    // Device-initiated requests
    // ========================================================================

    /// Record a new location and report it to the server
    pub fn update_location(&self, location: &DeviceLocation) -> Result<ResponseCode> {
        self.require_managed()?;
        let node = self.inner.data.node(LOCATION)?;
        location.apply(&node)?;
        let rc = self
            .inner
            .request(DeviceTopic::UpdateLocation, data(node.to_wire()))?;
        node.notify_external();
        Ok(rc)
    }

    pub fn add_error_code(&self, code: i64) -> Result<ResponseCode> {
        self.require_managed()?;
        self.inner.data.diagnostic().push_error_code(code)?;
        self.inner
            .request(DeviceTopic::AddErrorCode, data(json!({ "errorCode": code })))
    }

    pub fn clear_error_codes(&self) -> Result<ResponseCode> {
        self.require_managed()?;
        self.inner.data.diagnostic().clear_error_codes()?;
        self.inner.request(DeviceTopic::ClearErrorCodes, Value::Null)
    }

    pub fn add_log(&self, entry: &LogEntry) -> Result<ResponseCode> {
        self.require_managed()?;
        self.inner.data.diagnostic().push_log(entry)?;
        self.inner.request(DeviceTopic::AddLog, data(entry.to_wire()))
    }

    pub fn clear_logs(&self) -> Result<ResponseCode> {
        self.require_managed()?;
        self.inner.data.diagnostic().clear_logs()?;
        self.inner.request(DeviceTopic::ClearLogs, Value::Null)
    }

    fn require_managed(&self) -> Result<()> {
        self.inner.ensure_open()?;
        if !self.is_managed() {
            return Err(DmError::NotManaged);
        }
        Ok(())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Unmanage if needed, then close the transport connection
    pub fn disconnect(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.disconnect()
    }

    /// Stop background threads without contacting the server
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for ManagedClient {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for ManagedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedClient")
            .field("device_id", &self.inner.data.device_id())
            .field("state", &self.inner.session_state())
            .finish()
    }
}

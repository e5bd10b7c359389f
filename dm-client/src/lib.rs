//! Device-side client for the IoT device-management protocol
//!
//! A [`ManagedClient`] registers a device with the management server
//! ("manage"), keeps the session alive, and executes server commands through
//! handlers supplied by device code:
//!
//! - **Session**: manage/unmanage handshake, lifetime renewal two minutes
//!   before the deadline, re-manage with the remaining lifetime after a
//!   reconnect
//! - **Correlation**: every device request blocks on its own response slot
//!   keyed by `reqId`, with a per-call timeout
//! - **Device state**: a [`DeviceData`] resource tree whose changes are
//!   published to the server as trimmed notifications
//! - **Dispatch**: one bounded worker per capability (firmware, device
//!   action, custom action) so handlers never run on the transport thread
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dm_client::{
//!     DeviceData, DeviceFirmware, FirmwareCommand, FirmwareHandler, HandlerError,
//!     ManagedClient, ManagedClientConfig,
//! };
//!
//! struct Flasher;
//!
//! impl FirmwareHandler for Flasher {
//!     fn download(&self, command: &mut FirmwareCommand) -> Result<(), HandlerError> {
//!         fetch(command.url.as_deref().unwrap_or_default())
//!     }
//!
//!     fn update(&self, _command: &mut FirmwareCommand) -> Result<(), HandlerError> {
//!         install()
//!     }
//! }
//!
//! let data = DeviceData::builder()
//!     .type_id("iotsample-gateway")
//!     .device_id("gw-01")
//!     .firmware(DeviceFirmware::new().with_version("1.0.0"))
//!     .build()?;
//!
//! let client = ManagedClient::new(data, transport, ManagedClientConfig::default())?;
//! client.add_firmware_handler(Arc::new(Flasher))?;
//! client.manage()?;
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod model;
pub mod publisher;
mod router;
pub mod session;
pub mod sync;
pub mod workers;

pub use client::ManagedClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ManagedClientConfig, MIN_LIFETIME, RENEWAL_MARGIN};
pub use correlator::Correlator;
pub use dispatcher::{ActionDispatcher, ActionWorker, DispatchHandle};
pub use error::{Capability, DispatchError, DmError, HandlerError, Result};
pub use handler::{
    ActionCommand, CustomActionCommand, CustomActionHandler, DeviceActionHandler,
    FirmwareCommand, FirmwareHandler, HandlerRegistry, RegisteredHandler,
};
pub use model::{
    DeviceData, DeviceDataBuilder, DeviceDiagnostic, DeviceFirmware, DeviceInfo, DeviceLocation,
    FirmwareResource, LogEntry,
};
pub use session::SessionState;

// Wire-level types device code commonly needs
pub use dm_protocol::{
    ActionStatus, DeviceActionKind, FirmwareState, FirmwareUpdateStatus, LogSeverity,
    ResponseCode, Supports,
};

//! Handler interfaces implemented by device code
//!
//! Device code supplies one handler per [`Capability`]. Handlers run on the
//! capability's dispatcher worker, one request at a time. Each receives a
//! mutable command object and reports the outcome by mutating it before
//! returning.
//!
//! # Example
//!
//! ```rust,ignore
//! use dm_client::{ActionCommand, DeviceActionHandler};
//! use dm_protocol::ActionStatus;
//!
//! struct Rebooter;
//!
//! impl DeviceActionHandler for Rebooter {
//!     fn reboot(&self, action: &mut ActionCommand) {
//!         action.set_status(ActionStatus::Accepted);
//!         schedule_reboot();
//!     }
//!
//!     fn factory_reset(&self, action: &mut ActionCommand) {
//!         action.set_status(ActionStatus::NotSupported);
//!         action.set_message("factory reset disabled on this model");
//!     }
//! }
//!
//! client.add_device_action_handler(Arc::new(Rebooter))?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use dm_protocol::{ActionStatus, DeviceActionKind, FirmwareUpdateStatus};
use serde_json::Value;

use crate::error::{Capability, DmError, HandlerError, Result};

// ============================================================================
// Command objects
// ============================================================================

/// Snapshot of the firmware resource handed to a [`FirmwareHandler`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareCommand {
    pub url: Option<String>,
    pub version: Option<String>,
    pub name: Option<String>,
    pub verifier: Option<String>,
    update_status: Option<FirmwareUpdateStatus>,
}

impl FirmwareCommand {
    pub fn new(
        url: Option<String>,
        version: Option<String>,
        name: Option<String>,
        verifier: Option<String>,
    ) -> Self {
        Self {
            url,
            version,
            name,
            verifier,
            update_status: None,
        }
    }

    /// Report the outcome; a failure status marks the request failed even
    /// if the handler returns `Ok`
    pub fn set_update_status(&mut self, status: FirmwareUpdateStatus) {
        self.update_status = Some(status);
    }

    pub fn update_status(&self) -> Option<FirmwareUpdateStatus> {
        self.update_status
    }
}

/// A reboot or factory-reset request handed to a [`DeviceActionHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCommand {
    kind: DeviceActionKind,
    status: Option<ActionStatus>,
    message: Option<String>,
}

impl ActionCommand {
    pub fn new(kind: DeviceActionKind) -> Self {
        Self {
            kind,
            status: None,
            message: None,
        }
    }

    pub fn kind(&self) -> DeviceActionKind {
        self.kind
    }

    pub fn set_status(&mut self, status: ActionStatus) {
        self.status = Some(status);
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn status(&self) -> Option<ActionStatus> {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// A vendor-defined action handed to a [`CustomActionHandler`]
#[derive(Debug, Clone, PartialEq)]
pub struct CustomActionCommand {
    pub bundle_id: String,
    pub action_id: String,
    /// The request's `d` object, if any
    pub data: Option<Value>,
    status: Option<ActionStatus>,
    message: Option<String>,
}

impl CustomActionCommand {
    pub fn new(bundle_id: impl Into<String>, action_id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            action_id: action_id.into(),
            data,
            status: None,
            message: None,
        }
    }

    pub fn set_status(&mut self, status: ActionStatus) {
        self.status = Some(status);
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn status(&self) -> Option<ActionStatus> {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

// ============================================================================
// Handler traits
// ============================================================================

/// Downloads and installs firmware images
pub trait FirmwareHandler: Send + Sync {
    /// Fetch the image at `command.url`
    fn download(&self, command: &mut FirmwareCommand) -> std::result::Result<(), HandlerError>;

    /// Install the previously downloaded image
    fn update(&self, command: &mut FirmwareCommand) -> std::result::Result<(), HandlerError>;
}

/// Performs reboot and factory reset
pub trait DeviceActionHandler: Send + Sync {
    fn reboot(&self, action: &mut ActionCommand);

    fn factory_reset(&self, action: &mut ActionCommand);
}

/// Performs vendor-defined actions
pub trait CustomActionHandler: Send + Sync {
    fn handle(&self, action: &mut CustomActionCommand);
}

// ============================================================================
// HandlerRegistry
// ============================================================================

/// A handler registered for one capability
#[derive(Clone)]
pub enum RegisteredHandler {
    Firmware(Arc<dyn FirmwareHandler>),
    DeviceAction(Arc<dyn DeviceActionHandler>),
    CustomAction(Arc<dyn CustomActionHandler>),
}

impl RegisteredHandler {
    pub fn capability(&self) -> Capability {
        match self {
            RegisteredHandler::Firmware(_) => Capability::Firmware,
            RegisteredHandler::DeviceAction(_) => Capability::DeviceAction,
            RegisteredHandler::CustomAction(_) => Capability::CustomAction,
        }
    }
}

/// Capability-keyed table of device handlers; at most one per capability
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Capability, RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; a second handler for the same capability is rejected
    pub fn register(&mut self, handler: RegisteredHandler) -> Result<()> {
        let capability = handler.capability();
        if self.handlers.contains_key(&capability) {
            return Err(DmError::HandlerAlreadyRegistered(capability));
        }
        self.handlers.insert(capability, handler);
        Ok(())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.handlers.contains_key(&capability)
    }

    pub fn get(&self, capability: Capability) -> Option<&RegisteredHandler> {
        self.handlers.get(&capability)
    }

    pub fn firmware(&self) -> Option<Arc<dyn FirmwareHandler>> {
        match self.handlers.get(&Capability::Firmware)? {
            RegisteredHandler::Firmware(h) => Some(Arc::clone(h)),
            _ => None,
        }
    }

    pub fn device_action(&self) -> Option<Arc<dyn DeviceActionHandler>> {
        match self.handlers.get(&Capability::DeviceAction)? {
            RegisteredHandler::DeviceAction(h) => Some(Arc::clone(h)),
            _ => None,
        }
    }

    pub fn custom_action(&self) -> Option<Arc<dyn CustomActionHandler>> {
        match self.handlers.get(&Capability::CustomAction)? {
            RegisteredHandler::CustomAction(h) => Some(Arc::clone(h)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut capabilities: Vec<&str> = self.handlers.keys().map(|c| c.as_str()).collect();
        capabilities.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("capabilities", &capabilities)
            .finish()
    }
}

//! Capability workers run by the action dispatchers
//!
//! Each worker turns a queued event into a handler call and writes the
//! outcome back into the resource tree. Writing the outcome fires the tree's
//! internal observers, which publish the change or response to the server.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use dm_protocol::{ActionStatus, DeviceActionKind, FirmwareState, FirmwareUpdateStatus};
use parking_lot::Mutex;
use resource_tree::Resource;
use serde_json::Value;

use crate::dispatcher::{ActionDispatcher, ActionWorker, DispatchHandle};
use crate::error::{Capability, DispatchError, HandlerError};
use crate::handler::{
    ActionCommand, CustomActionCommand, CustomActionHandler, DeviceActionHandler,
    FirmwareCommand, FirmwareHandler, HandlerRegistry,
};
use crate::model::{
    ActionNode, DeviceData, FirmwareResource, CUSTOM_ACTION, CUSTOM_ACTION_LEAVES, DEVICE_ACTION,
    DEVICE_ACTION_LEAVES, DEVICE_INFO, MGMT,
};

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareEvent {
    Download,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceActionEvent {
    pub kind: DeviceActionKind,
    pub req_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomActionEvent {
    pub bundle_id: String,
    pub action_id: String,
    pub data: Option<Value>,
    pub req_id: String,
}

// ============================================================================
// Firmware
// ============================================================================

/// Runs firmware downloads and updates against the `mgmt.firmware` node
pub struct FirmwareWorker {
    handler: Arc<dyn FirmwareHandler>,
    firmware: FirmwareResource,
    root: Arc<Resource>,
}

impl FirmwareWorker {
    pub fn new(handler: Arc<dyn FirmwareHandler>, firmware: FirmwareResource, root: Arc<Resource>) -> Self {
        Self {
            handler,
            firmware,
            root,
        }
    }

    fn command(&self) -> FirmwareCommand {
        FirmwareCommand::new(
            self.firmware.url(),
            self.firmware.version(),
            self.firmware.name(),
            self.firmware.verifier(),
        )
    }

    /// Call the handler, folding panics and reported statuses into one outcome
    fn invoke<F>(&self, call: F, default_failure: FirmwareUpdateStatus) -> FirmwareUpdateStatus
    where
        F: FnOnce(&dyn FirmwareHandler, &mut FirmwareCommand) -> Result<(), HandlerError>,
    {
        let mut command = self.command();
        let handler = Arc::clone(&self.handler);
        let result = catch_unwind(AssertUnwindSafe(|| call(handler.as_ref(), &mut command)));
        match result {
            Ok(Ok(())) => match command.update_status() {
                Some(status) if status.is_failure() => status,
                _ => FirmwareUpdateStatus::Success,
            },
            Ok(Err(e)) => {
                tracing::warn!("Firmware handler failed: {}", e);
                command
                    .update_status()
                    .filter(FirmwareUpdateStatus::is_failure)
                    .or(e.status.filter(FirmwareUpdateStatus::is_failure))
                    .unwrap_or(default_failure)
            }
            Err(_) => {
                tracing::error!("Firmware handler panicked");
                default_failure
            }
        }
    }

    fn download(&self) {
        let state = self.firmware.state();
        if !matches!(state, FirmwareState::Idle | FirmwareState::Downloaded) {
            tracing::warn!("Ignoring firmware download while {}", state);
            return;
        }
        if let Err(e) = self
            .firmware
            .transition(FirmwareState::Downloading, FirmwareUpdateStatus::InProgress)
        {
            tracing::error!("Failed to mark firmware as downloading: {}", e);
            return;
        }

        tracing::info!("Downloading firmware from {:?}", self.firmware.url());
        let outcome = self.invoke(|h, c| h.download(c), FirmwareUpdateStatus::ConnectionLost);
        let result = if outcome.is_failure() {
            tracing::warn!("Firmware download failed: {}", outcome);
            self.firmware.transition(FirmwareState::Idle, outcome)
        } else {
            self.firmware
                .transition(FirmwareState::Downloaded, FirmwareUpdateStatus::Success)
        };
        if let Err(e) = result {
            tracing::error!("Failed to record firmware download outcome: {}", e);
        }
    }

    fn update(&self) {
        let state = self.firmware.state();
        if state != FirmwareState::Downloaded {
            tracing::warn!("Firmware update requested while {}, no image to install", state);
            if let Err(e) = self
                .firmware
                .set_update_status(FirmwareUpdateStatus::UnsupportedImage, true)
            {
                tracing::error!("Failed to record firmware update rejection: {}", e);
            }
            return;
        }
        if let Err(e) = self
            .firmware
            .transition(FirmwareState::Updating, FirmwareUpdateStatus::InProgress)
        {
            tracing::error!("Failed to mark firmware as updating: {}", e);
            return;
        }

        let outcome = self.invoke(|h, c| h.update(c), FirmwareUpdateStatus::UnsupportedImage);
        if outcome.is_failure() {
            tracing::warn!("Firmware update failed: {}", outcome);
            if let Err(e) = self.firmware.transition(FirmwareState::Idle, outcome) {
                tracing::error!("Failed to record firmware update outcome: {}", e);
            }
            return;
        }

        if let Err(e) = self
            .firmware
            .transition(FirmwareState::Idle, FirmwareUpdateStatus::Success)
        {
            tracing::error!("Failed to record firmware update outcome: {}", e);
        }
        if let Some(version) = self.firmware.version() {
            tracing::info!("Firmware updated to {}", version);
            let published = self
                .root
                .child_or_insert(DEVICE_INFO)
                .and_then(|info| info.child_or_insert("fwVersion"))
                .and_then(|node| node.update(version, true));
            if let Err(e) = published {
                tracing::error!("Failed to copy firmware version to device info: {}", e);
            }
        }
    }
}

impl ActionWorker for FirmwareWorker {
    type Event = FirmwareEvent;

    fn process(&mut self, event: FirmwareEvent) {
        match event {
            FirmwareEvent::Download => self.download(),
            FirmwareEvent::Update => self.update(),
        }
    }

    fn cancel(&mut self, event: FirmwareEvent) {
        tracing::warn!("Firmware {:?} cancelled before it started", event);
    }
}

// ============================================================================
// Device and custom actions
// ============================================================================

/// Runs reboot and factory-reset requests
pub struct DeviceActionWorker {
    handler: Arc<dyn DeviceActionHandler>,
    mgmt: Arc<Resource>,
    action_lock: Arc<Mutex<()>>,
}

impl DeviceActionWorker {
    pub fn new(
        handler: Arc<dyn DeviceActionHandler>,
        mgmt: Arc<Resource>,
        action_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            handler,
            mgmt,
            action_lock,
        }
    }
}

impl ActionWorker for DeviceActionWorker {
    type Event = DeviceActionEvent;

    fn process(&mut self, event: DeviceActionEvent) {
        let mut action = ActionCommand::new(event.kind);
        let handler = Arc::clone(&self.handler);
        let result = catch_unwind(AssertUnwindSafe(|| match event.kind {
            DeviceActionKind::Reboot => handler.reboot(&mut action),
            DeviceActionKind::FactoryReset => handler.factory_reset(&mut action),
            DeviceActionKind::None => action.set_status(ActionStatus::NotSupported),
        }));

        let (status, message) = match result {
            Ok(()) => match action.status() {
                Some(status) => (status, action.message().map(str::to_string)),
                None => {
                    tracing::warn!("{} handler returned without a status", event.kind.as_str());
                    (ActionStatus::Failed, action.message().map(str::to_string))
                }
            },
            Err(_) => {
                tracing::error!("{} handler panicked", event.kind.as_str());
                (ActionStatus::Failed, Some("handler panicked".to_string()))
            }
        };

        report(
            &self.mgmt,
            &self.action_lock,
            DEVICE_ACTION,
            DEVICE_ACTION_LEAVES,
            &event.req_id,
            status,
            message,
        );
    }

    fn cancel(&mut self, event: DeviceActionEvent) {
        tracing::warn!(
            "{} request {} cancelled before it started",
            event.kind.as_str(),
            event.req_id
        );
    }
}

/// Runs vendor-defined actions
pub struct CustomActionWorker {
    handler: Arc<dyn CustomActionHandler>,
    mgmt: Arc<Resource>,
    action_lock: Arc<Mutex<()>>,
}

impl CustomActionWorker {
    pub fn new(
        handler: Arc<dyn CustomActionHandler>,
        mgmt: Arc<Resource>,
        action_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            handler,
            mgmt,
            action_lock,
        }
    }
}

impl ActionWorker for CustomActionWorker {
    type Event = CustomActionEvent;

    fn process(&mut self, event: CustomActionEvent) {
        let mut action = CustomActionCommand::new(&event.bundle_id, &event.action_id, event.data);
        let handler = Arc::clone(&self.handler);
        let result = catch_unwind(AssertUnwindSafe(|| handler.handle(&mut action)));

        let (status, message) = match result {
            Ok(()) => (
                action.status().unwrap_or_else(|| {
                    tracing::warn!(
                        "Custom action {}/{} returned without a status",
                        event.bundle_id,
                        event.action_id
                    );
                    ActionStatus::Failed
                }),
                action.message().map(str::to_string),
            ),
            Err(_) => {
                tracing::error!(
                    "Custom action {}/{} panicked",
                    event.bundle_id,
                    event.action_id
                );
                (ActionStatus::Failed, Some("handler panicked".to_string()))
            }
        };

        report(
            &self.mgmt,
            &self.action_lock,
            CUSTOM_ACTION,
            CUSTOM_ACTION_LEAVES,
            &event.req_id,
            status,
            message,
        );
    }

    fn cancel(&mut self, event: CustomActionEvent) {
        tracing::warn!(
            "Custom action {}/{} ({}) cancelled before it started",
            event.bundle_id,
            event.action_id,
            event.req_id
        );
    }
}

/// Write an action outcome; the status update triggers the response
fn report(
    mgmt: &Arc<Resource>,
    action_lock: &Mutex<()>,
    name: &str,
    leaves: &[&str],
    req_id: &str,
    status: ActionStatus,
    message: Option<String>,
) {
    let _guard = action_lock.lock();
    let result = ActionNode::ensure(mgmt, name, leaves).and_then(|node| {
        node.set("reqId", req_id)?;
        node.report(status, message)?;
        node.reset()
    });
    if let Err(e) = result {
        tracing::error!("Failed to report {} outcome for {}: {}", name, req_id, e);
    }
}

// ============================================================================
// Dispatchers
// ============================================================================

/// The running dispatchers of a managed session, one per registered handler
#[derive(Default)]
pub struct Dispatchers {
    pub firmware: Option<ActionDispatcher<FirmwareEvent>>,
    pub device_action: Option<ActionDispatcher<DeviceActionEvent>>,
    pub custom_action: Option<ActionDispatcher<CustomActionEvent>>,
}

impl Dispatchers {
    /// Start a dispatcher for every registered handler that has none yet
    pub fn start_missing(
        &mut self,
        registry: &HandlerRegistry,
        data: &DeviceData,
        capacity: usize,
        action_lock: &Arc<Mutex<()>>,
    ) -> Result<(), DispatchError> {
        if self.firmware.is_none() {
            if let (Some(handler), Some(firmware)) = (registry.firmware(), data.firmware()) {
                let worker = FirmwareWorker::new(handler, firmware.clone(), Arc::clone(data.root()));
                self.firmware = Some(ActionDispatcher::start(Capability::Firmware, capacity, worker)?);
            }
        }

        let mgmt = data.resource(MGMT);
        if self.device_action.is_none() {
            if let (Some(handler), Some(mgmt)) = (registry.device_action(), mgmt.clone()) {
                let worker = DeviceActionWorker::new(handler, mgmt, Arc::clone(action_lock));
                self.device_action = Some(ActionDispatcher::start(
                    Capability::DeviceAction,
                    capacity,
                    worker,
                )?);
            }
        }

        if self.custom_action.is_none() {
            if let (Some(handler), Some(mgmt)) = (registry.custom_action(), mgmt) {
                let worker = CustomActionWorker::new(handler, mgmt, Arc::clone(action_lock));
                self.custom_action = Some(ActionDispatcher::start(
                    Capability::CustomAction,
                    capacity,
                    worker,
                )?);
            }
        }

        Ok(())
    }

    pub fn firmware_handle(&self) -> Option<DispatchHandle<FirmwareEvent>> {
        self.firmware.as_ref().map(ActionDispatcher::handle)
    }

    pub fn device_action_handle(&self) -> Option<DispatchHandle<DeviceActionEvent>> {
        self.device_action.as_ref().map(ActionDispatcher::handle)
    }

    pub fn custom_action_handle(&self) -> Option<DispatchHandle<CustomActionEvent>> {
        self.custom_action.as_ref().map(ActionDispatcher::handle)
    }

    pub fn is_empty(&self) -> bool {
        self.firmware.is_none() && self.device_action.is_none() && self.custom_action.is_none()
    }

    /// Stop every worker, each with a bounded wait
    ///
    /// All dispatchers are stopped even if some time out; the failures are
    /// returned together.
    pub fn shutdown(mut self, timeout: Duration) -> Vec<DispatchError> {
        let mut errors = Vec::new();
        if let Some(mut d) = self.firmware.take() {
            errors.extend(d.shutdown(timeout).err());
        }
        if let Some(mut d) = self.device_action.take() {
            errors.extend(d.shutdown(timeout).err());
        }
        if let Some(mut d) = self.custom_action.take() {
            errors.extend(d.shutdown(timeout).err());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceFirmware, DeviceInfo, FW_VERSION};
    use resource_tree::ChangeKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedFirmware {
        downloads: AtomicUsize,
        updates: AtomicUsize,
        fail_download: Option<FirmwareUpdateStatus>,
        panic_update: bool,
    }

    impl ScriptedFirmware {
        fn new() -> Self {
            Self {
                downloads: AtomicUsize::new(0),
                updates: AtomicUsize::new(0),
                fail_download: None,
                panic_update: false,
            }
        }
    }

    impl FirmwareHandler for ScriptedFirmware {
        fn download(&self, command: &mut FirmwareCommand) -> Result<(), HandlerError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            match self.fail_download {
                Some(status) => Err(HandlerError::with_status(status, "download failed")),
                None => {
                    command.set_update_status(FirmwareUpdateStatus::Success);
                    Ok(())
                }
            }
        }

        fn update(&self, _command: &mut FirmwareCommand) -> Result<(), HandlerError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if self.panic_update {
                panic!("flash write failed");
            }
            Ok(())
        }
    }

    fn device() -> DeviceData {
        DeviceData::builder()
            .type_id("t")
            .device_id("d")
            .device_info(DeviceInfo::new().with_fw_version("1.0"))
            .firmware(DeviceFirmware::new().with_version("2.0").with_url("http://x/fw.bin"))
            .build()
            .unwrap()
    }

    fn worker(data: &DeviceData, handler: Arc<ScriptedFirmware>) -> FirmwareWorker {
        FirmwareWorker::new(handler, data.firmware().unwrap().clone(), Arc::clone(data.root()))
    }

    fn recorded_states(data: &DeviceData) -> Arc<Mutex<Vec<String>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&states);
        let fw = data.firmware().unwrap().clone();
        data.firmware().unwrap().node().add_external_observer(move |e| {
            if e.kind == ChangeKind::Updated {
                s.lock().push(fw.state().as_str().to_string());
            }
        });
        states
    }

    #[test]
    fn test_download_passes_through_downloading() {
        let data = device();
        let states = recorded_states(&data);
        let handler = Arc::new(ScriptedFirmware::new());
        let mut worker = worker(&data, Arc::clone(&handler));

        worker.process(FirmwareEvent::Download);

        assert_eq!(*states.lock(), vec!["DOWNLOADING", "DOWNLOADED"]);
        assert_eq!(handler.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(
            data.firmware().unwrap().update_status(),
            Some(FirmwareUpdateStatus::Success)
        );
    }

    #[test]
    fn test_download_failure_returns_to_idle() {
        let data = device();
        let handler = Arc::new(ScriptedFirmware {
            fail_download: Some(FirmwareUpdateStatus::OutOfMemory),
            ..ScriptedFirmware::new()
        });
        let mut worker = worker(&data, handler);

        worker.process(FirmwareEvent::Download);

        let fw = data.firmware().unwrap();
        assert_eq!(fw.state(), FirmwareState::Idle);
        assert_eq!(fw.update_status(), Some(FirmwareUpdateStatus::OutOfMemory));
    }

    #[test]
    fn test_update_while_idle_skips_handler() {
        let data = device();
        let handler = Arc::new(ScriptedFirmware::new());
        let mut worker = worker(&data, Arc::clone(&handler));

        worker.process(FirmwareEvent::Update);

        assert_eq!(handler.updates.load(Ordering::SeqCst), 0);
        let fw = data.firmware().unwrap();
        assert_eq!(fw.state(), FirmwareState::Idle);
        assert_eq!(fw.update_status(), Some(FirmwareUpdateStatus::UnsupportedImage));
    }

    #[test]
    fn test_update_success_copies_version() {
        let data = device();
        let handler = Arc::new(ScriptedFirmware::new());
        let mut worker = worker(&data, Arc::clone(&handler));

        worker.process(FirmwareEvent::Download);
        worker.process(FirmwareEvent::Update);

        assert_eq!(handler.updates.load(Ordering::SeqCst), 1);
        assert_eq!(data.firmware().unwrap().state(), FirmwareState::Idle);
        assert_eq!(
            data.resource(FW_VERSION).unwrap().value().as_str(),
            Some("2.0")
        );
    }

    #[test]
    fn test_update_panic_is_reported_as_failure() {
        let data = device();
        let handler = Arc::new(ScriptedFirmware {
            panic_update: true,
            ..ScriptedFirmware::new()
        });
        let mut worker = worker(&data, handler);

        worker.process(FirmwareEvent::Download);
        worker.process(FirmwareEvent::Update);

        let fw = data.firmware().unwrap();
        assert_eq!(fw.state(), FirmwareState::Idle);
        assert_eq!(fw.update_status(), Some(FirmwareUpdateStatus::UnsupportedImage));
        assert_eq!(data.resource(FW_VERSION).unwrap().value().as_str(), Some("1.0"));
    }

    struct SilentActions;

    impl DeviceActionHandler for SilentActions {
        fn reboot(&self, _action: &mut ActionCommand) {}

        fn factory_reset(&self, action: &mut ActionCommand) {
            action.set_status(ActionStatus::NotSupported);
            action.set_message("disabled");
        }
    }

    #[test]
    fn test_action_without_status_reports_failed() {
        let data = device();
        let mgmt = data.resource(MGMT).unwrap();
        let reported = Arc::new(Mutex::new(Vec::new()));

        let r = Arc::clone(&reported);
        let m = Arc::clone(&mgmt);
        mgmt.add_internal_observer(move |e| {
            if e.source.ends_with(".status") {
                let node = ActionNode::ensure(&m, DEVICE_ACTION, DEVICE_ACTION_LEAVES).unwrap();
                r.lock().push((node.text("reqId"), node.text("status"), node.text("message")));
            }
        });

        let mut worker =
            DeviceActionWorker::new(Arc::new(SilentActions), mgmt, Arc::new(Mutex::new(())));
        worker.process(DeviceActionEvent {
            kind: DeviceActionKind::Reboot,
            req_id: "r1".to_string(),
        });
        worker.process(DeviceActionEvent {
            kind: DeviceActionKind::FactoryReset,
            req_id: "r2".to_string(),
        });

        assert_eq!(
            *reported.lock(),
            vec![
                (Some("r1".to_string()), Some("FAILED".to_string()), None),
                (
                    Some("r2".to_string()),
                    Some("NOTSUPPORTED".to_string()),
                    Some("disabled".to_string())
                ),
            ]
        );
    }
}

//! Server command handling
//!
//! Commands decoded on the delivery thread are queued to the `dm-router`
//! thread, which validates them, applies them to the resource tree and
//! answers. Long-running work is not done here: firmware and action commands
//! raise a signal on the relevant node, and the session's internal
//! observers enqueue it to the capability's dispatcher.

use std::sync::{Arc, Weak};

use crossbeam::channel::Receiver;
use dm_protocol::{
    CancelBody, DeviceActionKind, FieldList, FieldValue, FirmwareState, FirmwareUpdateStatus,
    Request, Response, ResponseCode, ServerTopic,
};
use dm_transport::Message;
use resource_tree::{ChangeKind, Resource};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::model::{
    ActionNode, FirmwareResource, CUSTOM_ACTION, CUSTOM_ACTION_LEAVES, DEVICE_ACTION,
    DEVICE_ACTION_LEAVES, FIRMWARE, MGMT,
};
use crate::session::{Inner, Routed};

pub(crate) const SIGNAL_DOWNLOAD: &str = "download";
pub(crate) const SIGNAL_UPDATE: &str = "update";
pub(crate) const SIGNAL_REBOOT: &str = "reboot";
pub(crate) const SIGNAL_FACTORY_RESET: &str = "factory_reset";
pub(crate) const SIGNAL_CUSTOM: &str = "custom";

/// Body of the `dm-router` thread
pub(crate) fn run(inner: Weak<Inner>, rx: Receiver<Routed>) {
    debug!("Router started");
    while let Ok(routed) = rx.recv() {
        let (topic, message) = match routed {
            Routed::Command(topic, message) => (topic, message),
            Routed::Stop => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.route(topic, &message);
    }
    debug!("Router stopped");
}

impl Inner {
    fn route(&self, topic: ServerTopic, message: &Message) {
        if !self.session_state().is_managed() {
            debug!("Ignoring '{}' while not managed", message.topic);
            return;
        }
        let request = match Request::parse(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Dropping malformed request on '{}': {}", message.topic, e);
                return;
            }
        };
        debug!("Handling '{}' request {}", message.topic, request.req_id);

        match topic {
            ServerTopic::Observe => self.handle_observe(&request),
            ServerTopic::Cancel => self.handle_cancel(&request),
            ServerTopic::DeviceUpdate => self.handle_device_update(&request),
            ServerTopic::Reboot => self.handle_device_action(&request, DeviceActionKind::Reboot),
            ServerTopic::FactoryReset => {
                self.handle_device_action(&request, DeviceActionKind::FactoryReset)
            }
            ServerTopic::FirmwareDownload => self.handle_firmware_download(&request),
            ServerTopic::FirmwareUpdate => self.handle_firmware_update(&request),
            ServerTopic::CustomAction {
                bundle_id,
                action_id,
            } => self.handle_custom_action(&request, &bundle_id, &action_id),
            ServerTopic::Response => {}
        }
    }

    // ========================================================================
    // Observe / cancel / device update
    // ========================================================================

    fn handle_observe(&self, request: &Request) {
        let Some(list) = field_list(request) else {
            return self.respond(&request.req_id, ResponseCode::BAD_REQUEST, Some("missing fields"));
        };

        let root = self.data.root();
        let mut observed = Vec::new();
        for FieldValue { field, .. } in list.fields {
            match self.sync.observe(root, &field) {
                Some(value) => observed.push(FieldValue { field, value }),
                None => debug!("Cannot observe unknown field '{}'", field),
            }
        }

        if observed.is_empty() {
            return self.respond(&request.req_id, ResponseCode::NOT_FOUND, None);
        }
        info!("Server observing {} field(s)", observed.len());
        let fields = FieldList { fields: observed };
        match serde_json::to_value(&fields) {
            Ok(d) => self.send_response(Response::new(&request.req_id, ResponseCode::SUCCESS).with_data(d)),
            Err(e) => {
                warn!("Failed to encode observed fields: {}", e);
                self.respond(&request.req_id, ResponseCode::INTERNAL_ERROR, None);
            }
        }
    }

    fn handle_cancel(&self, request: &Request) {
        let d = request.d.clone().unwrap_or(Value::Null);
        let mut fields: Vec<String> = serde_json::from_value::<CancelBody>(d)
            .map(|body| body.data.into_iter().map(|f| f.field).collect())
            .unwrap_or_default();
        if fields.is_empty() {
            if let Some(list) = field_list(request) {
                fields = list.fields.into_iter().map(|f| f.field).collect();
            }
        }

        for field in &fields {
            if self.sync.cancel(field) {
                info!("Server cancelled observation of '{}'", field);
            }
        }
        self.respond(&request.req_id, ResponseCode::SUCCESS, None);
    }

    fn handle_device_update(&self, request: &Request) {
        let Some(list) = field_list(request) else {
            return self.respond(&request.req_id, ResponseCode::BAD_REQUEST, Some("missing fields"));
        };

        let root = self.data.root();
        let mut applied: Vec<Arc<Resource>> = Vec::new();
        let mut unknown: Vec<String> = Vec::new();
        for FieldValue { field, value } in list.fields {
            let Some(node) = root.resolve(&field) else {
                unknown.push(field);
                continue;
            };
            match node.apply_wire(&value, false) {
                Ok(()) => {
                    self.sync.refresh(root, &field);
                    applied.push(node);
                }
                Err(e) => {
                    warn!("Failed to apply update to '{}': {}", field, e);
                    unknown.push(field);
                }
            }
        }

        if unknown.is_empty() {
            self.respond(&request.req_id, ResponseCode::CHANGED, None);
        } else {
            self.send_response(
                Response::new(&request.req_id, ResponseCode::NOT_FOUND)
                    .with_data(json!({ "fields": unknown })),
            );
        }

        // Device code hears about the change only after the server has its answer
        for node in applied {
            node.notify_external();
        }
    }

    // ========================================================================
    // Device and custom actions
    // ========================================================================

    fn handle_device_action(&self, request: &Request, kind: DeviceActionKind) {
        let handle = self.dispatchers.lock().device_action_handle();
        let Some(handle) = handle else {
            return self.respond(
                &request.req_id,
                ResponseCode::NOT_IMPLEMENTED,
                Some("device actions not supported"),
            );
        };
        if !handle.has_capacity() {
            return self.respond(
                &request.req_id,
                ResponseCode::INTERNAL_ERROR,
                Some("device action queue full"),
            );
        }
        let signal = match kind {
            DeviceActionKind::FactoryReset => SIGNAL_FACTORY_RESET,
            _ => SIGNAL_REBOOT,
        };

        let result = self.data.node(MGMT).map_err(|e| e.to_string()).and_then(|mgmt| {
            let _guard = self.action_lock.lock();
            let node = ActionNode::ensure(&mgmt, DEVICE_ACTION, DEVICE_ACTION_LEAVES)
                .map_err(|e| e.to_string())?;
            node.set("action", kind.as_str()).map_err(|e| e.to_string())?;
            node.set("reqId", request.req_id.as_str())
                .map_err(|e| e.to_string())?;
            node.node().fire(ChangeKind::Signal(signal));
            Ok(())
        });
        if let Err(e) = result {
            warn!("Failed to start {}: {}", kind.as_str(), e);
            self.respond(&request.req_id, ResponseCode::INTERNAL_ERROR, Some(&e));
        }
    }

    fn handle_custom_action(&self, request: &Request, bundle_id: &str, action_id: &str) {
        let handle = self.dispatchers.lock().custom_action_handle();
        let Some(handle) = handle else {
            return self.respond(
                &request.req_id,
                ResponseCode::NOT_IMPLEMENTED,
                Some("custom actions not supported"),
            );
        };
        if !handle.has_capacity() {
            return self.respond(
                &request.req_id,
                ResponseCode::INTERNAL_ERROR,
                Some("custom action queue full"),
            );
        }

        let result = self.data.node(MGMT).map_err(|e| e.to_string()).and_then(|mgmt| {
            let _guard = self.action_lock.lock();
            let node = ActionNode::ensure(&mgmt, CUSTOM_ACTION, CUSTOM_ACTION_LEAVES)
                .map_err(|e| e.to_string())?;
            node.set("bundleId", bundle_id).map_err(|e| e.to_string())?;
            node.set("actionId", action_id).map_err(|e| e.to_string())?;
            node.set("data", request.d.clone()).map_err(|e| e.to_string())?;
            node.set("reqId", request.req_id.as_str())
                .map_err(|e| e.to_string())?;
            node.node().fire(ChangeKind::Signal(SIGNAL_CUSTOM));
            Ok(())
        });
        if let Err(e) = result {
            warn!("Failed to start custom action {}/{}: {}", bundle_id, action_id, e);
            self.respond(&request.req_id, ResponseCode::INTERNAL_ERROR, Some(&e));
        }
    }

    // ========================================================================
    // Firmware
    // ========================================================================

    fn handle_firmware_download(&self, request: &Request) {
        let handle = self.dispatchers.lock().firmware_handle();
        let (Some(handle), Some(firmware)) = (handle, self.data.firmware()) else {
            return self.respond(
                &request.req_id,
                ResponseCode::NOT_IMPLEMENTED,
                Some("firmware actions not supported"),
            );
        };
        if let Err(e) = self.apply_firmware_payload(firmware, request.d.as_ref()) {
            return self.respond(&request.req_id, ResponseCode::BAD_REQUEST, Some(&e));
        }

        let state = firmware.state();
        if state != FirmwareState::Idle {
            let message = format!("cannot download while firmware is {}", state);
            return self.respond(&request.req_id, ResponseCode::BAD_REQUEST, Some(&message));
        }
        let Some(url) = firmware.url() else {
            return self.respond(
                &request.req_id,
                ResponseCode::BAD_REQUEST,
                Some("firmware url is not set"),
            );
        };
        if let Err(e) = Url::parse(&url) {
            warn!("Rejecting firmware download from '{}': {}", url, e);
            if let Err(e) = firmware.set_update_status(FirmwareUpdateStatus::InvalidUri, true) {
                warn!("Failed to record invalid firmware url: {}", e);
            }
            return self.respond(
                &request.req_id,
                ResponseCode::BAD_REQUEST,
                Some("invalid firmware url"),
            );
        }
        if !handle.has_capacity() {
            return self.respond(
                &request.req_id,
                ResponseCode::INTERNAL_ERROR,
                Some("firmware queue full"),
            );
        }

        info!("Accepted firmware download from {}", url);
        self.respond(&request.req_id, ResponseCode::ACCEPTED, None);
        firmware.node().fire(ChangeKind::Signal(SIGNAL_DOWNLOAD));
    }

    fn handle_firmware_update(&self, request: &Request) {
        let handle = self.dispatchers.lock().firmware_handle();
        let (Some(handle), Some(firmware)) = (handle, self.data.firmware()) else {
            return self.respond(
                &request.req_id,
                ResponseCode::NOT_IMPLEMENTED,
                Some("firmware actions not supported"),
            );
        };
        if let Err(e) = self.apply_firmware_payload(firmware, request.d.as_ref()) {
            return self.respond(&request.req_id, ResponseCode::BAD_REQUEST, Some(&e));
        }
        if firmware.url().is_none() {
            return self.respond(
                &request.req_id,
                ResponseCode::BAD_REQUEST,
                Some("firmware url is not set"),
            );
        }
        if !handle.has_capacity() {
            return self.respond(
                &request.req_id,
                ResponseCode::INTERNAL_ERROR,
                Some("firmware queue full"),
            );
        }

        info!("Accepted firmware update");
        self.respond(&request.req_id, ResponseCode::ACCEPTED, None);
        firmware.node().fire(ChangeKind::Signal(SIGNAL_UPDATE));
    }

    /// Apply the optional `d` of a firmware command without notifying
    ///
    /// Accepts either a `{"fields": [...]}` list of canonical names or an
    /// object of firmware attributes.
    fn apply_firmware_payload(
        &self,
        firmware: &FirmwareResource,
        d: Option<&Value>,
    ) -> Result<(), String> {
        let root = self.data.root();
        match d {
            None | Some(Value::Null) => Ok(()),
            Some(d) if d.get("fields").is_some() => {
                let list = FieldList::from_value(d).map_err(|e| e.to_string())?;
                for FieldValue { field, value } in list.fields {
                    let node = root
                        .resolve(&field)
                        .ok_or_else(|| format!("unknown field '{}'", field))?;
                    node.apply_wire(&value, false).map_err(|e| e.to_string())?;
                    self.sync.refresh(root, &field);
                }
                Ok(())
            }
            Some(d @ Value::Object(_)) => {
                firmware.node().apply_wire(d, false).map_err(|e| e.to_string())?;
                self.sync.refresh(root, FIRMWARE);
                Ok(())
            }
            Some(other) => Err(format!("unexpected firmware payload {}", other)),
        }
    }
}

fn field_list(request: &Request) -> Option<FieldList> {
    let d = request.d.as_ref()?;
    FieldList::from_value(d).ok()
}

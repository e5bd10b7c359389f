//! Pending device and custom action nodes under `mgmt`
//!
//! Action nodes are created the first time the server requests an action
//! and reset once the handler's outcome has been reported.

use std::sync::Arc;

use dm_protocol::{ActionStatus, DeviceActionKind};
use resource_tree::{Resource, ResourceValue, Result};

pub(crate) const DEVICE_ACTION: &str = "deviceAction";
pub(crate) const CUSTOM_ACTION: &str = "customAction";

pub(crate) const DEVICE_ACTION_LEAVES: &[&str] = &["action", "reqId", "status", "message"];
pub(crate) const CUSTOM_ACTION_LEAVES: &[&str] =
    &["bundleId", "actionId", "data", "reqId", "status", "message"];

/// An action node such as `mgmt.deviceAction`
#[derive(Debug, Clone)]
pub(crate) struct ActionNode {
    node: Arc<Resource>,
}

impl ActionNode {
    /// Get or lazily create the named action node with its leaves
    pub(crate) fn ensure(mgmt: &Arc<Resource>, name: &str, leaves: &[&str]) -> Result<Self> {
        let node = mgmt.child_or_insert(name)?;
        for leaf in leaves {
            node.child_or_insert(leaf)?;
        }
        Ok(Self { node })
    }

    pub(crate) fn node(&self) -> &Arc<Resource> {
        &self.node
    }

    /// Set a leaf without notifying observers
    pub(crate) fn set(&self, leaf: &str, value: impl Into<ResourceValue>) -> Result<()> {
        self.node.child_or_insert(leaf)?.update(value, false)
    }

    pub(crate) fn get(&self, leaf: &str) -> ResourceValue {
        self.node
            .get_child(leaf)
            .map(|n| n.value())
            .unwrap_or_default()
    }

    pub(crate) fn text(&self, leaf: &str) -> Option<String> {
        self.get(leaf).as_str().map(str::to_string)
    }

    /// Record a handler outcome; setting the status notifies observers
    pub(crate) fn report(&self, status: ActionStatus, message: Option<String>) -> Result<()> {
        self.set("message", message)?;
        self.node
            .child_or_insert("status")?
            .update(status.as_str(), true)
    }

    /// Clear every leaf once the outcome has been reported
    ///
    /// The `action` leaf of a device action goes back to `NONE`.
    pub(crate) fn reset(&self) -> Result<()> {
        for child in self.node.children() {
            if child.name() == "action" {
                child.update(DeviceActionKind::None.as_str(), false)?;
            } else {
                child.update((), false)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_ensure_is_lazy_and_idempotent() {
        let root = Resource::root();
        let mgmt = root.add_child("mgmt", ()).unwrap();
        assert!(mgmt.get_child(DEVICE_ACTION).is_none());

        let first = ActionNode::ensure(&mgmt, DEVICE_ACTION, DEVICE_ACTION_LEAVES).unwrap();
        first.set("action", "REBOOT").unwrap();
        let second = ActionNode::ensure(&mgmt, DEVICE_ACTION, DEVICE_ACTION_LEAVES).unwrap();
        assert_eq!(second.text("action").as_deref(), Some("REBOOT"));
    }

    #[test]
    fn test_report_fires_once_then_reset_is_silent() {
        let root = Resource::root();
        let mgmt = root.add_child("mgmt", ()).unwrap();
        let action = ActionNode::ensure(&mgmt, DEVICE_ACTION, DEVICE_ACTION_LEAVES).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        mgmt.add_internal_observer(move |e| s.lock().push(e.source.clone()));

        action.set("reqId", "r-1").unwrap();
        action
            .report(ActionStatus::Accepted, Some("rebooting".to_string()))
            .unwrap();
        action.reset().unwrap();

        assert_eq!(*seen.lock(), vec!["mgmt.deviceAction.status".to_string()]);
        assert!(action.get("reqId").is_empty());
        assert!(action.get("status").is_empty());
        assert_eq!(action.text("action").as_deref(), Some("NONE"));
    }
}

//! Outbound synchronisation of tracked fields
//!
//! While managed, `mgmt.firmware` and `deviceInfo` are always tracked;
//! the server can add more fields with observe and remove them with cancel.
//! For each tracked field the last reported value is kept, and every change
//! is reported trimmed to the top-level keys that differ from it.

use std::collections::HashMap;
use std::sync::Arc;

use dm_protocol::{FieldList, FieldValue};
use parking_lot::Mutex;
use resource_tree::{ChangeEvent, ChangeKind, Resource, PATH_SEPARATOR};
use serde_json::{Map, Value};

use crate::model::{DEVICE_INFO, FIRMWARE};

/// Fields tracked for the whole managed session
pub const ALWAYS_SYNCED: &[&str] = &[FIRMWARE, DEVICE_INFO];

#[derive(Debug, Clone)]
struct Tracked {
    last: Value,
    observed: bool,
    always: bool,
}

/// Last-reported values of tracked fields
#[derive(Debug, Default)]
pub struct SyncState {
    fields: Mutex<HashMap<String, Tracked>>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking the always-synced fields from their current values
    pub fn begin(&self, root: &Arc<Resource>) {
        let mut fields = self.fields.lock();
        for name in ALWAYS_SYNCED {
            if let Some(node) = root.resolve(name) {
                fields.insert(
                    name.to_string(),
                    Tracked {
                        last: node.to_wire(),
                        observed: false,
                        always: true,
                    },
                );
            }
        }
    }

    /// Track `field` at the server's request, returning its current value
    pub fn observe(&self, root: &Arc<Resource>, field: &str) -> Option<Value> {
        let node = root.resolve(field)?;
        let current = node.to_wire();
        let mut fields = self.fields.lock();
        let entry = fields.entry(field.to_string()).or_insert_with(|| Tracked {
            last: Value::Null,
            observed: false,
            always: false,
        });
        entry.last = current.clone();
        entry.observed = true;
        Some(current)
    }

    /// Stop an observation; always-synced fields keep being tracked
    pub fn cancel(&self, field: &str) -> bool {
        let mut fields = self.fields.lock();
        match fields.get_mut(field) {
            Some(tracked) if tracked.always => {
                let was_observed = tracked.observed;
                tracked.observed = false;
                was_observed
            }
            Some(_) => fields.remove(field).is_some(),
            None => false,
        }
    }

    /// Adopt the current value of every tracked field touching `field` as
    /// already reported
    pub fn refresh(&self, root: &Arc<Resource>, field: &str) {
        let mut fields = self.fields.lock();
        for (name, tracked) in fields.iter_mut() {
            if related(name, field) {
                if let Some(node) = root.resolve(name) {
                    tracked.last = node.to_wire();
                }
            }
        }
    }

    pub fn is_tracked(&self, field: &str) -> bool {
        self.fields.lock().contains_key(field)
    }

    pub fn observed(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .fields
            .lock()
            .iter()
            .filter(|(_, t)| t.observed)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.fields.lock().clear();
    }

    /// Compute the notification for a change event, if any tracked field moved
    pub fn on_change(&self, root: &Arc<Resource>, event: &ChangeEvent) -> Option<FieldList> {
        if event.kind != ChangeKind::Updated {
            return None;
        }
        let mut fields = self.fields.lock();
        let mut changed: Vec<FieldValue> = Vec::new();
        for (name, tracked) in fields.iter_mut() {
            if !related(name, &event.source) {
                continue;
            }
            let Some(node) = root.resolve(name) else {
                continue;
            };
            let current = node.to_wire();
            if let Some(diff) = trimmed_diff(&tracked.last, &current) {
                changed.push(FieldValue {
                    field: name.clone(),
                    value: diff,
                });
                tracked.last = current;
            }
        }
        if changed.is_empty() {
            return None;
        }
        changed.sort_by(|a, b| a.field.cmp(&b.field));
        Some(FieldList { fields: changed })
    }
}

/// Whether one canonical name is the other or an ancestor of it
fn related(a: &str, b: &str) -> bool {
    fn within(inner: &str, outer: &str) -> bool {
        outer.is_empty()
            || inner == outer
            || (inner.starts_with(outer) && inner[outer.len()..].starts_with(PATH_SEPARATOR))
    }
    within(a, b) || within(b, a)
}

/// Keys of `current` whose values differ from `last`
///
/// Non-object values are reported whole when they change. Keys that
/// disappeared are reported as null.
fn trimmed_diff(last: &Value, current: &Value) -> Option<Value> {
    match (last, current) {
        (Value::Object(before), Value::Object(after)) => {
            let mut diff = Map::new();
            for (key, value) in after {
                if before.get(key) != Some(value) {
                    diff.insert(key.clone(), value.clone());
                }
            }
            for key in before.keys() {
                if !after.contains_key(key) {
                    diff.insert(key.clone(), Value::Null);
                }
            }
            (!diff.is_empty()).then_some(Value::Object(diff))
        }
        _ if last == current => None,
        _ => Some(current.clone()),
    }
}

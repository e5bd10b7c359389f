//! Resource nodes and the tree they form
//!
//! A [`Resource`] is a named node holding a [`ResourceValue`], an ordered
//! list of uniquely named children and two observer lists:
//! - internal observers (outbound sync, dispatch) run first
//! - external observers (device code) run afterwards, isolated from panics
//!
//! Observers run synchronously on the thread that performed the update.
//! While a node's observers run, that thread may not update the node (or any
//! node on the path the event bubbles along); such updates fail with
//! [`ResourceError::Reentrant`] instead of recursing.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::error::{ResourceError, Result};
use crate::event::{ChangeEvent, ChangeKind, Observer, ObserverId};
use crate::value::ResourceValue;

/// Separator between path segments in canonical names
pub const PATH_SEPARATOR: char = '.';

/// A named, observable node in the device-state tree
///
/// # Example
///
/// ```rust,ignore
/// use resource_tree::Resource;
///
/// let root = Resource::root();
/// let firmware = root.add_child("mgmt", ())?.add_child("firmware", ())?;
/// let state = firmware.add_child("state", "IDLE")?;
///
/// firmware.add_external_observer(|event| println!("{} changed", event.source));
/// state.update("DOWNLOADING", true)?;
///
/// assert_eq!(state.canonical_name(), "mgmt.firmware.state");
/// ```
pub struct Resource {
    name: String,
    canonical_name: String,
    parent: Weak<Resource>,
    value: RwLock<ResourceValue>,
    children: RwLock<Vec<Arc<Resource>>>,
    internal: RwLock<Vec<(ObserverId, Observer)>>,
    external: RwLock<Vec<(ObserverId, Observer)>>,
    /// Threads currently running observers for an event passing through this node
    notifying: Mutex<Vec<ThreadId>>,
}

impl Resource {
    /// Create the root of a new tree
    ///
    /// The root has an empty canonical name; its children are addressed by
    /// their own name alone.
    pub fn root() -> Arc<Resource> {
        Arc::new(Resource {
            name: String::new(),
            canonical_name: String::new(),
            parent: Weak::new(),
            value: RwLock::new(ResourceValue::Empty),
            children: RwLock::new(Vec::new()),
            internal: RwLock::new(Vec::new()),
            external: RwLock::new(Vec::new()),
            notifying: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dot-joined path from the tree root
    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn parent(&self) -> Option<Arc<Resource>> {
        self.parent.upgrade()
    }

    pub fn value(&self) -> ResourceValue {
        self.value.read().clone()
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Append a new child with an initial value
    pub fn add_child(
        self: &Arc<Self>,
        name: &str,
        value: impl Into<ResourceValue>,
    ) -> Result<Arc<Resource>> {
        validate_name(name)?;
        let mut children = self.children.write();
        if children.iter().any(|c| c.name == name) {
            return Err(ResourceError::DuplicateChild {
                parent: self.canonical_name.clone(),
                name: name.to_string(),
            });
        }
        let child = Arc::new(self.new_child(name, value.into()));
        children.push(Arc::clone(&child));
        Ok(child)
    }

    /// Return the named child, creating it empty if absent
    pub fn child_or_insert(self: &Arc<Self>, name: &str) -> Result<Arc<Resource>> {
        validate_name(name)?;
        let mut children = self.children.write();
        if let Some(existing) = children.iter().find(|c| c.name == name) {
            return Ok(Arc::clone(existing));
        }
        let child = Arc::new(self.new_child(name, ResourceValue::Empty));
        children.push(Arc::clone(&child));
        Ok(child)
    }

    pub fn get_child(&self, name: &str) -> Option<Arc<Resource>> {
        self.children.read().iter().find(|c| c.name == name).cloned()
    }

    pub fn remove_child(&self, name: &str) -> Option<Arc<Resource>> {
        let mut children = self.children.write();
        let index = children.iter().position(|c| c.name == name)?;
        Some(children.remove(index))
    }

    /// Snapshot of the children in insertion order
    pub fn children(&self) -> Vec<Arc<Resource>> {
        self.children.read().clone()
    }

    pub fn has_children(&self) -> bool {
        !self.children.read().is_empty()
    }

    /// Look up a descendant by a path relative to this node
    ///
    /// An empty path resolves to the node itself.
    pub fn resolve(self: &Arc<Self>, path: &str) -> Option<Arc<Resource>> {
        if path.is_empty() {
            return Some(Arc::clone(self));
        }
        path.split(PATH_SEPARATOR)
            .try_fold(Arc::clone(self), |node, segment| node.get_child(segment))
    }

    fn new_child(self: &Arc<Self>, name: &str, value: ResourceValue) -> Resource {
        let canonical_name = if self.canonical_name.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", self.canonical_name, PATH_SEPARATOR, name)
        };
        Resource {
            name: name.to_string(),
            canonical_name,
            parent: Arc::downgrade(self),
            value: RwLock::new(value),
            children: RwLock::new(Vec::new()),
            internal: RwLock::new(Vec::new()),
            external: RwLock::new(Vec::new()),
            notifying: Mutex::new(Vec::new()),
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Set the node's value, notifying observers when `fire` is true
    ///
    /// Fails with [`ResourceError::Reentrant`] when called from one of this
    /// node's own observers; the value is left untouched in that case.
    pub fn update(self: &Arc<Self>, value: impl Into<ResourceValue>, fire: bool) -> Result<()> {
        self.check_reentrancy()?;
        *self.value.write() = value.into();
        if fire {
            self.fire(ChangeKind::Updated);
        }
        Ok(())
    }

    /// Apply a wire-format JSON value to this subtree
    ///
    /// Objects are applied key by key onto children (created when missing)
    /// if this node already has children; anything else replaces the value.
    /// Observers are notified once, for this node, when `fire` is true.
    pub fn apply_wire(self: &Arc<Self>, json: &Value, fire: bool) -> Result<()> {
        self.check_reentrancy()?;
        self.apply_wire_silent(json)?;
        if fire {
            self.fire(ChangeKind::Updated);
        }
        Ok(())
    }

    fn apply_wire_silent(self: &Arc<Self>, json: &Value) -> Result<()> {
        match json {
            Value::Object(fields) if self.has_children() => {
                for (key, value) in fields {
                    let child = self.child_or_insert(key)?;
                    child.check_reentrancy()?;
                    child.apply_wire_silent(value)?;
                }
            }
            other => {
                let mut current = self.value.write();
                *current = ResourceValue::from_json(other, &current);
            }
        }
        Ok(())
    }

    /// Serialize this subtree to the protocol's JSON shape
    ///
    /// Nodes with children become objects (unset children are omitted);
    /// leaves yield their value.
    pub fn to_wire(&self) -> Value {
        let children = self.children();
        if children.is_empty() {
            return self.value.read().to_json();
        }
        let mut object = Map::new();
        for child in children {
            let wire = child.to_wire();
            if !wire.is_null() {
                object.insert(child.name.clone(), wire);
            }
        }
        Value::Object(object)
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn add_internal_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = ObserverId::next();
        self.internal.write().push((id, Arc::new(observer)));
        id
    }

    pub fn add_external_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = ObserverId::next();
        self.external.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer from either list, returning whether it was present
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut removed = false;
        self.internal.write().retain(|(oid, _)| {
            let keep = *oid != id;
            removed |= !keep;
            keep
        });
        self.external.write().retain(|(oid, _)| {
            let keep = *oid != id;
            removed |= !keep;
            keep
        });
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.internal.read().len() + self.external.read().len()
    }

    // ========================================================================
    // Notification
    // ========================================================================

    /// Raise an event from this node
    ///
    /// Internal observers on this node and every ancestor run first, in
    /// registration order from the source upward; external observers follow.
    pub fn fire(self: &Arc<Self>, kind: ChangeKind) {
        self.notify(kind, true);
    }

    /// Deliver an `Updated` event to external observers only
    ///
    /// Used after values were applied silently and internal bookkeeping has
    /// already been done by the caller.
    pub fn notify_external(self: &Arc<Self>) {
        self.notify(ChangeKind::Updated, false);
    }

    fn notify(self: &Arc<Self>, kind: ChangeKind, include_internal: bool) {
        let event = ChangeEvent::new(self.canonical_name.clone(), kind);
        let path = self.path_to_root();
        let _guard = NotifyGuard::enter(&path);
        trace!("Notifying {:?} on '{}'", kind, event.source);

        if include_internal {
            for node in &path {
                let observers: Vec<Observer> =
                    node.internal.read().iter().map(|(_, o)| Arc::clone(o)).collect();
                for observer in observers {
                    if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                        warn!("Internal observer on '{}' panicked", node.canonical_name);
                    }
                }
            }
        }

        for node in &path {
            let observers: Vec<Observer> =
                node.external.read().iter().map(|(_, o)| Arc::clone(o)).collect();
            for observer in observers {
                if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                    warn!("External observer on '{}' panicked", node.canonical_name);
                }
            }
        }
    }

    fn path_to_root(self: &Arc<Self>) -> Vec<Arc<Resource>> {
        let mut path = vec![Arc::clone(self)];
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            path.push(node);
        }
        path
    }

    fn check_reentrancy(&self) -> Result<()> {
        let me = thread::current().id();
        if self.notifying.lock().contains(&me) {
            return Err(ResourceError::Reentrant(self.canonical_name.clone()));
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(PATH_SEPARATOR) {
        return Err(ResourceError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Marks the current thread as notifying every node on an event's path
struct NotifyGuard {
    nodes: Vec<Arc<Resource>>,
    thread: ThreadId,
}

impl NotifyGuard {
    fn enter(nodes: &[Arc<Resource>]) -> Self {
        let thread = thread::current().id();
        for node in nodes {
            node.notifying.lock().push(thread);
        }
        Self {
            nodes: nodes.to_vec(),
            thread,
        }
    }
}

impl Drop for NotifyGuard {
    fn drop(&mut self) {
        for node in &self.nodes {
            let mut notifying = node.notifying.lock();
            if let Some(pos) = notifying.iter().position(|t| *t == self.thread) {
                notifying.swap_remove(pos);
            }
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("canonical_name", &self.canonical_name)
            .field("value", &*self.value.read())
            .field("children", &self.children.read().len())
            .finish()
    }
}

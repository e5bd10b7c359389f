//! Session controller
//!
//! Owns the management session state machine:
//!
//! ```text
//! Unmanaged --manage--> Managing --rc 2xx--> Managed(deadline) --unmanage--> Unmanaging --> Unmanaged
//!                           |                    |  ^
//!                           +--failure--> Unmanaged  +--renewal at deadline - 2min
//! ```
//!
//! Handshakes (manage, renewal, resume, unmanage) run under one
//! controller-wide lock. Inbound commands are decoded on the transport's
//! delivery thread and handed to the router thread; responses go to the
//! correlator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use dm_protocol::{
    DeviceActionKind, DeviceTopic, ManageBody, Response, ResponseCode, ServerTopic, Supports,
    SERVER_WILDCARD,
};
use dm_transport::{ConnectionListener, Message, Reconnector, Transport, TransportError};
use parking_lot::{Mutex, RwLock};
use resource_tree::{ChangeEvent, ChangeKind, ObserverId, Resource};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{renewal_delay, validate_lifetime, ManagedClientConfig};
use crate::correlator::Correlator;
use crate::error::{Capability, DmError, Result};
use crate::handler::{HandlerRegistry, RegisteredHandler};
use crate::model::{
    ActionNode, DeviceData, CUSTOM_ACTION, CUSTOM_ACTION_LEAVES, DEVICE_ACTION,
    DEVICE_ACTION_LEAVES, FIRMWARE, MGMT,
};
use crate::publisher::Publisher;
use crate::router::{self, SIGNAL_CUSTOM, SIGNAL_DOWNLOAD, SIGNAL_FACTORY_RESET, SIGNAL_REBOOT, SIGNAL_UPDATE};
use crate::sync::SyncState;
use crate::workers::{CustomActionEvent, DeviceActionEvent, Dispatchers, FirmwareEvent};

/// State of the management session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unmanaged,
    Managing,
    /// `deadline` is `None` for sessions that never expire
    Managed { deadline: Option<Instant> },
    Unmanaging,
}

impl SessionState {
    pub fn is_managed(&self) -> bool {
        matches!(self, SessionState::Managed { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            SessionState::Managed { deadline } => *deadline,
            _ => None,
        }
    }
}

/// Work handed from the delivery thread to the router thread
pub(crate) enum Routed {
    Command(ServerTopic, Message),
    Stop,
}

/// State guarded by the controller-wide lock
#[derive(Default)]
pub(crate) struct SessionCore {
    lifetime: Duration,
    observers: Vec<(Arc<Resource>, ObserverId)>,
}

pub(crate) struct Inner {
    pub(crate) config: ManagedClientConfig,
    pub(crate) data: DeviceData,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) correlator: Correlator,
    pub(crate) publisher: Publisher,
    pub(crate) handlers: RwLock<HandlerRegistry>,
    pub(crate) sync: SyncState,
    pub(crate) dispatchers: Mutex<Dispatchers>,
    /// Serializes writes to the pending action nodes
    pub(crate) action_lock: Arc<Mutex<()>>,
    state: RwLock<SessionState>,
    supports: RwLock<Supports>,
    core: Mutex<SessionCore>,
    clock: Arc<dyn Clock>,
    router_tx: Sender<Routed>,
    router: Mutex<Option<JoinHandle<()>>>,
    /// Dropping the sender cancels the pending renewal timer
    renewal: Mutex<Option<Sender<()>>>,
    /// Dropping the sender cancels a running reconnect loop
    reconnect: Mutex<Option<Sender<()>>>,
    closed: AtomicBool,
}

impl Inner {
    pub(crate) fn new(
        data: DeviceData,
        transport: Arc<dyn Transport>,
        config: ManagedClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Inner>> {
        config.validate()?;
        let publisher = Publisher::start(Arc::clone(&transport), config.qos)?;
        let correlator = Correlator::new(Arc::clone(&transport), config.qos);
        let (router_tx, router_rx) = unbounded();

        let inner = Arc::new(Inner {
            config,
            data,
            transport,
            correlator,
            publisher,
            handlers: RwLock::new(HandlerRegistry::new()),
            sync: SyncState::new(),
            dispatchers: Mutex::new(Dispatchers::default()),
            action_lock: Arc::new(Mutex::new(())),
            state: RwLock::new(SessionState::Unmanaged),
            supports: RwLock::new(Supports::default()),
            core: Mutex::new(SessionCore::default()),
            clock,
            router_tx,
            router: Mutex::new(None),
            renewal: Mutex::new(None),
            reconnect: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let handle = thread::Builder::new()
            .name("dm-router".to_string())
            .spawn(move || router::run(weak, router_rx))
            .map_err(|_| DmError::Spawn("router"))?;
        *inner.router.lock() = Some(handle);

        inner
            .transport
            .set_connection_listener(Arc::new(SessionListener {
                inner: Arc::downgrade(&inner),
            }));

        info!(
            "Created managed client for {}:{}",
            inner.data.type_id(),
            inner.data.device_id()
        );
        Ok(inner)
    }

    pub(crate) fn session_state(&self) -> SessionState {
        *self.state.read()
    }

    pub(crate) fn supports(&self) -> Supports {
        *self.supports.read()
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if std::mem::discriminant(&previous) != std::mem::discriminant(&state) {
            debug!("Session state {:?} -> {:?}", previous, state);
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DmError::Closed);
        }
        Ok(())
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    pub(crate) fn register(&self, handler: RegisteredHandler) -> Result<()> {
        self.ensure_open()?;
        if handler.capability() == Capability::Firmware && self.data.firmware().is_none() {
            return Err(DmError::MissingResource(FIRMWARE));
        }
        let capability = handler.capability();
        self.handlers.write().register(handler)?;
        info!("Registered {} handler", capability);

        if self.session_state().is_managed() {
            self.start_dispatchers()?;
        }
        Ok(())
    }

    fn start_dispatchers(&self) -> Result<()> {
        let registry = self.handlers.read().clone();
        self.dispatchers.lock().start_missing(
            &registry,
            &self.data,
            self.config.dispatcher_queue_capacity,
            &self.action_lock,
        )?;
        Ok(())
    }

    fn declared_supports(&self) -> Supports {
        let handlers = self.handlers.read();
        Supports {
            device_actions: self.config.supports_device_actions
                || handlers.contains(Capability::DeviceAction),
            firmware_actions: self.config.supports_firmware_actions
                || handlers.contains(Capability::Firmware),
        }
    }

    // ========================================================================
    // Manage / unmanage
    // ========================================================================

    pub(crate) fn manage(self: &Arc<Self>, lifetime: Duration) -> Result<()> {
        self.ensure_open()?;
        validate_lifetime(lifetime)?;

        let mut core = self.core.lock();
        let already_managed = self.session_state().is_managed();

        if !self.transport.is_connected() {
            self.transport.connect()?;
        }
        self.subscribe()?;

        core.lifetime = lifetime;
        *self.supports.write() = self.declared_supports();
        if !already_managed {
            self.set_state(SessionState::Managing);
        }

        let deadline = match self.send_manage(lifetime) {
            Ok(deadline) => deadline,
            Err(e) => {
                warn!("Manage request failed: {}", e);
                if !already_managed {
                    *self.supports.write() = Supports::default();
                    self.set_state(SessionState::Unmanaged);
                }
                return Err(e);
            }
        };

        if !already_managed {
            if let Err(e) = self.start_session(&mut core) {
                error!("Failed to start managed session: {}", e);
                self.teardown(&mut core);
                return Err(e);
            }
        }

        self.set_state(SessionState::Managed { deadline });
        if !lifetime.is_zero() {
            self.schedule_renewal(renewal_delay(lifetime));
        } else {
            self.cancel_renewal();
        }
        info!(
            "Device {} managed (lifetime {}s)",
            self.data.device_id(),
            lifetime.as_secs()
        );
        Ok(())
    }

    /// Send a manage request, returning the new session deadline
    fn send_manage(&self, lifetime: Duration) -> Result<Option<Instant>> {
        let body = ManageBody {
            supports: self.supports(),
            device_info: self.data.device_info(),
            metadata: self.data.metadata(),
            lifetime: (!lifetime.is_zero()).then(|| lifetime.as_secs()),
        };
        let response = self.correlator.send_and_wait(
            DeviceTopic::Manage.as_str(),
            body.to_payload()?,
            self.config.request_timeout,
        )?;
        check(response)?;
        Ok((!lifetime.is_zero()).then(|| self.clock.now() + lifetime))
    }

    fn start_session(self: &Arc<Self>, core: &mut SessionCore) -> Result<()> {
        self.start_dispatchers()?;

        let root = self.data.root();
        self.sync.begin(root);

        let weak = Arc::downgrade(self);
        let id = root.add_internal_observer(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.publish_changes(event);
            }
        });
        core.observers.push((Arc::clone(root), id));

        if let Some(firmware) = self.data.firmware() {
            let weak = Arc::downgrade(self);
            let id = firmware.node().add_internal_observer(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_firmware_event(event);
                }
            });
            core.observers.push((Arc::clone(firmware.node()), id));
        }

        let mgmt = self.data.node(MGMT)?;
        let weak = Arc::downgrade(self);
        let id = mgmt.add_internal_observer(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_action_event(event);
            }
        });
        core.observers.push((mgmt, id));
        Ok(())
    }

    pub(crate) fn unmanage(&self) -> Result<()> {
        let mut core = self.core.lock();
        if self.session_state() == SessionState::Unmanaged {
            debug!("Unmanage called while already unmanaged");
            return Ok(());
        }
        self.set_state(SessionState::Unmanaging);
        self.cancel_renewal();

        let result = self
            .correlator
            .send_and_wait(
                DeviceTopic::Unmanage.as_str(),
                Value::Null,
                self.config.request_timeout,
            )
            .and_then(check);
        if let Err(e) = &result {
            warn!("Unmanage request failed, tearing down anyway: {}", e);
        }

        self.teardown(&mut core);
        info!("Device {} unmanaged", self.data.device_id());
        result.map(|_| ())
    }

    /// Stop dispatchers, detach observers and clear capability flags
    fn teardown(&self, core: &mut SessionCore) {
        self.cancel_renewal();

        let dispatchers = std::mem::take(&mut *self.dispatchers.lock());
        for e in dispatchers.shutdown(self.config.shutdown_timeout) {
            warn!("{}", e);
        }

        for (node, id) in core.observers.drain(..) {
            node.remove_observer(id);
        }
        self.sync.clear();
        *self.supports.write() = Supports::default();
        self.set_state(SessionState::Unmanaged);
    }

    // ========================================================================
    // Renewal
    // ========================================================================

    fn schedule_renewal(self: &Arc<Self>, delay: Duration) {
        let (tx, rx) = bounded::<()>(1);
        // Replacing the sender cancels the previous timer
        *self.renewal.lock() = Some(tx);
        let weak = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name("dm-renewal".to_string())
            .spawn(move || renewal_timer(weak, rx, delay));
        match spawned {
            Ok(_) => debug!("Session renewal scheduled in {:?}", delay),
            Err(e) => error!("Failed to spawn renewal timer: {}", e),
        }
    }

    fn cancel_renewal(&self) {
        self.renewal.lock().take();
    }

    fn renew(self: &Arc<Self>, cancel: &Receiver<()>) {
        let attempts = self.config.renewal_retry_attempts.max(1);
        for attempt in 1..=attempts {
            let outcome = {
                let core = self.core.lock();
                if !self.session_state().is_managed() || is_cancelled(cancel) {
                    return;
                }
                if !self.transport.is_connected() {
                    debug!("Deferring renewal until the transport reconnects");
                    return;
                }
                let lifetime = core.lifetime;
                self.send_manage(lifetime).map(|deadline| {
                    self.set_state(SessionState::Managed { deadline });
                    lifetime
                })
            };

            match outcome {
                Ok(lifetime) => {
                    info!("Session renewed for {}s", lifetime.as_secs());
                    if !lifetime.is_zero() {
                        self.schedule_renewal(renewal_delay(lifetime));
                    }
                    return;
                }
                Err(e) => {
                    warn!("Renewal attempt {}/{} failed: {}", attempt, attempts, e);
                    if attempt < attempts {
                        let backoff = self
                            .config
                            .renewal_retry_backoff
                            .saturating_mul(1 << (attempt - 1).min(16));
                        match cancel.recv_timeout(backoff) {
                            Err(RecvTimeoutError::Timeout) => {}
                            _ => return,
                        }
                    }
                }
            }
        }

        warn!("Session expired after {} failed renewal attempts", attempts);
        let mut core = self.core.lock();
        if self.session_state().is_managed() && !is_cancelled(cancel) {
            self.teardown(&mut core);
        }
    }

    // ========================================================================
    // Connection handling
    // ========================================================================

    fn subscribe(self: &Arc<Self>) -> Result<()> {
        let weak = Arc::downgrade(self);
        self.transport.subscribe(
            SERVER_WILDCARD,
            self.config.qos,
            Arc::new(move |message: Message| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_message(message);
                }
            }),
        )?;
        Ok(())
    }

    /// Runs on the transport's delivery thread; never blocks
    fn on_message(&self, message: Message) {
        self.correlator.note_delivery_thread();
        match ServerTopic::parse(&message.topic) {
            Some(ServerTopic::Response) => self.correlator.deliver(&message.payload),
            Some(topic) => {
                if self.router_tx.send(Routed::Command(topic, message)).is_err() {
                    debug!("Router stopped, dropping command");
                }
            }
            None => debug!("Ignoring message on unknown topic '{}'", message.topic),
        }
    }

    fn start_reconnect(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = bounded::<()>(1);
        *self.reconnect.lock() = Some(tx);
        let transport = Arc::clone(&self.transport);
        let reconnector = Reconnector::new(self.config.reconnect.clone());
        let spawned = thread::Builder::new()
            .name("dm-reconnect".to_string())
            .spawn(move || match reconnector.run(transport.as_ref(), &rx) {
                Ok(failures) => debug!("Transport reconnected after {} failures", failures),
                Err(e) => debug!("Reconnect loop ended: {}", e),
            });
        if let Err(e) = spawned {
            error!("Failed to spawn reconnect thread: {}", e);
        }
    }

    fn cancel_reconnect(&self) {
        self.reconnect.lock().take();
    }

    /// Re-establish the session after the transport reconnected
    ///
    /// Re-issues manage with the lifetime remaining until the stored
    /// deadline, then republishes messages accepted while disconnected in
    /// their original order.
    fn resume(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let _core = self.core.lock();
        if let Err(e) = self.subscribe() {
            warn!("Failed to resubscribe after reconnect: {}", e);
        }
        let pending = self.transport.take_pending();

        if let SessionState::Managed { deadline } = self.session_state() {
            let lifetime = match deadline {
                Some(deadline) => remaining_lifetime(deadline, self.clock.now()),
                None => Duration::ZERO,
            };
            info!("Resuming session with lifetime {}s", lifetime.as_secs());
            match self.send_manage(lifetime) {
                Ok(deadline) => {
                    self.set_state(SessionState::Managed { deadline });
                    if !lifetime.is_zero() {
                        self.schedule_renewal(renewal_delay(lifetime));
                    }
                }
                Err(e) => {
                    warn!("Resume manage failed, retrying as renewal: {}", e);
                    self.schedule_renewal(Duration::ZERO);
                }
            }
        }

        if !pending.is_empty() {
            info!("Republishing {} message(s) queued while disconnected", pending.len());
        }
        for message in pending {
            if let Err(e) = self
                .transport
                .publish(&message.topic, message.payload, message.qos)
            {
                warn!("Failed to republish to '{}': {}", message.topic, e);
            }
        }
    }

    pub(crate) fn disconnect(&self) -> Result<()> {
        let result = if self.session_state() != SessionState::Unmanaged {
            self.unmanage()
        } else {
            Ok(())
        };
        self.cancel_reconnect();
        self.transport.disconnect()?;
        info!("Disconnected");
        result
    }

    /// Stop all background threads; the client is unusable afterwards
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_reconnect();
        {
            let mut core = self.core.lock();
            if self.session_state() != SessionState::Unmanaged {
                self.teardown(&mut core);
            }
        }
        if let Err(e) = self.transport.unsubscribe(SERVER_WILDCARD) {
            debug!("Unsubscribe on close failed: {}", e);
        }

        let _ = self.router_tx.send(Routed::Stop);
        if let Some(handle) = self.router.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.publisher.stop();
        debug!("Managed client closed");
    }

    // ========================================================================
    // Internal observers
    // ========================================================================

    fn publish_changes(&self, event: &ChangeEvent) {
        let Some(list) = self.sync.on_change(self.data.root(), event) else {
            return;
        };
        match list.to_payload() {
            Ok(payload) => self.publisher.enqueue(DeviceTopic::Notify.as_str(), &payload),
            Err(e) => warn!("Failed to encode notification: {}", e),
        }
    }

    fn on_firmware_event(&self, event: &ChangeEvent) {
        if event.source != FIRMWARE {
            return;
        }
        let firmware_event = match event.kind {
            ChangeKind::Signal(SIGNAL_DOWNLOAD) => FirmwareEvent::Download,
            ChangeKind::Signal(SIGNAL_UPDATE) => FirmwareEvent::Update,
            _ => return,
        };
        let handle = self.dispatchers.lock().firmware_handle();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.submit(firmware_event) {
                    warn!("Dropping firmware {:?}: {}", firmware_event, e);
                }
            }
            None => warn!("No firmware dispatcher for {:?}", firmware_event),
        }
    }

    fn on_action_event(&self, event: &ChangeEvent) {
        let Ok(mgmt) = self.data.node(MGMT) else {
            return;
        };
        let device_action = format!("{}.{}", MGMT, DEVICE_ACTION);
        let custom_action = format!("{}.{}", MGMT, CUSTOM_ACTION);

        match event.kind {
            ChangeKind::Signal(signal) if event.source == device_action => {
                let kind = match signal {
                    SIGNAL_REBOOT => DeviceActionKind::Reboot,
                    SIGNAL_FACTORY_RESET => DeviceActionKind::FactoryReset,
                    _ => return,
                };
                let Ok(node) = ActionNode::ensure(&mgmt, DEVICE_ACTION, DEVICE_ACTION_LEAVES) else {
                    return;
                };
                let req_id = node.text("reqId").unwrap_or_default();
                let handle = self.dispatchers.lock().device_action_handle();
                let submitted = match handle {
                    Some(handle) => handle
                        .submit(DeviceActionEvent {
                            kind,
                            req_id: req_id.clone(),
                        })
                        .map_err(|e| e.to_string()),
                    None => Err("device actions not supported".to_string()),
                };
                if let Err(e) = submitted {
                    warn!("Rejecting {} request {}: {}", kind.as_str(), req_id, e);
                    self.respond(&req_id, ResponseCode::INTERNAL_ERROR, Some(&e));
                }
            }
            ChangeKind::Signal(SIGNAL_CUSTOM) if event.source == custom_action => {
                let Ok(node) = ActionNode::ensure(&mgmt, CUSTOM_ACTION, CUSTOM_ACTION_LEAVES) else {
                    return;
                };
                let data = node.get("data");
                let action = CustomActionEvent {
                    bundle_id: node.text("bundleId").unwrap_or_default(),
                    action_id: node.text("actionId").unwrap_or_default(),
                    data: (!data.is_empty()).then(|| data.to_json()),
                    req_id: node.text("reqId").unwrap_or_default(),
                };
                let req_id = action.req_id.clone();
                let handle = self.dispatchers.lock().custom_action_handle();
                let submitted = match handle {
                    Some(handle) => handle.submit(action).map_err(|e| e.to_string()),
                    None => Err("custom actions not supported".to_string()),
                };
                if let Err(e) = submitted {
                    warn!("Rejecting custom action {}: {}", req_id, e);
                    self.respond(&req_id, ResponseCode::INTERNAL_ERROR, Some(&e));
                }
            }
            ChangeKind::Updated => {
                let (name, leaves) = if event.source == format!("{}.status", device_action) {
                    (DEVICE_ACTION, DEVICE_ACTION_LEAVES)
                } else if event.source == format!("{}.status", custom_action) {
                    (CUSTOM_ACTION, CUSTOM_ACTION_LEAVES)
                } else {
                    return;
                };
                let Ok(node) = ActionNode::ensure(&mgmt, name, leaves) else {
                    return;
                };
                let Some(req_id) = node.text("reqId") else {
                    warn!("{} status changed without a pending request", name);
                    return;
                };
                let rc = node
                    .text("status")
                    .as_deref()
                    .and_then(dm_protocol::ActionStatus::from_name)
                    .map(|status| status.response_code())
                    .unwrap_or(ResponseCode::INTERNAL_ERROR);
                let message = node.text("message");
                self.respond(&req_id, rc, message.as_deref());
            }
            _ => {}
        }
    }

    /// Queue a response to a server request
    pub(crate) fn respond(&self, req_id: &str, rc: ResponseCode, message: Option<&str>) {
        let mut response = Response::new(req_id, rc);
        if let Some(message) = message {
            response = response.with_message(message);
        }
        self.send_response(response);
    }

    pub(crate) fn send_response(&self, response: Response) {
        match serde_json::to_value(&response) {
            Ok(payload) => self
                .publisher
                .enqueue(DeviceTopic::Response.as_str(), &payload),
            Err(e) => warn!("Failed to encode response {}: {}", response.req_id, e),
        }
    }

    // ========================================================================
    // Device-initiated requests
    // ========================================================================

    /// Send a correlated request; requires a managed session
    pub(crate) fn request(&self, topic: DeviceTopic, payload: Value) -> Result<ResponseCode> {
        self.ensure_open()?;
        if !self.session_state().is_managed() {
            return Err(DmError::NotManaged);
        }
        let response =
            self.correlator
                .send_and_wait(topic.as_str(), payload, self.config.request_timeout)?;
        check(response)
    }
}

/// Map a non-success response to [`DmError::Rejected`]
fn check(response: Response) -> Result<ResponseCode> {
    if response.rc.is_success() {
        Ok(response.rc)
    } else {
        Err(DmError::Rejected {
            rc: response.rc,
            message: response.message,
        })
    }
}

fn is_cancelled(cancel: &Receiver<()>) -> bool {
    !matches!(
        cancel.try_recv(),
        Err(crossbeam::channel::TryRecvError::Empty)
    )
}

/// Lifetime left until `deadline`, in whole seconds rounded up
///
/// Clamped at zero once the deadline has passed.
pub(crate) fn remaining_lifetime(deadline: Instant, now: Instant) -> Duration {
    let remaining = deadline.saturating_duration_since(now);
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    Duration::from_secs(secs)
}

fn renewal_timer(inner: Weak<Inner>, cancel: Receiver<()>, delay: Duration) {
    match cancel.recv_timeout(delay) {
        Err(RecvTimeoutError::Timeout) => {}
        _ => return,
    }
    if let Some(inner) = inner.upgrade() {
        inner.renew(&cancel);
    }
}

/// Connection events from the transport
struct SessionListener {
    inner: Weak<Inner>,
}

impl ConnectionListener for SessionListener {
    fn connection_lost(&self, cause: &TransportError) {
        if let Some(inner) = self.inner.upgrade() {
            warn!("Connection lost: {}", cause);
            inner.start_reconnect();
        }
    }

    fn reconnected(&self) {
        let weak = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("dm-resume".to_string())
            .spawn(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.resume();
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn resume thread: {}", e);
        }
    }
}

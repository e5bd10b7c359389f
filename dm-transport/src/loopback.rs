//! In-memory broker for tests and simulation
//!
//! [`LoopbackTransport`] behaves like an at-least-once MQTT client connected
//! to a local broker:
//! - inbound messages are delivered on a dedicated delivery thread
//! - publishes are visible to the "server side" through a [`ServerEndpoint`]
//! - a dropped connection keeps QoS >= 1 publishes pending until collected
//!
//! The server side can inject messages, observe device publishes and install
//! a responder that answers publishes automatically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::message::{is_valid_filter, topic_matches, Message, QoS};
use crate::transport::{ConnectionListener, MessageHandler, Transport};

/// Answers a device publish with zero or more server messages
pub type Responder = Arc<dyn Fn(&Message) -> Vec<Message> + Send + Sync>;

enum Delivery {
    Inbound(Message),
    Stop,
}

struct Shared {
    connected: AtomicBool,
    /// Whether `connect` currently succeeds
    reachable: AtomicBool,
    /// Set once a connection was lost, until the next successful connect
    lost: AtomicBool,
    subscriptions: RwLock<Vec<(String, MessageHandler)>>,
    pending: Mutex<Vec<Message>>,
    listener: RwLock<Option<Arc<dyn ConnectionListener>>>,
    responder: RwLock<Option<Responder>>,
    delivery_tx: Sender<Delivery>,
    published_tx: Sender<Message>,
    published_rx: Receiver<Message>,
}

/// Device-side handle of the in-memory broker
#[derive(Clone)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
    delivery: Arc<Mutex<Option<JoinHandle<()>>>>,
    delivery_thread: Option<ThreadId>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (delivery_tx, delivery_rx) = unbounded();
        let (published_tx, published_rx) = unbounded();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            lost: AtomicBool::new(false),
            subscriptions: RwLock::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            listener: RwLock::new(None),
            responder: RwLock::new(None),
            delivery_tx,
            published_tx,
            published_rx,
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("dm-loopback-delivery".to_string())
            .spawn(move || delivery_loop(worker_shared, delivery_rx))
            .ok();
        if handle.is_none() {
            warn!("Failed to spawn loopback delivery thread");
        }

        let delivery_thread = handle.as_ref().map(|h| h.thread().id());
        Self {
            shared,
            delivery: Arc::new(Mutex::new(handle)),
            delivery_thread,
        }
    }

    /// Server-side view of this broker
    pub fn server(&self) -> ServerEndpoint {
        ServerEndpoint {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Simulate a network failure
    ///
    /// The connection drops, further connects fail until
    /// [`LoopbackTransport::restore_network`], and the listener is told the
    /// connection was lost.
    pub fn drop_connection(&self) {
        self.shared.reachable.store(false, Ordering::SeqCst);
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.lost.store(true, Ordering::SeqCst);
            debug!("Loopback connection dropped");
            let listener = self.shared.listener.read().clone();
            if let Some(listener) = listener {
                listener.connection_lost(&TransportError::ConnectionLost(
                    "network unreachable".to_string(),
                ));
            }
        }
    }

    /// Allow connects to succeed again
    pub fn restore_network(&self) {
        self.shared.reachable.store(true, Ordering::SeqCst);
    }

    /// Stop the delivery thread; the transport is unusable afterwards
    pub fn shutdown(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        let _ = self.shared.delivery_tx.send(Delivery::Stop);
        if let Some(handle) = self.delivery.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self) -> Result<()> {
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed("network unreachable".to_string()));
        }
        if self.shared.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Loopback connected");
        if self.shared.lost.swap(false, Ordering::SeqCst) {
            let listener = self.shared.listener.read().clone();
            if let Some(listener) = listener {
                listener.reconnected();
            }
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.lost.store(false, Ordering::SeqCst);
        debug!("Loopback disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<()> {
        let message = Message::new(topic, payload, qos);
        if !self.is_connected() {
            if qos == QoS::AtMostOnce {
                return Err(TransportError::NotConnected);
            }
            trace!("Queueing publish to '{}' while disconnected", topic);
            self.shared.pending.lock().push(message);
            return Ok(());
        }

        trace!("Publish '{}': {}", topic, message.payload_str());
        let responder = self.shared.responder.read().clone();
        let replies = responder.map(|r| r(&message)).unwrap_or_default();
        self.shared
            .published_tx
            .send(message)
            .map_err(|_| TransportError::Closed)?;
        for reply in replies {
            self.shared
                .delivery_tx
                .send(Delivery::Inbound(reply))
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }

    fn subscribe(&self, filter: &str, _qos: QoS, handler: MessageHandler) -> Result<()> {
        if !is_valid_filter(filter) {
            return Err(TransportError::InvalidFilter(filter.to_string()));
        }
        let mut subscriptions = self.shared.subscriptions.write();
        subscriptions.retain(|(f, _)| f != filter);
        subscriptions.push((filter.to_string(), handler));
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.shared.subscriptions.write().retain(|(f, _)| f != filter);
        Ok(())
    }

    fn take_pending(&self) -> Vec<Message> {
        std::mem::take(&mut *self.shared.pending.lock())
    }

    fn set_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        *self.shared.listener.write() = Some(listener);
    }

    fn delivery_thread(&self) -> Option<ThreadId> {
        self.delivery_thread
    }
}

fn delivery_loop(shared: Arc<Shared>, rx: Receiver<Delivery>) {
    while let Ok(delivery) = rx.recv() {
        let message = match delivery {
            Delivery::Inbound(message) => message,
            Delivery::Stop => break,
        };
        if !shared.connected.load(Ordering::SeqCst) {
            debug!("Dropping inbound '{}' while disconnected", message.topic);
            continue;
        }
        let handlers: Vec<MessageHandler> = shared
            .subscriptions
            .read()
            .iter()
            .filter(|(filter, _)| topic_matches(filter, &message.topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        if handlers.is_empty() {
            trace!("No subscriber for '{}'", message.topic);
        }
        for handler in handlers {
            handler(message.clone());
        }
    }
    debug!("Loopback delivery thread stopped");
}

// ============================================================================
// ServerEndpoint
// ============================================================================

/// Server side of the loopback broker
#[derive(Clone)]
pub struct ServerEndpoint {
    shared: Arc<Shared>,
}

impl ServerEndpoint {
    /// Send a message to the device; delivered on the delivery thread
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        let message = Message::new(topic, payload, QoS::AtLeastOnce);
        let _ = self.shared.delivery_tx.send(Delivery::Inbound(message));
    }

    /// Install a responder invoked for every device publish
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&Message) -> Vec<Message> + Send + Sync + 'static,
    {
        *self.shared.responder.write() = Some(Arc::new(responder));
    }

    pub fn clear_responder(&self) {
        *self.shared.responder.write() = None;
    }

    /// Next device publish, waiting up to `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        self.shared.published_rx.recv_timeout(timeout).ok()
    }

    /// Next device publish on `topic`, skipping others, waiting up to `timeout` per message
    pub fn recv_on(&self, topic: &str, timeout: Duration) -> Option<Message> {
        loop {
            let message = self.recv_timeout(timeout)?;
            if message.topic == topic {
                return Some(message);
            }
        }
    }

    /// All device publishes received so far, without waiting
    pub fn drain(&self) -> Vec<Message> {
        self.shared.published_rx.try_iter().collect()
    }
}

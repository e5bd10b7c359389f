//! Request/response correlation over an at-least-once transport
//!
//! Each outbound request gets a fresh id and a single-slot channel stored in
//! a concurrent id → slot map. The caller blocks on its slot; the delivery
//! thread only looks the id up, hands the response over and returns.
//!
//! The map entry is the sole owner of the slot's sender. It is removed when
//! the response is handed over, or by the caller's guard on timeout or
//! error, so a late or duplicate response finds nothing and is dropped.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dm_protocol::{with_req_id, Response};
use dm_transport::{QoS, Transport};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{DmError, Result};

/// Matches responses to the blocking callers that sent the requests
pub struct Correlator {
    transport: Arc<dyn Transport>,
    qos: QoS,
    pending: DashMap<String, Sender<Response>>,
    delivery_thread: RwLock<Option<ThreadId>>,
}

impl Correlator {
    pub fn new(transport: Arc<dyn Transport>, qos: QoS) -> Self {
        Self {
            transport,
            qos,
            pending: DashMap::new(),
            delivery_thread: RwLock::new(None),
        }
    }

    /// Publish `payload` on `topic` and block until its response or `timeout`
    ///
    /// A `reqId` is inserted into `payload` (which must be a JSON object or
    /// null). Must not be called on the transport's delivery thread.
    pub fn send_and_wait(&self, topic: &str, payload: Value, timeout: Duration) -> Result<Response> {
        if self.on_delivery_thread() {
            return Err(DmError::BlockingOnDeliveryThread);
        }

        let (tx, rx) = bounded(1);
        let req_id = self.register(tx);
        let _slot = SlotGuard {
            pending: &self.pending,
            req_id: &req_id,
        };

        let payload = with_req_id(payload, &req_id)?;
        let bytes = serde_json::to_vec(&payload).map_err(dm_protocol::ProtocolError::from)?;
        debug!("Sending request {} on '{}'", req_id, topic);
        self.transport.publish(topic, Bytes::from(bytes), self.qos)?;

        match rx.recv_timeout(timeout) {
            Ok(response) => {
                trace!("Request {} answered with rc {}", req_id, response.rc);
                Ok(response)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Request {} on '{}' timed out after {:?}", req_id, topic, timeout);
                Err(DmError::Timeout {
                    topic: topic.to_string(),
                    req_id: req_id.clone(),
                    timeout,
                })
            }
        }
    }

    /// Hand an inbound response to its waiting caller
    ///
    /// Runs on the delivery thread and never blocks. Malformed payloads and
    /// unknown ids are logged and dropped.
    pub fn deliver(&self, payload: &[u8]) {
        self.note_delivery_thread();
        let response = match Response::parse(payload) {
            Ok(response) => response,
            Err(e) => {
                warn!("Dropping malformed response: {}", e);
                return;
            }
        };

        match self.pending.remove(&response.req_id) {
            Some((req_id, slot)) => {
                if slot.try_send(response).is_err() {
                    debug!("Caller for {} already gone", req_id);
                }
            }
            None => {
                debug!("Dropping response for unknown request {}", response.req_id);
            }
        }
    }

    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Record the calling thread as the transport's delivery thread
    ///
    /// Only needed for transports that do not report it through
    /// [`Transport::delivery_thread`].
    pub fn note_delivery_thread(&self) {
        let current = thread::current().id();
        if *self.delivery_thread.read() != Some(current) {
            *self.delivery_thread.write() = Some(current);
        }
    }

    fn on_delivery_thread(&self) -> bool {
        let current = Some(thread::current().id());
        *self.delivery_thread.read() == current || self.transport.delivery_thread() == current
    }

    fn register(&self, tx: Sender<Response>) -> String {
        loop {
            let req_id = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = self.pending.entry(req_id.clone()) {
                slot.insert(tx);
                return req_id;
            }
        }
    }
}

/// Releases a request's slot when the caller stops waiting
struct SlotGuard<'a> {
    pending: &'a DashMap<String, Sender<Response>>,
    req_id: &'a str,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.req_id);
    }
}

//! Outbound publish queue
//!
//! Responses and notifications produced by observers and command handling
//! are queued here and published in order by a dedicated thread, so no
//! observer or delivery callback ever publishes inline.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use dm_transport::{QoS, Transport};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{DmError, Result};

enum Outbound {
    Publish { topic: String, payload: Bytes },
    Stop,
}

/// Ordered, non-blocking publisher backed by a worker thread
pub struct Publisher {
    tx: Sender<Outbound>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Publisher {
    pub fn start(transport: Arc<dyn Transport>, qos: QoS) -> Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("dm-publisher".to_string())
            .spawn(move || publish_loop(transport, qos, rx))
            .map_err(|_| DmError::Spawn("publisher"))?;
        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a JSON payload for publishing
    pub fn enqueue(&self, topic: &str, payload: &Value) {
        let payload = match serde_json::to_vec(payload) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::warn!("Failed to encode payload for '{}': {}", topic, e);
                return;
            }
        };
        let message = Outbound::Publish {
            topic: topic.to_string(),
            payload,
        };
        if self.tx.send(message).is_err() {
            tracing::debug!("Publisher stopped, dropping message for '{}'", topic);
        }
    }

    /// Publish everything already queued, then stop the worker
    pub fn stop(&self) {
        let _ = self.tx.send(Outbound::Stop);
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn publish_loop(transport: Arc<dyn Transport>, qos: QoS, rx: Receiver<Outbound>) {
    tracing::debug!("Publisher started");
    while let Ok(outbound) = rx.recv() {
        match outbound {
            Outbound::Publish { topic, payload } => {
                if let Err(e) = transport.publish(&topic, payload, qos) {
                    tracing::warn!("Failed to publish to '{}': {}", topic, e);
                }
            }
            Outbound::Stop => break,
        }
    }
    tracing::debug!("Publisher stopped");
}

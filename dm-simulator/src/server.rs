//! Scripted management server on the loopback broker
//!
//! Answers every device request with `rc` 200, issues commands with
//! sequential request ids and lets the workflow wait for the device's
//! responses and notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use dm_protocol::{DeviceTopic, Response, ServerTopic};
use dm_transport::{Message, QoS, ServerEndpoint};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info};

pub struct SimulatedServer {
    endpoint: ServerEndpoint,
    next_id: AtomicU64,
    buffered: Mutex<Vec<Message>>,
    show_raw: bool,
}

impl SimulatedServer {
    pub fn start(endpoint: ServerEndpoint, show_raw: bool) -> Self {
        endpoint.set_responder(accept_request);
        Self {
            endpoint,
            next_id: AtomicU64::new(1),
            buffered: Mutex::new(Vec::new()),
            show_raw,
        }
    }

    /// Issue a command, returning its request id
    pub fn command(&self, topic: ServerTopic, d: Option<Value>) -> String {
        let req_id = format!("sim-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut payload = json!({ "reqId": req_id });
        if let Some(d) = d {
            payload["d"] = d;
        }
        info!("Server -> {} ({})", topic.to_topic(), req_id);
        self.endpoint
            .inject(&topic.to_topic(), payload.to_string().into_bytes());
        req_id
    }

    /// Wait for the device's response to `req_id`
    pub fn await_response(&self, req_id: &str, timeout: Duration) -> Result<Response> {
        let message = self
            .await_message(timeout, |m| {
                m.topic == DeviceTopic::Response.as_str()
                    && Response::parse(&m.payload)
                        .map(|r| r.req_id == req_id)
                        .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("no response to {} within {:?}", req_id, timeout))?;
        Ok(Response::parse(&message.payload)?)
    }

    /// Wait for a notification reporting `field` whose value has `key` == `expected`
    pub fn await_notification(
        &self,
        field: &str,
        key: &str,
        expected: &str,
        timeout: Duration,
    ) -> Result<Value> {
        let message = self
            .await_message(timeout, |m| {
                notified_value(m, field)
                    .map(|value| value[key] == json!(expected))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                anyhow!("{} never reported {}={} within {:?}", field, key, expected, timeout)
            })?;
        notified_value(&message, field).ok_or_else(|| anyhow!("notification lost its field"))
    }

    fn await_message<P>(&self, timeout: Duration, predicate: P) -> Option<Message>
    where
        P: Fn(&Message) -> bool,
    {
        {
            let mut buffered = self.buffered.lock();
            if let Some(index) = buffered.iter().position(|m| predicate(m)) {
                return Some(buffered.remove(index));
            }
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = self.endpoint.recv_timeout(remaining)?;
            self.log(&message);
            if predicate(&message) {
                return Some(message);
            }
            self.buffered.lock().push(message);
        }
    }

    fn log(&self, message: &Message) {
        if message.topic == DeviceTopic::Notify.as_str() {
            info!("Device notified: {}", message.payload_str());
        } else if self.show_raw {
            info!("Device -> {}: {}", message.topic, message.payload_str());
        } else {
            debug!("Device -> {}", message.topic);
        }
    }
}

/// Accept every device-initiated request
fn accept_request(message: &Message) -> Vec<Message> {
    if message.topic == DeviceTopic::Response.as_str() || message.topic == DeviceTopic::Notify.as_str()
    {
        return Vec::new();
    }
    let Some(req_id) = serde_json::from_slice::<Value>(&message.payload)
        .ok()
        .and_then(|v| v.get("reqId").cloned())
    else {
        return Vec::new();
    };
    let response = json!({ "reqId": req_id, "rc": 200 });
    vec![Message::new(
        ServerTopic::Response.to_topic(),
        response.to_string().into_bytes(),
        QoS::AtLeastOnce,
    )]
}

fn notified_value(message: &Message, field: &str) -> Option<Value> {
    if message.topic != DeviceTopic::Notify.as_str() {
        return None;
    }
    let payload: Value = serde_json::from_slice(&message.payload).ok()?;
    payload["d"]["fields"]
        .as_array()?
        .iter()
        .find(|entry| entry["field"] == json!(field))
        .map(|entry| entry["value"].clone())
}

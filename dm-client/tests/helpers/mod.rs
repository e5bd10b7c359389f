//! Shared harness for dm-client integration tests
//!
//! Runs a [`ManagedClient`] against the in-memory loopback broker. A scripted
//! server answers every device request with `rc` 200 unless a topic has been
//! told otherwise, and every device publish is buffered so tests can wait for
//! one message without losing the others.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dm_client::{
    Clock, DeviceData, DeviceFirmware, DeviceInfo, ManagedClient, ManagedClientConfig, SystemClock,
};
use dm_protocol::{DeviceTopic, ServerTopic};
use dm_transport::{BackoffBand, LoopbackTransport, Message, QoS, ReconnectPolicy, ServerEndpoint};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Default wait for anything the device is expected to publish
pub const WAIT: Duration = Duration::from_secs(3);

/// How the scripted server answers a device request topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Rc(u16),
    /// Never answer, so the device's request times out
    Silent,
}

pub fn device() -> DeviceData {
    DeviceData::builder()
        .type_id("iotsample-gateway")
        .device_id("gw-01")
        .device_info(
            DeviceInfo::new()
                .with_serial_number("10087")
                .with_manufacturer("ACME")
                .with_fw_version("1.0.0"),
        )
        .metadata(json!({"customField": 1}))
        .firmware(DeviceFirmware::new().with_version("1.0.0"))
        .build()
        .unwrap()
}

pub fn device_without_firmware() -> DeviceData {
    DeviceData::builder()
        .type_id("iotsample-gateway")
        .device_id("gw-02")
        .build()
        .unwrap()
}

/// Fast timeouts and a reconnect loop that retries every 10ms
pub fn config() -> ManagedClientConfig {
    let band = |after_failures| BackoffBand {
        after_failures,
        delay: Duration::from_millis(10),
    };
    ManagedClientConfig::fast().with_reconnect(ReconnectPolicy::new([
        band(0),
        band(5),
        band(10),
        band(20),
    ]))
}

pub struct Harness {
    pub transport: LoopbackTransport,
    pub server: ServerEndpoint,
    pub client: ManagedClient,
    replies: Arc<Mutex<HashMap<String, Reply>>>,
    buffered: Mutex<Vec<Message>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(device(), config(), Arc::new(SystemClock))
    }

    pub fn with_config(config: ManagedClientConfig) -> Self {
        Self::with(device(), config, Arc::new(SystemClock))
    }

    pub fn with(data: DeviceData, config: ManagedClientConfig, clock: Arc<dyn Clock>) -> Self {
        init_tracing();
        let transport = LoopbackTransport::new();
        let server = transport.server();
        let replies: Arc<Mutex<HashMap<String, Reply>>> = Arc::new(Mutex::new(HashMap::new()));

        let script = Arc::clone(&replies);
        server.set_responder(move |message| scripted_reply(&script, message));

        let client =
            ManagedClient::with_clock(data, Arc::new(transport.clone()), config, clock).unwrap();

        Self {
            transport,
            server,
            client,
            replies,
            buffered: Mutex::new(Vec::new()),
        }
    }

    /// Override how requests on `topic` are answered
    pub fn reply(&self, topic: DeviceTopic, reply: Reply) {
        self.replies.lock().insert(topic.as_str().to_string(), reply);
    }

    /// Send a server request to the device
    pub fn send(&self, topic: ServerTopic, req_id: &str, d: Option<Value>) {
        let mut payload = json!({ "reqId": req_id });
        if let Some(d) = d {
            payload["d"] = d;
        }
        self.server
            .inject(&topic.to_topic(), serde_json::to_vec(&payload).unwrap());
    }

    /// Send a server request and wait for the device's response to it
    pub fn call(&self, topic: ServerTopic, req_id: &str, d: Option<Value>) -> Value {
        self.send(topic, req_id, d);
        self.response_for(req_id)
            .unwrap_or_else(|| panic!("no response to {}", req_id))
    }

    pub fn response_for(&self, req_id: &str) -> Option<Value> {
        self.wait_for(|m| {
            m.topic == DeviceTopic::Response.as_str() && json_of(m)["reqId"] == json!(req_id)
        })
        .map(|m| json_of(&m))
    }

    /// Next publish on `topic`
    pub fn next_on(&self, topic: DeviceTopic) -> Option<Value> {
        self.wait_for(|m| m.topic == topic.as_str())
            .map(|m| json_of(&m))
    }

    /// Next notification reporting `field`, as the reported value
    pub fn notified(&self, field: &str) -> Option<Value> {
        self.wait_for(|m| notified_value(m, field).is_some())
            .and_then(|m| notified_value(&m, field))
    }

    /// Wait for the first publish matching `predicate`
    ///
    /// Publishes that do not match stay buffered for later waits.
    pub fn wait_for<P>(&self, predicate: P) -> Option<Message>
    where
        P: Fn(&Message) -> bool,
    {
        {
            let mut buffered = self.buffered.lock();
            if let Some(index) = buffered.iter().position(|m| predicate(m)) {
                return Some(buffered.remove(index));
            }
        }
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let message = self.server.recv_timeout(remaining)?;
            if predicate(&message) {
                return Some(message);
            }
            self.buffered.lock().push(message);
        }
    }

    /// Every publish seen so far, in order, without waiting
    pub fn drain(&self) -> Vec<Message> {
        let mut all = std::mem::take(&mut *self.buffered.lock());
        all.extend(self.server.drain());
        all
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.client.close();
        self.transport.shutdown();
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Route client logs to the test output; `RUST_LOG=dm_client=debug` to see them
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn json_of(message: &Message) -> Value {
    serde_json::from_slice(&message.payload).unwrap_or(Value::Null)
}

/// Value reported for `field` if `message` is a notification carrying it
pub fn notified_value(message: &Message, field: &str) -> Option<Value> {
    if message.topic != DeviceTopic::Notify.as_str() {
        return None;
    }
    json_of(message)["d"]["fields"]
        .as_array()?
        .iter()
        .find(|entry| entry["field"] == json!(field))
        .map(|entry| entry["value"].clone())
}

fn scripted_reply(replies: &Mutex<HashMap<String, Reply>>, message: &Message) -> Vec<Message> {
    if message.topic == DeviceTopic::Response.as_str()
        || message.topic == DeviceTopic::Notify.as_str()
    {
        return Vec::new();
    }
    let reply = replies
        .lock()
        .get(&message.topic)
        .copied()
        .unwrap_or(Reply::Rc(200));
    let Reply::Rc(rc) = reply else {
        return Vec::new();
    };
    let Some(req_id) = json_of(message).get("reqId").cloned() else {
        return Vec::new();
    };
    let response = json!({ "reqId": req_id, "rc": rc });
    vec![Message::new(
        ServerTopic::Response.to_topic(),
        serde_json::to_vec(&response).unwrap(),
        QoS::AtLeastOnce,
    )]
}

//! Firmware download and update commands end to end

mod helpers;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use dm_client::{
    FirmwareCommand, FirmwareHandler, FirmwareResource, FirmwareState, FirmwareUpdateStatus,
    HandlerError,
};
use dm_protocol::{DeviceTopic, ServerTopic};
use helpers::{device, Harness};
use parking_lot::Mutex;
use serde_json::json;

const FIRMWARE: &str = "mgmt.firmware";

/// Records every call and the firmware state seen while it ran
struct Flasher {
    firmware: FirmwareResource,
    calls: Mutex<Vec<(String, Option<String>, FirmwareState)>>,
    updates: AtomicUsize,
    download_result: Mutex<Result<(), HandlerError>>,
    /// When set, each call waits for a message before returning
    gate: Option<Receiver<()>>,
    busy: AtomicBool,
    overlapped: AtomicBool,
}

impl Flasher {
    fn new(firmware: FirmwareResource) -> Self {
        Self {
            firmware,
            calls: Mutex::new(Vec::new()),
            updates: AtomicUsize::new(0),
            download_result: Mutex::new(Ok(())),
            gate: None,
            busy: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
        }
    }

    fn gated(firmware: FirmwareResource) -> (Self, Sender<()>) {
        let (tx, rx) = bounded(8);
        let mut flasher = Self::new(firmware);
        flasher.gate = Some(rx);
        (flasher, tx)
    }

    fn enter(&self, op: &str, command: &FirmwareCommand) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.calls
            .lock()
            .push((op.to_string(), command.url.clone(), self.firmware.state()));
        if let Some(gate) = &self.gate {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        }
    }

    fn leave(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    fn ops(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(op, _, _)| op.clone()).collect()
    }
}

impl FirmwareHandler for Flasher {
    fn download(&self, command: &mut FirmwareCommand) -> Result<(), HandlerError> {
        self.enter("download", command);
        let result = self.download_result.lock().clone();
        self.leave();
        result
    }

    fn update(&self, command: &mut FirmwareCommand) -> Result<(), HandlerError> {
        self.enter("update", command);
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.leave();
        Ok(())
    }
}

fn setup() -> (Harness, Arc<Flasher>) {
    let data = device();
    let firmware = data.firmware().unwrap().clone();
    let h = Harness::with(data, helpers::config(), Arc::new(dm_client::SystemClock));
    let flasher = Arc::new(Flasher::new(firmware));
    h.client.add_firmware_handler(flasher.clone()).unwrap();
    h.client.manage().unwrap();
    (h, flasher)
}

/// Firmware states reported in notifications, until `last` is seen
fn reported_states(h: &Harness, last: &str) -> Vec<String> {
    let mut states = Vec::new();
    while let Some(value) = h.notified(FIRMWARE) {
        if let Some(state) = value["state"].as_str() {
            states.push(state.to_string());
            if state == last {
                break;
            }
        }
    }
    states
}

#[test]
fn test_download_then_update() {
    let (h, flasher) = setup();
    let firmware = h.client.device_data().firmware().unwrap().clone();
    assert!(h.client.supports().firmware_actions);

    let response = h.call(
        ServerTopic::FirmwareDownload,
        "fw-1",
        Some(json!({"url": "http://x/fw.bin", "version": "2.0.0"})),
    );
    assert_eq!(response["rc"], json!(202));

    assert_eq!(reported_states(&h, "DOWNLOADED"), vec!["DOWNLOADING", "DOWNLOADED"]);
    assert_eq!(
        flasher.calls.lock().clone(),
        vec![(
            "download".to_string(),
            Some("http://x/fw.bin".to_string()),
            FirmwareState::Downloading
        )]
    );
    assert_eq!(firmware.state(), FirmwareState::Downloaded);
    assert_eq!(firmware.update_status(), Some(FirmwareUpdateStatus::Success));

    let response = h.call(ServerTopic::FirmwareUpdate, "fw-2", None);
    assert_eq!(response["rc"], json!(202));
    assert_eq!(reported_states(&h, "IDLE"), vec!["UPDATING", "IDLE"]);
    assert_eq!(h.notified("deviceInfo"), Some(json!({"fwVersion": "2.0.0"})));
    assert_eq!(flasher.updates.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.client
            .device_data()
            .resource("deviceInfo.fwVersion")
            .unwrap()
            .value()
            .as_str(),
        Some("2.0.0")
    );
}

#[test]
fn test_update_while_idle_fails_fast() {
    let (h, flasher) = setup();

    let response = h.call(
        ServerTopic::FirmwareUpdate,
        "fw-1",
        Some(json!({"url": "http://x/fw.bin"})),
    );
    assert_eq!(response["rc"], json!(202));

    let reported = h.notified(FIRMWARE).unwrap();
    assert_eq!(reported["updateStatus"], json!("UNSUPPORTED_IMAGE"));
    assert!(reported.get("state").is_none());
    assert_eq!(flasher.updates.load(Ordering::SeqCst), 0);
    assert!(flasher.calls.lock().is_empty());
}

#[test]
fn test_update_requires_url() {
    let (h, flasher) = setup();

    let response = h.call(ServerTopic::FirmwareUpdate, "fw-1", None);
    assert_eq!(response["rc"], json!(400));
    assert_eq!(response["message"], json!("firmware url is not set"));

    thread::sleep(Duration::from_millis(50));
    assert!(h
        .drain()
        .iter()
        .all(|m| m.topic != DeviceTopic::Notify.as_str()));
    assert_eq!(flasher.updates.load(Ordering::SeqCst), 0);
    assert!(flasher.calls.lock().is_empty());
}

#[test]
fn test_download_failure_returns_to_idle() {
    let (h, flasher) = setup();
    *flasher.download_result.lock() = Err(HandlerError::with_status(
        FirmwareUpdateStatus::VerificationFailed,
        "checksum mismatch",
    ));

    h.call(
        ServerTopic::FirmwareDownload,
        "fw-1",
        Some(json!({"url": "http://x/fw.bin"})),
    );
    assert_eq!(reported_states(&h, "IDLE"), vec!["DOWNLOADING", "IDLE"]);

    let firmware = h.client.device_data().firmware().unwrap();
    assert_eq!(firmware.state(), FirmwareState::Idle);
    assert_eq!(
        firmware.update_status(),
        Some(FirmwareUpdateStatus::VerificationFailed)
    );
}

#[test]
fn test_invalid_url_rejected_without_dispatch() {
    let (h, flasher) = setup();

    let response = h.call(
        ServerTopic::FirmwareDownload,
        "fw-1",
        Some(json!({"url": "not a url"})),
    );
    assert_eq!(response["rc"], json!(400));
    assert_eq!(
        h.notified(FIRMWARE),
        Some(json!({"updateStatus": "INVALID_URI"}))
    );
    assert!(flasher.calls.lock().is_empty());
}

#[test]
fn test_download_requires_url_and_idle_state() {
    let (h, _flasher) = setup();

    let response = h.call(ServerTopic::FirmwareDownload, "fw-1", None);
    assert_eq!(response["rc"], json!(400));

    h.call(
        ServerTopic::FirmwareDownload,
        "fw-2",
        Some(json!({"url": "http://x/fw.bin"})),
    );
    reported_states(&h, "DOWNLOADED");

    let response = h.call(ServerTopic::FirmwareDownload, "fw-3", None);
    assert_eq!(response["rc"], json!(400));
}

#[test]
fn test_firmware_without_handler_not_implemented() {
    let h = Harness::new();
    h.client.manage().unwrap();

    let response = h.call(
        ServerTopic::FirmwareDownload,
        "fw-1",
        Some(json!({"url": "http://x/fw.bin"})),
    );
    assert_eq!(response["rc"], json!(501));
    let response = h.call(ServerTopic::FirmwareUpdate, "fw-2", None);
    assert_eq!(response["rc"], json!(501));
}

#[test]
fn test_firmware_commands_are_serialized() {
    let data = device();
    let (flasher, gate) = Flasher::gated(data.firmware().unwrap().clone());
    let flasher = Arc::new(flasher);
    let h = Harness::with(data, helpers::config(), Arc::new(dm_client::SystemClock));
    h.client.add_firmware_handler(flasher.clone()).unwrap();
    h.client.manage().unwrap();

    h.call(
        ServerTopic::FirmwareDownload,
        "fw-1",
        Some(json!({"url": "http://x/fw.bin"})),
    );
    h.call(ServerTopic::FirmwareUpdate, "fw-2", None);

    // The update waits behind the blocked download
    thread::sleep(Duration::from_millis(100));
    assert_eq!(flasher.ops(), vec!["download"]);

    gate.send(()).unwrap();
    gate.send(()).unwrap();
    reported_states(&h, "IDLE");

    assert_eq!(flasher.ops(), vec!["download", "update"]);
    assert_eq!(flasher.calls.lock()[1].2, FirmwareState::Updating);
    assert!(!flasher.overlapped.load(Ordering::SeqCst));
}

#[test]
fn test_unmanage_stops_queued_firmware_work() {
    let data = device();
    let (flasher, gate) = Flasher::gated(data.firmware().unwrap().clone());
    let flasher = Arc::new(flasher);
    let h = Harness::with(data, helpers::config(), Arc::new(dm_client::SystemClock));
    h.client.add_firmware_handler(flasher.clone()).unwrap();
    h.client.manage().unwrap();

    h.call(
        ServerTopic::FirmwareDownload,
        "fw-1",
        Some(json!({"url": "http://x/fw.bin"})),
    );
    h.call(ServerTopic::FirmwareUpdate, "fw-2", None);
    thread::sleep(Duration::from_millis(50));

    let release = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        let _ = gate.send(());
        gate
    });
    h.client.unmanage().unwrap();
    assert_eq!(flasher.updates.load(Ordering::SeqCst), 0);

    let gate = release.join().unwrap();
    let _ = gate.send(());
    thread::sleep(Duration::from_millis(100));
    assert_eq!(flasher.ops(), vec!["download"]);
    assert_eq!(flasher.updates.load(Ordering::SeqCst), 0);
    assert!(h.next_on(DeviceTopic::Unmanage).is_some());
}

//! Session resume after the transport drops and reconnects

mod helpers;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dm_client::{Clock, DmError, ManualClock, SessionState};
use dm_protocol::DeviceTopic;
use dm_transport::Transport;
use helpers::{config, device, eventually, json_of, notified_value, Harness};
use serde_json::json;

#[test]
fn test_resume_manages_with_remaining_lifetime() {
    let clock = Arc::new(ManualClock::new());
    let h = Harness::with(device(), config(), clock.clone());
    h.client.manage().unwrap();
    assert_eq!(
        h.next_on(DeviceTopic::Manage).unwrap()["d"]["lifetime"],
        json!(3600)
    );

    clock.advance(Duration::from_secs(3570));
    h.transport.drop_connection();
    h.transport.restore_network();

    let resumed = h.next_on(DeviceTopic::Manage).unwrap();
    assert_eq!(resumed["d"]["lifetime"], json!(30));
    assert!(h.client.is_managed());

    let expected = clock.now() + Duration::from_secs(30);
    assert!(eventually(|| h.client.session_state().deadline() == Some(expected)));
}

#[test]
fn test_resume_after_deadline_clamps_lifetime_to_zero() {
    let clock = Arc::new(ManualClock::new());
    let h = Harness::with(device(), config(), clock.clone());
    h.client.manage().unwrap();
    let _ = h.drain();

    clock.advance(Duration::from_secs(4000));
    h.transport.drop_connection();
    h.transport.restore_network();

    let resumed = h.next_on(DeviceTopic::Manage).unwrap();
    assert!(resumed["d"].get("lifetime").is_none());
    assert!(h.client.is_managed());
    assert!(eventually(|| h.client.session_state().deadline().is_none()));
}

#[test]
fn test_messages_queued_while_disconnected_republished_in_order() {
    let h = Harness::new();
    h.client.manage().unwrap();
    let _ = h.drain();

    h.transport.drop_connection();
    let version = h
        .client
        .device_data()
        .resource("deviceInfo.fwVersion")
        .unwrap();
    version.update("1.0.1", true).unwrap();
    version.update("1.0.2", true).unwrap();

    // Let the publisher queue both notifications before the network returns
    thread::sleep(Duration::from_millis(200));
    h.transport.restore_network();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let next = h.wait_for(|m| {
            m.topic == DeviceTopic::Manage.as_str() || m.topic == DeviceTopic::Notify.as_str()
        });
        match next {
            Some(message) => seen.push(message),
            None => break,
        }
    }
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].topic, DeviceTopic::Manage.as_str());
    assert_eq!(
        notified_value(&seen[1], "deviceInfo"),
        Some(json!({"fwVersion": "1.0.1"}))
    );
    assert_eq!(
        notified_value(&seen[2], "deviceInfo"),
        Some(json!({"fwVersion": "1.0.2"}))
    );
    assert!(h.transport.is_connected());
}

#[test]
fn test_request_in_flight_at_disconnect_times_out() {
    let h = Harness::with_config(config().with_request_timeout(Duration::from_millis(300)));
    h.client.manage().unwrap();

    h.transport.drop_connection();
    assert!(matches!(
        h.client.add_error_code(42),
        Err(DmError::Timeout { .. })
    ));
    assert!(matches!(
        h.client.session_state(),
        SessionState::Managed { .. }
    ));

    // The queued request is still delivered once the network returns
    h.transport.restore_network();
    let message = h
        .wait_for(|m| m.topic == DeviceTopic::AddErrorCode.as_str())
        .unwrap();
    assert_eq!(json_of(&message)["d"], json!({"errorCode": 42}));
}

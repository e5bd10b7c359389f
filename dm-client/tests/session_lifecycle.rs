//! Manage / unmanage handshakes and device-initiated requests

mod helpers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dm_client::{
    ActionCommand, Capability, DeviceActionHandler, DeviceLocation, DmError, LogEntry,
    LogSeverity, ManagedClient, ResponseCode, SessionState, Supports,
};
use dm_protocol::DeviceTopic;
use dm_transport::{LoopbackTransport, Transport};
use helpers::{config, device_without_firmware, Harness, Reply};
use serde_json::json;

struct NoopActions;

impl DeviceActionHandler for NoopActions {
    fn reboot(&self, _action: &mut ActionCommand) {}

    fn factory_reset(&self, _action: &mut ActionCommand) {}
}

#[test]
fn test_manage_sets_deadline_from_lifetime() {
    let h = Harness::new();
    let before = Instant::now();
    h.client.manage().unwrap();
    let after = Instant::now();

    let deadline = match h.client.session_state() {
        SessionState::Managed { deadline } => deadline.unwrap(),
        other => panic!("expected managed, got {:?}", other),
    };
    assert!(deadline >= before + Duration::from_secs(3600));
    assert!(deadline <= after + Duration::from_secs(3600));

    let manage = h.next_on(DeviceTopic::Manage).unwrap();
    assert_eq!(manage["d"]["lifetime"], json!(3600));
    assert_eq!(
        manage["d"]["supports"],
        json!({"deviceActions": false, "firmwareActions": false})
    );
    assert_eq!(manage["d"]["deviceInfo"]["serialNumber"], json!("10087"));
    assert_eq!(manage["d"]["metadata"], json!({"customField": 1}));
    assert!(manage["reqId"].is_string());
}

#[test]
fn test_manage_without_expiry_omits_lifetime() {
    let h = Harness::new();
    h.client.manage_with_lifetime(Duration::ZERO).unwrap();
    assert_eq!(
        h.client.session_state(),
        SessionState::Managed { deadline: None }
    );
    let manage = h.next_on(DeviceTopic::Manage).unwrap();
    assert!(manage["d"].get("lifetime").is_none());
}

#[test]
fn test_manage_rejected_leaves_device_unmanaged() {
    let h = Harness::new();
    h.reply(DeviceTopic::Manage, Reply::Rc(403));

    let result = h.client.manage();
    assert!(matches!(
        result,
        Err(DmError::Rejected { rc: ResponseCode(403), .. })
    ));
    assert_eq!(h.client.session_state(), SessionState::Unmanaged);
    assert_eq!(h.client.supports(), Supports::default());
}

#[test]
fn test_manage_timeout_leaves_device_unmanaged() {
    let h = Harness::with_config(config().with_request_timeout(Duration::from_millis(200)));
    h.reply(DeviceTopic::Manage, Reply::Silent);

    assert!(matches!(h.client.manage(), Err(DmError::Timeout { .. })));
    assert_eq!(h.client.session_state(), SessionState::Unmanaged);
}

#[test]
fn test_invalid_lifetime_rejected_before_sending() {
    let h = Harness::new();
    assert!(matches!(
        h.client.manage_with_lifetime(Duration::from_secs(60)),
        Err(DmError::InvalidLifetime(60))
    ));
    assert!(h.drain().is_empty());
}

#[test]
fn test_unmanage_is_idempotent() {
    let h = Harness::new();
    h.client.unmanage().unwrap();

    h.client.manage().unwrap();
    h.client.unmanage().unwrap();
    assert_eq!(h.client.session_state(), SessionState::Unmanaged);
    h.client.unmanage().unwrap();

    let unmanages = h
        .drain()
        .into_iter()
        .filter(|m| m.topic == DeviceTopic::Unmanage.as_str())
        .count();
    assert_eq!(unmanages, 1);
}

#[test]
fn test_failed_unmanage_still_tears_down() {
    let h = Harness::with_config(config().with_request_timeout(Duration::from_millis(200)));
    h.client.add_device_action_handler(Arc::new(NoopActions)).unwrap();
    h.client.manage().unwrap();
    assert!(h.client.supports().device_actions);

    h.reply(DeviceTopic::Unmanage, Reply::Silent);
    assert!(matches!(h.client.unmanage(), Err(DmError::Timeout { .. })));
    assert_eq!(h.client.session_state(), SessionState::Unmanaged);
    assert_eq!(h.client.supports(), Supports::default());
}

#[test]
fn test_supports_follow_registered_handlers() {
    let h = Harness::new();
    h.client.add_device_action_handler(Arc::new(NoopActions)).unwrap();
    h.client.manage().unwrap();

    let manage = h.next_on(DeviceTopic::Manage).unwrap();
    assert_eq!(
        manage["d"]["supports"],
        json!({"deviceActions": true, "firmwareActions": false})
    );
    assert_eq!(
        h.client.supports(),
        Supports {
            device_actions: true,
            firmware_actions: false,
        }
    );
}

#[test]
fn test_second_handler_for_capability_rejected() {
    let h = Harness::new();
    h.client.add_device_action_handler(Arc::new(NoopActions)).unwrap();
    assert!(matches!(
        h.client.add_device_action_handler(Arc::new(NoopActions)),
        Err(DmError::HandlerAlreadyRegistered(Capability::DeviceAction))
    ));
}

#[test]
fn test_requests_before_manage_rejected() {
    let h = Harness::new();
    assert!(matches!(h.client.add_error_code(3), Err(DmError::NotManaged)));
    assert!(matches!(
        h.client.update_location(&DeviceLocation::new(30.28, -97.73)),
        Err(DmError::NotManaged)
    ));
    assert!(matches!(h.client.clear_logs(), Err(DmError::NotManaged)));
    assert!(h.drain().is_empty());
}

#[test]
fn test_diagnostic_requests() {
    let h = Harness::new();
    h.client.manage().unwrap();

    assert_eq!(h.client.add_error_code(12).unwrap(), ResponseCode::SUCCESS);
    let add = h.next_on(DeviceTopic::AddErrorCode).unwrap();
    assert_eq!(add["d"], json!({"errorCode": 12}));
    assert_eq!(h.client.device_data().diagnostic().error_codes(), vec![12]);

    h.client.clear_error_codes().unwrap();
    assert!(h.next_on(DeviceTopic::ClearErrorCodes).is_some());
    assert!(h.client.device_data().diagnostic().error_codes().is_empty());

    let entry = LogEntry::new("disk nearly full", LogSeverity::Warning).with_data(b"sda1".to_vec());
    h.client.add_log(&entry).unwrap();
    let log = h.next_on(DeviceTopic::AddLog).unwrap();
    assert_eq!(log["d"]["message"], json!("disk nearly full"));
    assert_eq!(log["d"]["severity"], json!(1));
    assert_eq!(log["d"]["data"], json!("c2RhMQ=="));
    assert_eq!(h.client.device_data().diagnostic().log_entries().len(), 1);

    h.client.clear_logs().unwrap();
    assert!(h.client.device_data().diagnostic().log_entries().is_empty());
}

#[test]
fn test_rejected_device_request_surfaces_rc() {
    let h = Harness::new();
    h.client.manage().unwrap();
    h.reply(DeviceTopic::AddErrorCode, Reply::Rc(400));
    assert!(matches!(
        h.client.add_error_code(7),
        Err(DmError::Rejected { rc: ResponseCode::BAD_REQUEST, .. })
    ));
}

#[test]
fn test_update_location_sends_new_position() {
    let h = Harness::new();
    h.client.manage().unwrap();

    let location = DeviceLocation::new(30.28, -97.73).with_elevation(149.0);
    assert_eq!(h.client.update_location(&location).unwrap(), ResponseCode::SUCCESS);

    let update = h.next_on(DeviceTopic::UpdateLocation).unwrap();
    assert_eq!(update["d"]["latitude"], json!(30.28));
    assert_eq!(update["d"]["longitude"], json!(-97.73));
    assert_eq!(update["d"]["elevation"], json!(149.0));
    assert!(update["d"]["measuredDateTime"].is_string());
}

#[test]
fn test_firmware_handler_requires_firmware_resource() {
    struct NoFlash;
    impl dm_client::FirmwareHandler for NoFlash {
        fn download(
            &self,
            _command: &mut dm_client::FirmwareCommand,
        ) -> Result<(), dm_client::HandlerError> {
            Ok(())
        }
        fn update(
            &self,
            _command: &mut dm_client::FirmwareCommand,
        ) -> Result<(), dm_client::HandlerError> {
            Ok(())
        }
    }

    let h = Harness::with(
        device_without_firmware(),
        config(),
        Arc::new(dm_client::SystemClock),
    );
    assert!(matches!(
        h.client.add_firmware_handler(Arc::new(NoFlash)),
        Err(DmError::MissingResource(_))
    ));
}

#[test]
fn test_disconnect_unmanages_first() {
    let h = Harness::new();
    h.client.manage().unwrap();
    h.client.disconnect().unwrap();

    assert!(h.next_on(DeviceTopic::Unmanage).is_some());
    assert_eq!(h.client.session_state(), SessionState::Unmanaged);
    assert!(!h.transport.is_connected());
}

#[test]
fn test_closed_client_rejects_calls() {
    let h = Harness::new();
    h.client.close();
    h.client.close();
    assert!(matches!(h.client.manage(), Err(DmError::Closed)));
    assert!(matches!(h.client.disconnect(), Err(DmError::Closed)));
}

#[test]
fn test_invalid_config_rejected() {
    let transport = LoopbackTransport::new();
    let result = ManagedClient::new(
        device_without_firmware(),
        Arc::new(transport.clone()),
        config().with_queue_capacity(0),
    );
    assert!(matches!(result, Err(DmError::Config(_))));
    transport.shutdown();
}

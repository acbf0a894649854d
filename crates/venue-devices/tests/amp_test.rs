//! Amplifier adapter tests.
//!
//! Runs the adapter through the Dispatcher against an in-process mock device.

mod common;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use common::MockAmplifier;
use venue_commands::{
    Command, CommandStatus, DeviceClass, Dispatcher, DispatcherConfig, ErrorKind, ProtocolRouter,
};
use venue_devices::amp::codec::{SUB_TYPE_MASTER, ZONE_MUTE_FLAG};
use venue_devices::amp::{AmpConfig, AmpExecutor, PROTOCOL};
use venue_devices::{ControllerRecord, InMemoryDirectory, ZoneRecord};

const CONTROLLER: &str = "amp-1";

/// Helper to wire a dispatcher to the mock amplifier.
fn create_test_dispatcher(mock: &MockAmplifier) -> (Dispatcher, Arc<AmpExecutor>) {
    let directory = InMemoryDirectory::new().with_controller(
        ControllerRecord::new(CONTROLLER, IpAddr::from([127, 0, 0, 1]))
            .with_port(mock.port())
            .with_zone_count(common::ZONE_COUNT as u16),
    );
    let config = AmpConfig::default()
        .with_local_port(0)
        .with_request_timeout_ms(300);
    create_dispatcher(directory, config)
}

fn create_dispatcher(
    directory: InMemoryDirectory,
    config: AmpConfig,
) -> (Dispatcher, Arc<AmpExecutor>) {
    let executor = Arc::new(AmpExecutor::new(Arc::new(directory), config));

    let router = Arc::new(ProtocolRouter::new());
    router.register(DeviceClass::AudioZone, Some(PROTOCOL), executor.clone());
    router.register(DeviceClass::AudioController, Some(PROTOCOL), executor.clone());

    (
        Dispatcher::new(router, DispatcherConfig::default()),
        executor,
    )
}

fn zone_command(action: &str, zone_number: u16) -> Command {
    Command::new(CONTROLLER, DeviceClass::AudioZone, action)
        .with_protocol(PROTOCOL)
        .with_parameter("zone_number", zone_number)
}

fn controller_command(action: &str) -> Command {
    Command::new(CONTROLLER, DeviceClass::AudioController, action).with_protocol(PROTOCOL)
}

#[tokio::test]
async fn test_set_volume_writes_expected_lut_index() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let command = dispatcher
        .submit_tracked(zone_command("set_volume", 1).with_parameter("volume", 75))
        .await;

    assert_eq!(command.status, CommandStatus::Completed);
    let result = command.result.unwrap();
    assert!(result.success, "{}", result.message);
    assert_eq!(result.data["lut_index"], 176);
    assert_eq!(result.data["db"], -12.5);
    assert_eq!(result.data["muted"], false);
    assert_eq!(mock.zone(0), (176, 0));
}

#[tokio::test]
async fn test_requests_use_master_header_and_nonzero_sequence() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, _) = create_test_dispatcher(&mock);

    for _ in 0..3 {
        let result = dispatcher.submit(controller_command("ping")).await;
        assert!(result.success);
    }

    let requests = mock.requests();
    let sequences: Vec<u16> = requests.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert!(requests.iter().all(|r| r.sub_type == SUB_TYPE_MASTER));
}

#[tokio::test]
async fn test_mute_then_unmute_preserves_lut_index() {
    let mock = MockAmplifier::start().await;
    mock.set_zone(1, 150, 0);
    let (dispatcher, executor) = create_test_dispatcher(&mock);

    let result = dispatcher.submit(zone_command("mute", 2)).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(mock.zone(1), (150, ZONE_MUTE_FLAG));

    let result = dispatcher.submit(zone_command("unmute", 2)).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(mock.zone(1), (150, 0));
    assert_eq!(executor.cached_lut_index(CONTROLLER, 1), Some(150));

    // The gain index was unknown only before the first mute.
    assert_eq!(mock.request_codes(), vec!["SYNC", "POBJ", "POBJ"]);
}

#[tokio::test]
async fn test_set_volume_preserves_mute_flags() {
    let mock = MockAmplifier::start().await;
    mock.set_zone(0, 141, ZONE_MUTE_FLAG);
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let result = dispatcher
        .submit(zone_command("set_volume", 1).with_parameter("volume", 75))
        .await;
    assert!(result.success);
    assert_eq!(result.data["muted"], true);
    assert_eq!(mock.zone(0), (176, ZONE_MUTE_FLAG));
}

#[tokio::test]
async fn test_toggle_mute_flips_device_state() {
    let mock = MockAmplifier::start().await;
    mock.set_zone(2, 120, ZONE_MUTE_FLAG);
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let result = dispatcher.submit(zone_command("toggle_mute", 3)).await;
    assert!(result.success);
    assert_eq!(result.data["muted"], false);
    assert_eq!(mock.zone(2), (120, 0));

    let result = dispatcher.submit(zone_command("toggle_mute", 3)).await;
    assert_eq!(result.data["muted"], true);
    assert_eq!(mock.zone(2), (120, ZONE_MUTE_FLAG));
}

#[tokio::test]
async fn test_nack_surfaces_cause() {
    let mock = MockAmplifier::start().await;
    mock.nack_object(52, 0x0003_0002);
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let command = dispatcher
        .submit_tracked(zone_command("set_volume", 2).with_parameter("volume", 40))
        .await;

    assert_eq!(command.status, CommandStatus::Failed);
    let result = command.result.unwrap();
    assert_eq!(result.error_kind, Some(ErrorKind::ProtocolNack));
    assert_eq!(result.data["nack_code"], 0x0003_0002);
    assert_eq!(result.data_str("nack_reason"), Some("bad global object id"));
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let mock = MockAmplifier::start().await;
    mock.set_silent(true);
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let command = dispatcher.submit_tracked(controller_command("ping")).await;
    assert_eq!(command.status, CommandStatus::Timeout);
    let result = command.result.unwrap();
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(result.data["timeout_ms"], 300);

    // The device answers again and the same connection recovers.
    mock.set_silent(false);
    let result = dispatcher.submit(controller_command("ping")).await;
    assert!(result.success, "{}", result.message);
}

#[tokio::test]
async fn test_invalid_parameters_send_nothing() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let result = dispatcher
        .submit(controller_command("recall_preset").with_parameter("preset_number", 9))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));

    let result = dispatcher
        .submit(zone_command("set_volume", 1).with_parameter("volume", 150))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));

    let result = dispatcher
        .submit(zone_command("set_volume", 7).with_parameter("volume", 10))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::DeviceNotFound));

    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_unsupported_action_names_executor() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let result = dispatcher.submit(zone_command("recall_preset", 1)).await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::UnsupportedAction));
    assert_eq!(result.data["action"], "recall_preset");
    assert!(result.message.contains(PROTOCOL));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_zone_index_outside_object_space_is_rejected() {
    let mock = MockAmplifier::start().await;
    let directory = InMemoryDirectory::new().with_controller(
        ControllerRecord::new(CONTROLLER, mock.ip())
            .with_port(mock.port())
            .with_zone(ZoneRecord::new(1).with_zone_index(3000)),
    );
    let config = AmpConfig::default()
        .with_local_port(0)
        .with_request_timeout_ms(300);
    let (dispatcher, _) = create_dispatcher(directory, config);

    let result = dispatcher
        .submit(zone_command("set_volume", 1).with_parameter("volume", 50))
        .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
    assert!(!mock.request_codes().iter().any(|code| code == "POBJ"));
}

#[tokio::test]
async fn test_unknown_controller_is_device_not_found() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let result = dispatcher
        .submit(
            Command::new("amp-9", DeviceClass::AudioController, "ping").with_protocol(PROTOCOL),
        )
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::DeviceNotFound));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_volume_up_clamps_at_100() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, executor) = create_test_dispatcher(&mock);

    dispatcher
        .submit(zone_command("set_volume", 1).with_parameter("volume", 98))
        .await;
    let result = dispatcher.submit(zone_command("volume_up", 1)).await;

    assert!(result.success);
    assert_eq!(result.data["volume"], 100);
    assert_eq!(result.data["previous_volume"], 98);
    assert_eq!(executor.cached_volume(CONTROLLER, 0), Some(100));
}

#[tokio::test]
async fn test_volume_down_defaults_to_50() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let result = dispatcher.submit(zone_command("volume_down", 4)).await;
    assert!(result.success);
    assert_eq!(result.data["volume"], 45);
}

#[tokio::test]
async fn test_master_volume_reports_partial_failure() {
    let mock = MockAmplifier::start().await;
    mock.nack_object(52, 0x0003_0004);
    let (dispatcher, executor) = create_test_dispatcher(&mock);

    let result = dispatcher
        .submit(controller_command("set_master_volume").with_parameter("volume", 60))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ProtocolNack));
    assert_eq!(result.data["partial"], true);
    assert_eq!(result.data["succeeded_zones"], serde_json::json!([1, 3, 4]));
    let failed = result.data["failed_zones"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["zone_number"], 2);
    assert_eq!(failed[0]["error_kind"], "PROTOCOL_NACK");

    assert_eq!(executor.cached_master_volume(CONTROLLER), Some(60));
    assert_eq!(mock.zone(0).0, mock.zone(3).0);
}

#[tokio::test]
async fn test_slow_master_volume_returns_partial_result_in_time() {
    let mock = MockAmplifier::start().await;
    mock.set_zone_count(8);
    mock.set_reply_delay(Duration::from_millis(150));
    let directory = InMemoryDirectory::new().with_controller(
        ControllerRecord::new(CONTROLLER, mock.ip())
            .with_port(mock.port())
            .with_zone_count(8),
    );
    let config = AmpConfig::default()
        .with_local_port(0)
        .with_request_timeout_ms(400);
    let (dispatcher, _) = create_dispatcher(directory, config);

    let command = dispatcher
        .submit_tracked(controller_command("set_master_volume").with_parameter("volume", 40))
        .await;
    assert_eq!(command.status, CommandStatus::Timeout);

    // The executor's own result, not the dispatcher's deadline failure.
    let result = command.result.unwrap();
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(result.data["partial"], true);
    let succeeded = result.data["succeeded_zones"].as_array().unwrap();
    let failed = result.data["failed_zones"].as_array().unwrap();
    assert!(!succeeded.is_empty());
    assert!(!failed.is_empty());
    assert_eq!(succeeded.len() + failed.len(), 8);
    assert!(failed.iter().all(|zone| zone["error_kind"] == "TIMEOUT"));
    assert_eq!(failed.last().unwrap()["zone_number"], 8);

    let writes = mock
        .request_codes()
        .into_iter()
        .filter(|code| code == "POBJ")
        .count();
    assert_eq!(writes, succeeded.len());
}

#[tokio::test]
async fn test_controllers_sharing_reply_port_stay_independent() {
    let amp_a = MockAmplifier::start_on(IpAddr::from([127, 0, 0, 1])).await;
    let amp_b = MockAmplifier::start_on(IpAddr::from([127, 0, 0, 2])).await;
    let local_port = std::net::UdpSocket::bind("0.0.0.0:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let directory = InMemoryDirectory::new()
        .with_controller(ControllerRecord::new("amp-a", amp_a.ip()).with_port(amp_a.port()))
        .with_controller(ControllerRecord::new("amp-b", amp_b.ip()).with_port(amp_b.port()));
    let config = AmpConfig::default()
        .with_local_port(local_port)
        .with_request_timeout_ms(300);
    let (dispatcher, _) = create_dispatcher(directory, config);

    for (step, controller) in ["amp-a", "amp-b", "amp-a", "amp-b", "amp-a"]
        .into_iter()
        .enumerate()
    {
        let result = dispatcher
            .submit(
                Command::new(controller, DeviceClass::AudioController, "ping")
                    .with_protocol(PROTOCOL),
            )
            .await;
        assert!(
            result.success,
            "step {} {}: {}",
            step, controller, result.message
        );
    }

    assert_eq!(amp_a.request_codes().len(), 3);
    assert_eq!(amp_b.request_codes().len(), 2);
}

#[tokio::test]
async fn test_master_volume_up_fans_out() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let result = dispatcher.submit(controller_command("master_volume_up")).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.data["volume"], 55);
    assert_eq!(result.data["succeeded_zones"], serde_json::json!([1, 2, 3, 4]));

    let writes = mock
        .request_codes()
        .into_iter()
        .filter(|code| code == "POBJ")
        .count();
    assert_eq!(writes, common::ZONE_COUNT);
}

#[tokio::test]
async fn test_recall_preset_invalidates_cache() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, executor) = create_test_dispatcher(&mock);

    dispatcher
        .submit(zone_command("set_volume", 1).with_parameter("volume", 75))
        .await;
    assert_eq!(executor.cached_lut_index(CONTROLLER, 0), Some(176));

    let result = dispatcher
        .submit(controller_command("recall_preset").with_parameter("preset_number", 3))
        .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(mock.recalled_preset(), Some(2));
    assert_eq!(executor.cached_lut_index(CONTROLLER, 0), None);

    // Muting now reads the preset's gain back before writing.
    dispatcher.submit(zone_command("mute", 1)).await;
    assert_eq!(mock.zone(0), (100, ZONE_MUTE_FLAG));
}

#[tokio::test]
async fn test_read_zones_and_presets() {
    let mock = MockAmplifier::start().await;
    mock.set_zone(0, 176, 0);
    mock.set_zone(3, 41, ZONE_MUTE_FLAG);
    let (dispatcher, executor) = create_test_dispatcher(&mock);

    let result = dispatcher.submit(controller_command("read_zones")).await;
    assert!(result.success, "{}", result.message);
    let zones = result.data["zones"].as_array().unwrap();
    assert_eq!(zones.len(), 4);
    assert_eq!(zones[0]["lut_index"], 176);
    assert_eq!(zones[0]["db"], -12.5);
    assert_eq!(zones[0]["volume"], 75);
    assert_eq!(zones[3]["volume"], 0);
    assert_eq!(zones[3]["muted"], true);
    assert_eq!(executor.cached_volume(CONTROLLER, 0), Some(75));

    let result = dispatcher.submit(controller_command("read_presets")).await;
    assert!(result.success);
    let presets = result.data["presets"].as_array().unwrap();
    assert_eq!(presets.len(), 2);
    assert_eq!(presets[0]["name"], "Dinner");
    assert_eq!(presets[0]["valid"], true);
    assert_eq!(presets[1]["valid"], false);
}

#[tokio::test]
async fn test_identify_reports_identity() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, _) = create_test_dispatcher(&mock);

    let result = dispatcher.submit(controller_command("identify")).await;
    assert!(result.success);
    assert_eq!(result.data_str("identity"), Some("AMP-8150"));
    assert_eq!(
        result.data_str("identity_hex"),
        Some(hex::encode(b"AMP-8150\0\0").as_str())
    );
}

#[tokio::test]
async fn test_concurrent_commands_to_one_controller() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, _) = create_test_dispatcher(&mock);
    let dispatcher = Arc::new(dispatcher);

    let mut handles = Vec::new();
    for zone_number in 1..=4u16 {
        let dispatcher = dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher
                .submit(
                    zone_command("set_volume", zone_number)
                        .with_parameter("volume", 25 * zone_number),
                )
                .await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.success, "{}", result.message);
    }

    assert_eq!(mock.zone(3).0, 221);
    let mut sequences: Vec<u16> = mock.requests().iter().map(|r| r.sequence).collect();
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), mock.requests().len());
}

#[tokio::test]
async fn test_cleanup_closes_connections() {
    let mock = MockAmplifier::start().await;
    let (dispatcher, executor) = create_test_dispatcher(&mock);

    dispatcher.submit(controller_command("ping")).await;
    assert_eq!(executor.connections().len(), 1);

    dispatcher.shutdown().await;
    assert!(executor.connections().is_empty());
}

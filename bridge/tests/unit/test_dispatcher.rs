//! Command dispatcher tests

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use jlr2mqtt::bridge::{CommandDispatcher, Followup, StatusPoller};

use crate::common::{context, count_errors, quiet_options, sample_status, MockApi, MockPublisher};

fn dispatcher(
    api: Arc<MockApi>,
    publisher: Arc<MockPublisher>,
    pin: Option<&str>,
) -> CommandDispatcher {
    let ctx = context(api, publisher, quiet_options(), pin);
    CommandDispatcher::new(Arc::new(StatusPoller::new(ctx)), None)
}

#[tokio::test]
async fn test_unknown_command_has_no_side_effects() {
    let (errors, _guard) = count_errors();
    let api = Arc::new(MockApi::default());
    let publisher = Arc::new(MockPublisher::default());
    let dispatcher = dispatcher(api.clone(), publisher.clone(), Some("1234"));

    let followup = dispatcher
        .handle(br#"{"command":"self_destruct","kwargs":{"pin":"0000"}}"#)
        .await;

    assert_eq!(followup, Followup::None);
    assert!(api.invocations().is_empty());
    assert_eq!(api.status_calls(), 0);
    assert_eq!(errors.count(), 1);
    assert!(publisher.payload("jlr2mqtt/system/send_command_response").is_none());
}

#[tokio::test]
async fn test_malformed_payload_logs_one_error() {
    let (errors, _guard) = count_errors();
    let api = Arc::new(MockApi::default());
    let publisher = Arc::new(MockPublisher::default());
    let dispatcher = dispatcher(api.clone(), publisher.clone(), None);

    assert_eq!(dispatcher.handle(b"lock the car").await, Followup::None);
    assert_eq!(dispatcher.handle(br#"{"kwargs":{}}"#).await, Followup::None);

    assert!(api.invocations().is_empty());
    assert_eq!(errors.count(), 2);

    // The rejection is visible to MQTT consumers too
    assert_eq!(publisher.count("jlr2mqtt/system/send_command_response"), 2);
    let response = publisher
        .payload("jlr2mqtt/system/send_command_response")
        .unwrap();
    let response: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert!(response["error"].is_string());
    assert!(publisher.payload("jlr2mqtt/system/send_command_response_ts").is_some());
    assert!(publisher.payload("jlr2mqtt/system/send_command_service_id").is_none());
}

#[tokio::test]
async fn test_configured_pin_merged_when_omitted() {
    let api = Arc::new(MockApi::default());
    let dispatcher = dispatcher(api.clone(), Arc::new(MockPublisher::default()), Some("1234"));

    dispatcher
        .handle(br#"{"command":"remote_engine_start","kwargs":{"target_value":42}}"#)
        .await;

    let invocations = api.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].0, "remote_engine_start");
    assert_eq!(
        serde_json::Value::Object(invocations[0].1.clone()),
        json!({"pin": "1234", "target_value": 42})
    );
}

#[tokio::test]
async fn test_supplied_pin_is_kept() {
    let api = Arc::new(MockApi::default());
    let dispatcher = dispatcher(api.clone(), Arc::new(MockPublisher::default()), Some("1234"));

    dispatcher
        .handle(br#"{"command":"lock","kwargs":{"pin":"9876"}}"#)
        .await;

    assert_eq!(
        serde_json::Value::Object(api.invocations()[0].1.clone()),
        json!({"pin": "9876"})
    );
}

#[tokio::test]
async fn test_pin_not_added_to_operations_without_one() {
    let api = Arc::new(MockApi::default());
    let dispatcher = dispatcher(api.clone(), Arc::new(MockPublisher::default()), Some("1234"));

    dispatcher.handle(br#"{"command":"honk_blink"}"#).await;

    assert!(api.invocations()[0].1.is_empty());
}

#[tokio::test]
async fn test_get_status_polls_without_merging() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let publisher = Arc::new(MockPublisher::default());
    let dispatcher = dispatcher(api.clone(), publisher.clone(), Some("1234"));

    let followup = dispatcher.handle(br#"{"command":"get_status"}"#).await;

    assert_eq!(followup, Followup::None);
    assert_eq!(api.status_calls(), 1);
    assert!(api.invocations().is_empty());
    assert_eq!(
        publisher.payload("jlr2mqtt/ev/ev_state_of_charge").as_deref(),
        Some("80")
    );
}

#[tokio::test]
async fn test_get_status_with_key_refreshes_one_value() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let publisher = Arc::new(MockPublisher::default());
    let dispatcher = dispatcher(api.clone(), publisher.clone(), None);

    dispatcher
        .handle(br#"{"command":"get_status","key":"DOOR_IS_ALL_DOORS_LOCKED"}"#)
        .await;

    assert_eq!(api.status_calls(), 0);
    assert_eq!(
        api.status_value_calls.lock().unwrap().as_slice(),
        ["DOOR_IS_ALL_DOORS_LOCKED".to_string()]
    );
    assert_eq!(
        publisher.payload("jlr2mqtt/door/door_is_all_doors_locked").as_deref(),
        Some("true")
    );
}

#[tokio::test]
async fn test_remote_error_is_reported_not_raised() {
    let (errors, _guard) = count_errors();
    let api = Arc::new(MockApi {
        fail_invoke: true,
        ..Default::default()
    });
    let publisher = Arc::new(MockPublisher::default());
    let dispatcher = dispatcher(api.clone(), publisher.clone(), Some("1234"));

    let followup = dispatcher.handle(br#"{"command":"unlock"}"#).await;
    assert_eq!(followup, Followup::None);
    assert_eq!(errors.count(), 1);

    let response = publisher
        .payload("jlr2mqtt/system/send_command_response")
        .unwrap();
    let response: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert!(response["error"].as_str().unwrap().contains("vehicle unreachable"));

    // The dispatcher keeps serving commands afterwards
    dispatcher.handle(br#"{"command":"honk_blink"}"#).await;
    assert_eq!(api.invocations().len(), 2);
}

#[tokio::test]
async fn test_service_success_schedules_refresh() {
    let api = Arc::new(MockApi::default());
    *api.invoke_response.lock().unwrap() = json!({"customerServiceId": "abc-123", "status": "Started"});
    let publisher = Arc::new(MockPublisher::default());
    let dispatcher = dispatcher(api.clone(), publisher.clone(), Some("1234"));

    let followup = dispatcher.handle(br#"{"command":"lock"}"#).await;

    assert_eq!(followup, Followup::RefreshAfter(Duration::from_secs(60)));
    assert_eq!(
        publisher.payload("jlr2mqtt/system/send_command_service_id").as_deref(),
        Some("abc-123")
    );
    assert!(publisher.payload("jlr2mqtt/system/send_command_response_ts").is_some());
    assert!(publisher.payload("jlr2mqtt/system/send_command_ts").is_some());
    assert_eq!(dispatcher.last_service_id().await.as_deref(), Some("abc-123"));
}

#[tokio::test]
async fn test_query_does_not_schedule_refresh() {
    let api = Arc::new(MockApi::default());
    let dispatcher = dispatcher(api.clone(), Arc::new(MockPublisher::default()), None);

    let followup = dispatcher
        .handle(br#"{"command":"get_trips","kwargs":{"count":5}}"#)
        .await;

    assert_eq!(followup, Followup::None);
    assert_eq!(api.invocations()[0].0, "get_trips");
}

#[tokio::test]
async fn test_refresh_last_command_status_uses_service_id() {
    let api = Arc::new(MockApi::default());
    *api.invoke_response.lock().unwrap() = json!({"customerServiceId": "svc-42"});
    let dispatcher = dispatcher(api.clone(), Arc::new(MockPublisher::default()), Some("1234"));

    dispatcher.handle(br#"{"command":"refresh_last_command_status"}"#).await;
    assert!(api.invocations().is_empty());

    dispatcher.handle(br#"{"command":"lock"}"#).await;
    dispatcher.handle(br#"{"command":"refresh_last_command_status"}"#).await;

    let invocations = api.invocations();
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[1].0, "get_service_status");
    assert_eq!(
        serde_json::Value::Object(invocations[1].1.clone()),
        json!({"service_id": "svc-42"})
    );
}

#[tokio::test]
async fn test_legacy_arg_binds_to_single_parameter() {
    let api = Arc::new(MockApi::default());
    let dispatcher = dispatcher(api.clone(), Arc::new(MockPublisher::default()), Some("1234"));

    dispatcher.handle(br#"{"command":"set_max_soc","arg":80}"#).await;
    dispatcher.handle(br#"{"command":"add_departure_timer","arg":1}"#).await;

    let invocations = api.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(
        serde_json::Value::Object(invocations[0].1.clone()),
        json!({"max_charge_level": 80})
    );
}

#[tokio::test]
async fn test_set_log_level_without_handle() {
    let (errors, _guard) = count_errors();
    let api = Arc::new(MockApi::default());
    let dispatcher = dispatcher(api.clone(), Arc::new(MockPublisher::default()), None);

    dispatcher
        .handle(br#"{"command":"set_log_level","level":"debug"}"#)
        .await;
    assert_eq!(errors.count(), 0);

    dispatcher
        .handle(br#"{"command":"set_log_level","level":"chatty"}"#)
        .await;
    assert_eq!(errors.count(), 1);
    assert!(api.invocations().is_empty());
}

#[tokio::test]
async fn test_service_id_cleared_when_response_has_none() {
    let api = Arc::new(MockApi::default());
    *api.invoke_response.lock().unwrap() = json!({"customerServiceId": "old-1"});
    let publisher = Arc::new(MockPublisher::default());
    let dispatcher = dispatcher(api.clone(), publisher.clone(), Some("1234"));

    dispatcher.handle(br#"{"command":"lock"}"#).await;
    assert_eq!(dispatcher.last_service_id().await.as_deref(), Some("old-1"));

    *api.invoke_response.lock().unwrap() = json!({"status": "ok"});
    dispatcher.handle(br#"{"command":"honk_blink"}"#).await;

    assert_eq!(
        publisher.payload("jlr2mqtt/system/send_command_service_id").as_deref(),
        Some("")
    );
    assert_eq!(dispatcher.last_service_id().await, None);

    // Nothing stale left to query
    dispatcher.handle(br#"{"command":"refresh_last_command_status"}"#).await;
    assert_eq!(api.invocations().len(), 2);
}

//! Status poller tests

use std::sync::Arc;

use serde_json::json;

use jlr2mqtt::bridge::StatusPoller;
use jlr2mqtt::models::status::{Alert, Position, StatusValue};
use jlr2mqtt::storage::settings::{MiscSettings, SensorList};

use crate::common::{context, count_errors, quiet_options, sample_status, MockApi, MockPublisher};

const EV_TOPIC: &str = "jlr2mqtt/ev/ev_state_of_charge";
const DOOR_TOPIC: &str = "jlr2mqtt/door/door_is_all_doors_locked";

/// Messages on status item topics (everything outside the bookkeeping namespaces)
fn item_messages(publisher: &MockPublisher) -> Vec<(String, String)> {
    publisher
        .messages()
        .into_iter()
        .filter(|m| {
            !m.topic.starts_with("jlr2mqtt/system/")
                && !m.topic.starts_with("jlr2mqtt/departure_timers")
        })
        .map(|m| (m.topic, m.payload))
        .collect()
}

#[tokio::test]
async fn test_poll_publishes_every_item_with_empty_allow_list() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let publisher = Arc::new(MockPublisher::default());
    let poller = StatusPoller::new(context(api, publisher.clone(), quiet_options(), None));

    poller.poll().await;

    let mut items = item_messages(&publisher);
    items.sort();
    assert_eq!(
        items,
        vec![
            (DOOR_TOPIC.to_string(), "true".to_string()),
            (EV_TOPIC.to_string(), "80".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_poll_publishes_allow_list_intersection() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let publisher = Arc::new(MockPublisher::default());
    let options = MiscSettings {
        discovery_sensors_list: SensorList::parse("EV_STATE_OF_CHARGE, tyre_pressure_front_left"),
        ..quiet_options()
    };
    let poller = StatusPoller::new(context(api, publisher.clone(), options, None));

    poller.poll().await;

    assert_eq!(
        item_messages(&publisher),
        vec![(EV_TOPIC.to_string(), "80".to_string())]
    );
}

#[tokio::test]
async fn test_publish_failure_does_not_stop_other_items() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let publisher = Arc::new(MockPublisher::failing(&[DOOR_TOPIC]));
    let poller = StatusPoller::new(context(api, publisher.clone(), quiet_options(), None));

    let report = poller.poll().await;

    assert_eq!(publisher.payload(EV_TOPIC).as_deref(), Some("80"));
    assert!(publisher.payload("jlr2mqtt/system/last_update_ts").is_some());
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_status_failure_still_completes_cycle() {
    let (errors, _guard) = count_errors();
    let api = MockApi {
        fail_status: true,
        ..Default::default()
    };
    let publisher = Arc::new(MockPublisher::default());
    let poller = StatusPoller::new(context(Arc::new(api), publisher.clone(), quiet_options(), None));

    let report = poller.poll().await;

    assert!(item_messages(&publisher).is_empty());
    assert_eq!(publisher.payload("jlr2mqtt/departure_timers").as_deref(), Some("[]"));
    assert!(publisher.payload("jlr2mqtt/system/last_update_ts").is_some());
    assert_eq!(report.failed, 1);
    assert_eq!(errors.count(), 1);
}

#[tokio::test]
async fn test_item_retain_follows_configuration() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let publisher = Arc::new(MockPublisher::default());
    let poller = StatusPoller::new(context(api, publisher.clone(), quiet_options(), None));

    poller.poll().await;

    let messages = publisher.messages();
    let ev = messages.iter().find(|m| m.topic == EV_TOPIC).unwrap();
    assert!(!ev.retain);
    let last_update = messages
        .iter()
        .find(|m| m.topic == "jlr2mqtt/system/last_update_ts")
        .unwrap();
    assert!(last_update.retain);
}

#[tokio::test]
async fn test_alert_properties_published() {
    let api = MockApi::with_status(json!({}));
    api.status.lock().unwrap().alerts = vec![Alert {
        key: "TYRE_PRESSURE_LOW".to_string(),
        properties: [
            ("active".to_string(), StatusValue::Bool(true)),
            (
                "lastUpdatedTime".to_string(),
                StatusValue::Text("2024-03-01T10:00:00+0000".to_string()),
            ),
        ]
        .into_iter()
        .collect(),
    }];
    let publisher = Arc::new(MockPublisher::default());
    let poller = StatusPoller::new(context(Arc::new(api), publisher.clone(), quiet_options(), None));

    poller.poll().await;

    assert_eq!(
        publisher
            .payload("jlr2mqtt/alerts/tyre/tyre_pressure_low/active")
            .as_deref(),
        Some("true")
    );
    assert_eq!(
        publisher
            .payload("jlr2mqtt/alerts/tyre/tyre_pressure_low/lastUpdatedTime")
            .as_deref(),
        Some("2024-03-01T10:00:00+0000")
    );
}

#[tokio::test]
async fn test_position_and_address_published_retained() {
    let api = MockApi::with_status(json!({}));
    *api.position.lock().unwrap() = Position::from_response(&json!({
        "position": {"latitude": 51.5, "longitude": -1.25, "speed": 0, "heading": 90}
    }));
    *api.address.lock().unwrap() = json!({
        "formattedAddress": "1 High Street, Oxford",
        "city": "Oxford",
        "postalCode": "OX1 1AA"
    })
    .as_object()
    .unwrap()
    .clone();
    let publisher = Arc::new(MockPublisher::default());
    let options = MiscSettings {
        reverse_geocode: true,
        ..Default::default()
    };
    let poller = StatusPoller::new(context(Arc::new(api), publisher.clone(), options, None));

    poller.poll().await;

    assert_eq!(publisher.payload("jlr2mqtt/position/latitude").as_deref(), Some("51.5"));
    assert_eq!(publisher.payload("jlr2mqtt/position/latlong").as_deref(), Some("51.5, -1.25"));
    assert_eq!(
        publisher.payload("jlr2mqtt/position/formatted_address").as_deref(),
        Some("1 High Street, Oxford")
    );
    assert_eq!(
        publisher.payload("jlr2mqtt/position/address/city").as_deref(),
        Some("Oxford")
    );
    assert_eq!(
        publisher
            .payload("jlr2mqtt/position/address/formattedAddress")
            .as_deref(),
        Some("1 High Street, Oxford")
    );
    assert!(publisher
        .with_prefix("jlr2mqtt/position/")
        .iter()
        .all(|m| m.retain));
}

#[tokio::test]
async fn test_departure_timers_cleared_then_published() {
    let api = MockApi::with_status(json!({}));
    let timer = json!({
        "departureTime": {"hour": 7, "minute": 30},
        "timerIndex": 3,
        "timerTarget": {"singleDay": {"day": 4, "month": 3, "year": 2024}}
    });
    *api.timers.lock().unwrap() = vec![timer.clone()];
    let publisher = Arc::new(MockPublisher::default());
    let poller = StatusPoller::new(context(Arc::new(api), publisher.clone(), quiet_options(), None));

    poller.poll().await;

    let timers = publisher.with_prefix("jlr2mqtt/departure_timers/");
    assert_eq!(timers.len(), 11);
    assert!(timers[..10].iter().all(|m| m.payload.is_empty()));
    assert_eq!(timers[10].topic, "jlr2mqtt/departure_timers/3");
    assert_eq!(timers[10].payload, timer.to_string());
    assert_eq!(publisher.count("jlr2mqtt/departure_timers"), 0);
}

#[tokio::test]
async fn test_refresh_key_publishes_single_value() {
    let api = Arc::new(MockApi::with_status(sample_status()));
    let publisher = Arc::new(MockPublisher::default());
    let poller = StatusPoller::new(context(api.clone(), publisher.clone(), quiet_options(), None));

    let report = poller.refresh_key("EV_STATE_OF_CHARGE").await;

    assert_eq!(report.published, 1);
    let messages = publisher.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, EV_TOPIC);
    assert_eq!(messages[0].payload, "80");
    assert!(messages[0].retain);
    assert_eq!(api.status_calls(), 0);
}

//! Home Assistant discovery descriptors derived from status items

use tracing::{debug, error, info};

use crate::bridge::context::BridgeContext;
use crate::models::discovery::{Component, DiscoveryDevice, DiscoveryMessage, DiscoveryPayload};
use crate::models::status::{category_of, Position, StatusItem, StatusSnapshot, ValueKind};
use crate::mqtt::topics::Topics;

pub const MANUFACTURER: &str = "Land Rover Jaguar";

/// System topics that get a sensor of their own
const SYSTEM_ITEMS: &[&str] = &[
    "last_update_ts",
    "send_command_response",
    "send_command_response_ts",
    "send_command_service_id",
];

/// Position fields discovered when the allow-list names `position`
const POSITION_ITEMS: &[&str] = &[
    "latitude",
    "longitude",
    "latlong",
    "speed",
    "heading",
    "timestamp",
    "formatted_address",
];

/// Static device details shared by every descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vehicle_name: String,
    pub sw_version: String,
}

impl DeviceInfo {
    fn device(&self, group: &str) -> DiscoveryDevice {
        let label = display_category(group);
        DiscoveryDevice {
            identifiers: vec![format!("jlr_{}_status", group.to_lowercase())],
            name: format!("{}: {} Data", self.vehicle_name, label),
            model: self.vehicle_name.clone(),
            manufacturer: MANUFACTURER.to_string(),
            sw_version: self.sw_version.clone(),
        }
    }
}

/// Short categories read as acronyms ("EV"), longer ones as words ("Climate")
fn display_category(category: &str) -> String {
    if category.len() < 4 {
        category.to_uppercase()
    } else {
        title_case(category)
    }
}

fn title_case(text: &str) -> String {
    text.split(['_', ' '])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// "EV_STATE_OF_CHARGE" -> "EV Status - State Of Charge"
pub fn sensor_name(key: &str) -> String {
    let category = category_of(key);
    let rest = key.split_once('_').map(|(_, rest)| rest).unwrap_or(key);
    format!("{} Status - {}", display_category(&category), title_case(rest))
}

/// Unit and device class inferred from the key suffix
pub fn infer_unit(key: &str) -> (Option<&'static str>, Option<&'static str>) {
    let key = key.to_lowercase();
    if key.ends_with("state_of_charge") {
        (Some("%"), Some("battery"))
    } else if key.ends_with("_perc") || key.ends_with("_percent") {
        (Some("%"), None)
    } else if key.ends_with("_soc_per_hour") {
        (Some("%/h"), None)
    } else if key.ends_with("_km_per_hour") {
        (Some("km/h"), None)
    } else if key.ends_with("_miles_per_hour") {
        (Some("mph"), None)
    } else if key.ends_with("_km") {
        (Some("km"), Some("distance"))
    } else if key.ends_with("_miles") {
        (Some("mi"), Some("distance"))
    } else if key.ends_with("_meter") {
        (Some("m"), Some("distance"))
    } else if key.ends_with("_minutes") {
        (Some("min"), Some("duration"))
    } else if key.ends_with("_voltage") {
        (Some("V"), Some("voltage"))
    } else if key.contains("tyre_pressure") {
        (Some("kPa"), Some("pressure"))
    } else {
        (None, None)
    }
}

fn availability(topics: &Topics) -> (String, String, String) {
    (topics.state(), "online".to_string(), "offline".to_string())
}

/// Descriptor for one status item
pub fn status_item_message(topics: &Topics, device: &DeviceInfo, item: &StatusItem) -> DiscoveryMessage {
    let key = item.name.to_lowercase();
    let kind = item.value.kind();
    let (availability_topic, payload_available, payload_not_available) = availability(topics);

    let (component, payload_on, payload_off) = match kind {
        ValueKind::Binary => {
            let upper = item.value.to_payload().chars().all(|c| !c.is_lowercase());
            let (on, off) = if upper { ("TRUE", "FALSE") } else { ("true", "false") };
            (Component::BinarySensor, Some(on.to_string()), Some(off.to_string()))
        }
        _ => (Component::Sensor, None, None),
    };
    let (unit, device_class) = match kind {
        ValueKind::Binary => (None, None),
        _ => infer_unit(&key),
    };
    let state_class = (kind == ValueKind::Numeric).then(|| "measurement".to_string());

    DiscoveryMessage {
        topic: topics.discovery(component.as_str(), &key),
        payload: DiscoveryPayload {
            name: sensor_name(&item.name),
            unique_id: format!("jlr_{}", key),
            state_topic: Some(topics.status_item(&item.name)),
            command_topic: None,
            unit_of_measurement: unit.map(str::to_string),
            device_class: device_class.map(str::to_string),
            state_class,
            payload_on,
            payload_off,
            availability_topic,
            payload_available,
            payload_not_available,
            device: device.device(&item.category()),
        },
    }
}

fn plain_sensor(
    topics: &Topics,
    device: DiscoveryDevice,
    object_id: &str,
    name: String,
    state_topic: String,
) -> DiscoveryMessage {
    let (availability_topic, payload_available, payload_not_available) = availability(topics);
    DiscoveryMessage {
        topic: topics.discovery(Component::Sensor.as_str(), object_id),
        payload: DiscoveryPayload {
            name,
            unique_id: format!("jlr_{}", object_id),
            state_topic: Some(state_topic),
            command_topic: None,
            unit_of_measurement: None,
            device_class: None,
            state_class: None,
            payload_on: None,
            payload_off: None,
            availability_topic,
            payload_available,
            payload_not_available,
            device,
        },
    }
}

/// Descriptors for the bridge's own bookkeeping topics
pub fn system_messages(topics: &Topics, device: &DeviceInfo) -> Vec<DiscoveryMessage> {
    let mut messages: Vec<DiscoveryMessage> = SYSTEM_ITEMS
        .iter()
        .map(|item| {
            plain_sensor(
                topics,
                device.device("system"),
                &format!("system_{}", item),
                format!("System Status - {}", title_case(item)),
                topics.system(item),
            )
        })
        .collect();

    let mut send_command = plain_sensor(
        topics,
        device.device("system"),
        "system_send_command",
        "System Status - Send Command".to_string(),
        topics.system("send_command_ts"),
    );
    send_command.payload.command_topic = Some(topics.command().to_string());
    messages.push(send_command);
    messages
}

/// Descriptors for the position topics
pub fn position_messages(topics: &Topics, device: &DeviceInfo, position: Option<&Position>) -> Vec<DiscoveryMessage> {
    let mut fields: Vec<String> = POSITION_ITEMS.iter().map(|f| f.to_string()).collect();
    if let Some(position) = position {
        for field in position.fields.keys() {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
    }
    fields
        .iter()
        .map(|field| {
            plain_sensor(
                topics,
                device.device("position"),
                &format!("position_{}", field.to_lowercase()),
                format!("Position - {}", title_case(field)),
                topics.position(field),
            )
        })
        .collect()
}

/// Every descriptor for one snapshot, in publish order.
///
/// Status items follow the allow-list; system items are always included and
/// position items only when the list names `position`.
pub fn build_messages(
    ctx: &BridgeContext,
    snapshot: &StatusSnapshot,
    position: Option<&Position>,
) -> Vec<DiscoveryMessage> {
    let device = DeviceInfo {
        vehicle_name: ctx.options.vehicle_name.clone(),
        sw_version: ctx.version.clone(),
    };
    let sensors = ctx.sensors();

    let mut messages: Vec<DiscoveryMessage> = snapshot
        .items
        .iter()
        .filter(|item| sensors.allows(&item.name))
        .map(|item| status_item_message(&ctx.topics, &device, item))
        .collect();
    messages.extend(system_messages(&ctx.topics, &device));
    if sensors.names("position") {
        messages.extend(position_messages(&ctx.topics, &device, position));
    }
    messages
}

/// Publish descriptors (retained); returns (published, failed)
pub async fn publish_messages(ctx: &BridgeContext, messages: &[DiscoveryMessage]) -> (usize, usize) {
    let mut published = 0;
    let mut failed = 0;
    for message in messages {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Unable to encode discovery for {}: {}", message.topic, e);
                failed += 1;
                continue;
            }
        };
        debug!("Discovery {}", message.topic);
        if ctx.publish(&message.topic, payload, true).await {
            published += 1;
        } else {
            failed += 1;
        }
    }
    info!("Published {} discovery descriptors ({} failed)", published, failed);
    (published, failed)
}

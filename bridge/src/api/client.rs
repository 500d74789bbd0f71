//! InControl vehicle client

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{self, HeaderValue};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::api::endpoints;
use crate::api::operations::{self, arg_i64, arg_string, Operation};
use crate::api::session::{Session, SessionManager};
use crate::api::VehicleApi;
use crate::errors::BridgeError;
use crate::http::client::HttpClient;
use crate::models::command::Kwargs;
use crate::models::status::{Position, StatusValue, VehicleStatus};

/// Where the PIN for a service authentication comes from
enum ServicePin<'a> {
    /// Last four characters of the VIN
    Vin,
    User(&'a str),
}

#[derive(Debug, Deserialize)]
struct VehicleList {
    #[serde(default)]
    vehicles: Vec<VehicleEntry>,
}

#[derive(Debug, Deserialize)]
struct VehicleEntry {
    vin: String,
}

/// InControl implementation of [`VehicleApi`]
pub struct JlrClient {
    http_client: Arc<HttpClient>,
    sessions: SessionManager,
    preferred_vin: Option<String>,
    vin: OnceCell<String>,
}

impl JlrClient {
    pub fn new(
        http_client: Arc<HttpClient>,
        sessions: SessionManager,
        preferred_vin: Option<String>,
    ) -> Self {
        Self {
            http_client,
            sessions,
            preferred_vin,
            vin: OnceCell::new(),
        }
    }

    /// Session plus the VIN of the bridged vehicle
    async fn context(&self) -> Result<(Session, String), BridgeError> {
        let session = self.sessions.session().await?;
        let vin = self
            .vin
            .get_or_try_init(|| self.select_vehicle(&session))
            .await?
            .clone();
        Ok((session, vin))
    }

    async fn select_vehicle(&self, session: &Session) -> Result<String, BridgeError> {
        let url = endpoints::user_vehicles(&session.user_id)?;
        let list: VehicleList = self
            .http_client
            .get(url.as_str(), self.sessions.headers(session)?)
            .await?;
        let vins: Vec<String> = list.vehicles.into_iter().map(|v| v.vin).collect();

        let vin = match &self.preferred_vin {
            Some(preferred) => vins
                .into_iter()
                .find(|vin| vin.eq_ignore_ascii_case(preferred))
                .ok_or_else(|| {
                    BridgeError::NotFound(format!("Vehicle {} is not on this account", preferred))
                })?,
            None => vins
                .into_iter()
                .next()
                .ok_or_else(|| BridgeError::NotFound("No vehicles on this account".to_string()))?,
        };
        info!("Bridging vehicle {}", vin);
        Ok(vin)
    }

    /// Drop the session when the API rejects it so the next call logs in again
    async fn checked<T>(&self, result: Result<T, BridgeError>) -> Result<T, BridgeError> {
        if let Err(e) = &result {
            if e.is_auth() {
                self.sessions.invalidate().await;
            }
        }
        result
    }

    async fn get(&self, url: Url, session: &Session, accept: &'static str) -> Result<Value, BridgeError> {
        let mut headers = self.sessions.headers(session)?;
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
        let result = self.http_client.get(url.as_str(), headers).await;
        self.checked(result).await
    }

    async fn post(
        &self,
        url: Url,
        session: &Session,
        accept: &'static str,
        content_type: &'static str,
        body: &Value,
    ) -> Result<Value, BridgeError> {
        let mut headers = self.sessions.headers(session)?;
        headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        let result = self.http_client.post(url.as_str(), headers, body).await;
        self.checked(result).await
    }

    async fn vehicle_get(&self, path: &[&str], accept: &'static str) -> Result<Value, BridgeError> {
        let (session, vin) = self.context().await?;
        self.get(endpoints::vehicle(&vin, path)?, &session, accept).await
    }

    /// Obtain a service token: `{"token": ...}`
    async fn authenticate_service(
        &self,
        session: &Session,
        vin: &str,
        service_name: &str,
        pin: ServicePin<'_>,
    ) -> Result<Map<String, Value>, BridgeError> {
        let pin = match pin {
            ServicePin::Vin => {
                let skip = vin.chars().count().saturating_sub(4);
                vin.chars().skip(skip).collect::<String>()
            }
            ServicePin::User(pin) => pin.to_string(),
        };
        debug!("Authenticating service {}", service_name);
        let url = endpoints::vehicle(vin, &["users", &session.user_id, "authenticate"])?;
        let response = self
            .post(
                url,
                session,
                endpoints::JSON,
                endpoints::AUTHENTICATE_REQUEST_V2,
                &json!({"serviceName": service_name, "pin": pin}),
            )
            .await?;
        match response {
            Value::Object(token) => Ok(token),
            other => Err(BridgeError::AuthError(format!(
                "Unexpected authenticate response for {}: {}",
                service_name, other
            ))),
        }
    }

    /// Authenticate a service and post its token, merged with `parameters`, to `path`
    async fn service_command(
        &self,
        service_name: &str,
        pin: ServicePin<'_>,
        path: &str,
        accept: &'static str,
        content_type: &'static str,
        parameters: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        let (session, vin) = self.context().await?;
        let mut body = self
            .authenticate_service(&session, &vin, service_name, pin)
            .await?;
        body.extend(parameters);
        info!("Sending '{}' to vehicle", path);
        self.post(
            endpoints::vehicle(&vin, &[path])?,
            &session,
            accept,
            content_type,
            &Value::Object(body),
        )
        .await
    }

    async fn simple_service(&self, service_name: &str, pin: ServicePin<'_>, path: &str) -> Result<Value, BridgeError> {
        self.service_command(
            service_name,
            pin,
            path,
            endpoints::SERVICE_STATUS_V4,
            endpoints::START_SERVICE_V3,
            Map::new(),
        )
        .await
    }

    async fn charge_profile(&self, key: &str, parameters: Value) -> Result<Value, BridgeError> {
        let mut body = Map::new();
        body.insert(key.to_string(), parameters);
        self.service_command(
            "CP",
            ServicePin::Vin,
            "chargeProfile",
            endpoints::SERVICE_STATUS_V5,
            endpoints::PHEV_SERVICE_V1,
            body,
        )
        .await
    }

    async fn preconditioning(&self, parameters: Value) -> Result<Value, BridgeError> {
        let mut body = Map::new();
        body.insert("serviceParameters".to_string(), parameters);
        self.service_command(
            "ECC",
            ServicePin::Vin,
            "preconditioning",
            endpoints::SERVICE_STATUS_V5,
            endpoints::PHEV_SERVICE_V1,
            body,
        )
        .await
    }

    async fn provisioning(&self, pin: &str, mode: &str) -> Result<Value, BridgeError> {
        let mut body = Map::new();
        body.insert("serviceCommand".to_string(), json!(mode));
        body.insert("startTime".to_string(), Value::Null);
        body.insert("endTime".to_string(), Value::Null);
        self.service_command(
            "PROV",
            ServicePin::User(pin),
            "prov",
            endpoints::SERVICE_STATUS_V4,
            endpoints::START_SERVICE_V3,
            body,
        )
        .await
    }

    async fn remote_engine_start(&self, pin: &str, target_value: &str) -> Result<Value, BridgeError> {
        self.provisioning(pin, "provisioning").await?;
        let (session, vin) = self.context().await?;
        self.post(
            endpoints::vehicle(&vin, &["settings"])?,
            &session,
            endpoints::JSON,
            endpoints::JSON,
            &json!({"key": "ClimateControlRccTargetTemp", "value": target_value, "applied": 1}),
        )
        .await?;
        self.simple_service("REON", ServicePin::User(pin), "engineOn").await
    }

    async fn query(&self, operation: &Operation, kwargs: &Kwargs) -> Result<Value, BridgeError> {
        match operation.name {
            "get_attributes" => {
                self.vehicle_get(&["attributes"], endpoints::VEHICLE_ATTRIBUTES_V3)
                    .await
            }
            "get_position" => self.vehicle_get(&["position"], endpoints::JSON).await,
            "get_departure_timers" => {
                self.vehicle_get(&["departuretimers"], endpoints::DEPARTURE_TIMERS_V1)
                    .await
            }
            "get_services" => {
                let (session, vin) = self.context().await?;
                let mut url = endpoints::vehicle(&vin, &["services"])?;
                url.query_pairs_mut().append_pair("active", "true");
                self.get(url, &session, endpoints::JSON).await
            }
            "get_service_status" => {
                let service_id = arg_string(kwargs, "service_id")?;
                self.vehicle_get(&["services", &service_id], endpoints::SERVICE_STATUS_V4)
                    .await
            }
            "get_subscription_packages" => {
                let (session, vin) = self.context().await?;
                let url = endpoints::url(
                    endpoints::IF9_BASE_URL,
                    &["users", &session.user_id, "vehicles", &vin, "subscriptionpackages"],
                )?;
                self.get(url, &session, endpoints::JSON).await
            }
            "get_trips" => {
                let count = arg_i64(kwargs, "count")?;
                let (session, vin) = self.context().await?;
                let mut url = endpoints::vehicle(&vin, &["trips"])?;
                url.query_pairs_mut().append_pair("count", &count.to_string());
                self.get(url, &session, endpoints::TRIP_LIST_V2).await
            }
            "reverse_geocode" => {
                let latitude = arg_string(kwargs, "latitude")?;
                let longitude = arg_string(kwargs, "longitude")?;
                Ok(Value::Object(
                    VehicleApi::reverse_geocode(self, &latitude, &longitude).await?,
                ))
            }
            other => Err(BridgeError::UnknownOperation(other.to_string())),
        }
    }

    async fn service(&self, operation: &Operation, kwargs: &Kwargs) -> Result<Value, BridgeError> {
        match operation.name {
            "get_health_status" => self.simple_service("VHS", ServicePin::Vin, "healthstatus").await,
            "honk_blink" => self.simple_service("HBLF", ServicePin::Vin, "honkBlink").await,
            "lock" => {
                let pin = arg_string(kwargs, "pin")?;
                self.simple_service("RDL", ServicePin::User(&pin), "lock").await
            }
            "unlock" => {
                let pin = arg_string(kwargs, "pin")?;
                self.simple_service("RDU", ServicePin::User(&pin), "unlock").await
            }
            "reset_alarm" => {
                let pin = arg_string(kwargs, "pin")?;
                self.simple_service("ALOFF", ServicePin::User(&pin), "unlock").await
            }
            "remote_engine_start" => {
                let pin = arg_string(kwargs, "pin")?;
                let target_value = arg_string(kwargs, "target_value")?;
                self.remote_engine_start(&pin, &target_value).await
            }
            "remote_engine_stop" => {
                let pin = arg_string(kwargs, "pin")?;
                self.simple_service("REOFF", ServicePin::User(&pin), "engineOff").await
            }
            "preconditioning_start" => {
                let target_temp = arg_string(kwargs, "target_temp")?;
                self.preconditioning(json!([
                    {"key": "PRECONDITIONING", "value": "START"},
                    {"key": "TARGET_TEMPERATURE_CELSIUS", "value": target_temp},
                ]))
                .await
            }
            "preconditioning_stop" => {
                self.preconditioning(json!([{"key": "PRECONDITIONING", "value": "STOP"}]))
                    .await
            }
            "climate_prioritize" => {
                let priority = arg_string(kwargs, "priority")?;
                self.preconditioning(json!([{"key": "PRIORITY_SETTING", "value": priority}]))
                    .await
            }
            "charging_start" => {
                self.charge_profile(
                    "serviceParameters",
                    json!([{"key": "CHARGE_NOW_SETTING", "value": "FORCE_ON"}]),
                )
                .await
            }
            "charging_stop" => {
                self.charge_profile(
                    "serviceParameters",
                    json!([{"key": "CHARGE_NOW_SETTING", "value": "FORCE_OFF"}]),
                )
                .await
            }
            "set_max_soc" => {
                let level = arg_i64(kwargs, "max_charge_level")?;
                self.charge_profile(
                    "serviceParameters",
                    json!([{"key": "SET_PERMANENT_MAX_SOC", "value": level}]),
                )
                .await
            }
            "set_one_off_max_soc" => {
                let level = arg_i64(kwargs, "max_charge_level")?;
                self.charge_profile(
                    "serviceParameters",
                    json!([{"key": "SET_ONE_OFF_MAX_SOC", "value": level}]),
                )
                .await
            }
            "add_departure_timer" => {
                let timer = json!({
                    "timers": [{
                        "departureTime": {
                            "hour": arg_i64(kwargs, "hour")?,
                            "minute": arg_i64(kwargs, "minute")?,
                        },
                        "timerIndex": arg_i64(kwargs, "index")?,
                        "timerTarget": {
                            "singleDay": {
                                "day": arg_i64(kwargs, "day")?,
                                "month": arg_i64(kwargs, "month")?,
                                "year": arg_i64(kwargs, "year")?,
                            }
                        },
                        "timerType": {"key": "BOTHCHARGEANDPRECONDITION", "value": true},
                    }]
                });
                self.charge_profile("departureTimerSetting", timer).await
            }
            "enable_privacy_mode" => {
                let pin = arg_string(kwargs, "pin")?;
                self.provisioning(&pin, "privacySwitch_on").await
            }
            "disable_privacy_mode" => {
                let pin = arg_string(kwargs, "pin")?;
                self.provisioning(&pin, "privacySwitch_off").await
            }
            other => Err(BridgeError::UnknownOperation(other.to_string())),
        }
    }
}

#[async_trait]
impl VehicleApi for JlrClient {
    async fn get_status(&self) -> Result<VehicleStatus, BridgeError> {
        let (session, vin) = self.context().await?;
        let mut url = endpoints::vehicle(&vin, &["status"])?;
        url.query_pairs_mut().append_pair("includeInactive", "true");
        let response = self.get(url, &session, endpoints::HEALTH_STATUS_V3).await?;
        Ok(VehicleStatus::from_response(response)?)
    }

    async fn get_status_value(&self, key: &str) -> Result<StatusValue, BridgeError> {
        let status = self.get_status().await?;
        status
            .status
            .get(key)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("Status key {} not reported", key)))
    }

    async fn get_position(&self) -> Result<Option<Position>, BridgeError> {
        let response = self.vehicle_get(&["position"], endpoints::JSON).await?;
        Ok(Position::from_response(&response))
    }

    async fn get_departure_timers(&self) -> Result<Vec<Value>, BridgeError> {
        let response = self
            .vehicle_get(&["departuretimers"], endpoints::DEPARTURE_TIMERS_V1)
            .await?;
        Ok(response
            .pointer("/departureTimerSetting/timers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn reverse_geocode(
        &self,
        latitude: &str,
        longitude: &str,
    ) -> Result<Map<String, Value>, BridgeError> {
        let session = self.sessions.session().await?;
        let url = endpoints::reverse_geocode(latitude, longitude)?;
        match self.get(url, &session, endpoints::JSON).await? {
            Value::Object(address) => Ok(address),
            other => Err(BridgeError::ApiError(format!(
                "Unexpected reverse geocode response: {}",
                other
            ))),
        }
    }

    fn operation(&self, name: &str) -> Option<&'static Operation> {
        operations::find(name)
    }

    async fn invoke(&self, operation: &Operation, kwargs: &Kwargs) -> Result<Value, BridgeError> {
        match operation.kind {
            operations::OperationKind::Query => self.query(operation, kwargs).await,
            operations::OperationKind::Service => self.service(operation, kwargs).await,
        }
    }
}

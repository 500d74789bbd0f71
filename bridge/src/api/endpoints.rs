//! InControl endpoint URLs and media types

use url::Url;

use crate::errors::BridgeError;

pub const IFAS_BASE_URL: &str = "https://ifas.prod-row.jlrmotor.com/ifas/jlr";
pub const IFOP_BASE_URL: &str = "https://ifop.prod-row.jlrmotor.com/ifop/jlr";
pub const IF9_BASE_URL: &str = "https://if9.prod-row.jlrmotor.com/if9/jlr";

/// Client credential the token endpoint expects in its basic auth header
pub const IFAS_CLIENT_CREDENTIAL: &str = "as:aspass";

pub const USER_V3: &str = "application/vnd.wirelesscar.ngtp.if9.User-v3+json";
pub const HEALTH_STATUS_V3: &str = "application/vnd.ngtp.org.if9.healthstatus-v3+json";
pub const VEHICLE_ATTRIBUTES_V3: &str = "application/vnd.ngtp.org.VehicleAttributes-v3+json";
pub const DEPARTURE_TIMERS_V1: &str =
    "application/vnd.wirelesscar.ngtp.if9.DepartureTimerSettings-v1+json";
pub const TRIP_LIST_V2: &str = "application/vnd.ngtp.org.triplist-v2+json";
pub const SERVICE_STATUS_V4: &str = "application/vnd.wirelesscar.ngtp.if9.ServiceStatus-v4+json";
pub const SERVICE_STATUS_V5: &str = "application/vnd.wirelesscar.ngtp.if9.ServiceStatus-v5+json";
pub const AUTHENTICATE_REQUEST_V2: &str =
    "application/vnd.wirelesscar.ngtp.if9.AuthenticateRequest-v2+json; charset=utf-8";
pub const START_SERVICE_V3: &str =
    "application/vnd.wirelesscar.ngtp.if9.StartServiceConfiguration-v3+json; charset=utf-8";
pub const PHEV_SERVICE_V1: &str =
    "application/vnd.wirelesscar.ngtp.if9.PhevService-v1+json; charset=utf-8";
pub const JSON: &str = "application/json";

/// Build a URL from a base and path segments, escaping each segment
pub fn url(base: &str, segments: &[&str]) -> Result<Url, BridgeError> {
    let mut url = Url::parse(base).map_err(|e| BridgeError::Internal(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| BridgeError::Internal(format!("{} cannot be a base URL", base)))?
        .extend(segments);
    Ok(url)
}

pub fn tokens() -> Result<Url, BridgeError> {
    url(IFAS_BASE_URL, &["tokens"])
}

pub fn device_clients(username: &str) -> Result<Url, BridgeError> {
    url(IFOP_BASE_URL, &["users", username, "clients"])
}

pub fn user_by_login(username: &str) -> Result<Url, BridgeError> {
    let mut url = url(IF9_BASE_URL, &["users"])?;
    url.query_pairs_mut().append_pair("loginName", username);
    Ok(url)
}

pub fn user_vehicles(user_id: &str) -> Result<Url, BridgeError> {
    let mut url = url(IF9_BASE_URL, &["users", user_id, "vehicles"])?;
    url.query_pairs_mut().append_pair("primaryOnly", "true");
    Ok(url)
}

/// `vehicles/<vin>/<path...>`
pub fn vehicle(vin: &str, path: &[&str]) -> Result<Url, BridgeError> {
    let mut segments = vec!["vehicles", vin];
    segments.extend_from_slice(path);
    url(IF9_BASE_URL, &segments)
}

pub fn reverse_geocode(latitude: &str, longitude: &str) -> Result<Url, BridgeError> {
    url(IF9_BASE_URL, &["geocode", "reverse", latitude, longitude, "en"])
}

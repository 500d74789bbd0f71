//! InControl session management

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::api::endpoints;
use crate::errors::BridgeError;
use crate::http::client::HttpClient;

/// Refresh this long before the API says the token expires
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Account credentials
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// An authenticated session
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub authorization_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: String,
}

impl Session {
    /// Check if the session is expired
    pub fn is_expired(&self) -> bool {
        self.expires_within(0)
    }

    /// Check if the session expires within the given number of seconds
    pub fn expires_within(&self, seconds: i64) -> bool {
        Utc::now() + Duration::seconds(seconds) >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    authorization_token: String,
    refresh_token: String,
    #[serde(deserialize_with = "deserialize_expires_in")]
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserResponse {
    user_id: String,
}

// The token endpoint sends expires_in as a string
fn deserialize_expires_in<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match &value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| serde::de::Error::custom(format!("invalid expires_in: {}", value)))
}

/// Session manager: logs in lazily and renews the session before expiry
pub struct SessionManager {
    http_client: Arc<HttpClient>,
    credentials: Credentials,
    device_id: String,
    session: RwLock<Option<Session>>,
}

impl SessionManager {
    pub fn new(http_client: Arc<HttpClient>, credentials: Credentials, device_id: String) -> Self {
        Self {
            http_client,
            credentials,
            device_id,
            session: RwLock::new(None),
        }
    }

    /// Get a valid session, logging in or refreshing as needed
    pub async fn session(&self) -> Result<Session, BridgeError> {
        {
            let cached = self.session.read().await;
            if let Some(session) = cached.as_ref() {
                if !session.expires_within(EXPIRY_MARGIN_SECS) {
                    return Ok(session.clone());
                }
            }
        }

        let mut cached = self.session.write().await;
        // Another caller may have renewed while we waited for the lock
        if let Some(session) = cached.as_ref() {
            if !session.expires_within(EXPIRY_MARGIN_SECS) {
                return Ok(session.clone());
            }
        }

        let renewed = match cached.as_ref() {
            Some(current) => match self.refresh(current).await {
                Ok(session) => session,
                Err(e) => {
                    warn!("Session refresh failed, logging in again: {}", e);
                    self.login().await?
                }
            },
            None => self.login().await?,
        };

        *cached = Some(renewed.clone());
        Ok(renewed)
    }

    /// Drop the cached session so the next call logs in again
    pub async fn invalidate(&self) {
        let mut cached = self.session.write().await;
        if cached.take().is_some() {
            info!("Remote API session invalidated");
        }
    }

    /// Headers carrying the session's bearer token
    pub fn headers(&self, session: &Session) -> Result<HeaderMap, BridgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header_value(&format!("Bearer {}", session.access_token))?,
        );
        headers.insert("X-Device-Id", header_value(&self.device_id)?);
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        Ok(headers)
    }

    async fn login(&self) -> Result<Session, BridgeError> {
        info!("Logging in to the InControl API as {}", self.credentials.username);

        let tokens = self
            .request_tokens(json!({
                "grant_type": "password",
                "username": self.credentials.username,
                "password": self.credentials.password.expose_secret(),
            }))
            .await?;

        let mut session = Session {
            access_token: tokens.access_token,
            authorization_token: tokens.authorization_token,
            refresh_token: tokens.refresh_token,
            expires_at: Utc::now() + Duration::seconds(tokens.expires_in),
            user_id: String::new(),
        };

        self.register_device(&session).await?;
        session.user_id = self.login_user(&session).await?;

        info!("Logged in, session expires at {}", session.expires_at);
        Ok(session)
    }

    async fn refresh(&self, current: &Session) -> Result<Session, BridgeError> {
        debug!("Refreshing InControl session");

        let tokens = self
            .request_tokens(json!({
                "grant_type": "refresh_token",
                "refresh_token": current.refresh_token,
            }))
            .await?;

        let session = Session {
            access_token: tokens.access_token,
            authorization_token: tokens.authorization_token,
            refresh_token: tokens.refresh_token,
            expires_at: Utc::now() + Duration::seconds(tokens.expires_in),
            user_id: current.user_id.clone(),
        };
        self.register_device(&session).await?;
        Ok(session)
    }

    async fn request_tokens(&self, body: serde_json::Value) -> Result<TokenResponse, BridgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header_value(&format!(
                "Basic {}",
                STANDARD.encode(endpoints::IFAS_CLIENT_CREDENTIAL)
            ))?,
        );
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(endpoints::JSON));
        headers.insert("X-Device-Id", header_value(&self.device_id)?);
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));

        let url = endpoints::tokens()?;
        self.http_client
            .post(url.as_str(), headers, &body)
            .await
            .map_err(|e| match e {
                BridgeError::ApiError(msg) => BridgeError::AuthError(msg),
                other => other,
            })
    }

    async fn register_device(&self, session: &Session) -> Result<(), BridgeError> {
        let url = endpoints::device_clients(&self.credentials.username)?;
        let body = json!({
            "access_token": session.access_token,
            "authorization_token": session.authorization_token,
            "expires_in": "86400",
            "deviceID": self.device_id,
        });
        let _: serde_json::Value = self
            .http_client
            .post(url.as_str(), self.headers(session)?, &body)
            .await?;
        debug!("Device {} registered", self.device_id);
        Ok(())
    }

    async fn login_user(&self, session: &Session) -> Result<String, BridgeError> {
        let url = endpoints::user_by_login(&self.credentials.username)?;
        let mut headers = self.headers(session)?;
        headers.insert(header::ACCEPT, HeaderValue::from_static(endpoints::USER_V3));
        let user: UserResponse = self.http_client.get(url.as_str(), headers).await?;
        Ok(user.user_id)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, BridgeError> {
    HeaderValue::from_str(value)
        .map_err(|e| BridgeError::AuthError(format!("Invalid header value: {}", e)))
}

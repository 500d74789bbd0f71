//! HTTP client implementation

use reqwest::{header::HeaderMap, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::BridgeError;

/// HTTP client for the remote vehicle API
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(timeout: std::time::Duration) -> Result<Self, BridgeError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<T, BridgeError> {
        debug!("GET {}", url);

        let response = self.client.get(url).headers(headers).send().await?;
        Self::decode("GET", url, response).await
    }

    /// Make a POST request with a JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &B,
    ) -> Result<T, BridgeError> {
        debug!("POST {}", url);

        // Headers go first so a vendor Content-Type is not replaced by json()
        let response = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;
        Self::decode("POST", url, response).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &str,
        url: &str,
        response: Response,
    ) -> Result<T, BridgeError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} {} failed: {} - {}", method, url, status, body);
            return Err(status_error(status, body));
        }

        // Several endpoints answer 204 or an empty body
        let body = response.text().await?;
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        Ok(serde_json::from_str(body)?)
    }
}

/// Map a non-success status onto the error taxonomy
pub fn status_error(status: StatusCode, body: String) -> BridgeError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BridgeError::AuthError(format!("{}: {}", status, body))
        }
        StatusCode::TOO_MANY_REQUESTS => BridgeError::RateLimited(format!("{}: {}", status, body)),
        StatusCode::NOT_FOUND => BridgeError::NotFound(format!("{}: {}", status, body)),
        _ => BridgeError::ApiError(format!("{}: {}", status, body)),
    }
}

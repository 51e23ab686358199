use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use dialsync_core::config::ProviderConfig;
use dialsync_core::domain::call::CallDetails;
use dialsync_core::domain::resource::{RemoteId, RemoteObject, ResourceKind};
use dialsync_core::errors::ProviderError;
use dialsync_core::normalize::name_key;

use crate::{collection, decode_call, decode_call_details, decode_object, RemoteCall, RemoteProvider};

/// reqwest-backed client for the provider's REST API.
pub struct HttpProvider {
    name: String,
    base_url: String,
    api_key: SecretString,
    client: Client,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| ProviderError::connection(&config.name, error.to_string()))?;

        Ok(Self {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.api_key.expose_secret())
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = self.authorized(request).send().await.map_err(|error| {
            warn!(
                event_name = "provider.request.transport_error",
                provider = %self.name,
                operation,
                error = %error,
                "provider request failed before a response arrived"
            );
            if error.is_timeout() {
                ProviderError::timeout(&self.name, error.to_string())
            } else {
                ProviderError::connection(&self.name, error.to_string())
            }
        })?;

        debug!(
            event_name = "provider.request.completed",
            provider = %self.name,
            operation,
            status = %response.status(),
            "provider responded"
        );
        Ok(response)
    }

    /// Splits a response into its JSON body or a classified error.
    async fn json_or_error(&self, operation: &str, response: Response) -> Result<Value, ProviderError> {
        let status = response.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            return response.json::<Value>().await.map_err(|error| {
                ProviderError::decode(&self.name, format!("{operation} returned invalid json: {error}"))
            });
        }

        Err(self.status_error(operation, response).await)
    }

    async fn status_error(&self, operation: &str, response: Response) -> ProviderError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| parse_retry_after(raw, Utc::now()));
        let text = response.text().await.unwrap_or_default();
        let details = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        warn!(
            event_name = "provider.request.rejected",
            provider = %self.name,
            operation,
            status = %status,
            retry_after_secs = ?retry_after,
            "provider returned an error status"
        );
        ProviderError::from_status(&self.name, status.as_u16(), retry_after, details)
    }
}

#[async_trait]
impl RemoteProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_resource(
        &self,
        kind: ResourceKind,
        payload: &Value,
    ) -> Result<RemoteObject, ProviderError> {
        let request = self.client.post(self.url(collection(kind))).json(payload);
        let response = self.send("create_resource", request).await?;
        let body = self.json_or_error("create_resource", response).await?;
        decode_object(&self.name, kind, body)
    }

    async fn update_resource(
        &self,
        kind: ResourceKind,
        remote_id: &RemoteId,
        payload: &Value,
    ) -> Result<RemoteObject, ProviderError> {
        let url = self.url(&format!("{}/{}", collection(kind), remote_id.0));
        let response = self.send("update_resource", self.client.patch(url).json(payload)).await?;
        let body = self.json_or_error("update_resource", response).await?;
        if body.is_null() {
            // Some endpoints answer 204; the id we sent is still the id.
            return Ok(RemoteObject {
                remote_id: remote_id.clone(),
                status: None,
                name: None,
                data: payload.clone(),
            });
        }
        decode_object(&self.name, kind, body)
    }

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        remote_id: &RemoteId,
    ) -> Result<(), ProviderError> {
        let url = self.url(&format!("{}/{}", collection(kind), remote_id.0));
        let response = self.send("delete_resource", self.client.delete(url)).await?;
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        Err(self.status_error("delete_resource", response).await)
    }

    async fn fetch_resource(
        &self,
        kind: ResourceKind,
        remote_id: &RemoteId,
    ) -> Result<Option<RemoteObject>, ProviderError> {
        let url = self.url(&format!("{}/{}", collection(kind), remote_id.0));
        let response = self.send("fetch_resource", self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = self.json_or_error("fetch_resource", response).await?;
        decode_object(&self.name, kind, body).map(Some)
    }

    async fn find_resources(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Vec<RemoteObject>, ProviderError> {
        let request = self.client.get(self.url(collection(kind))).query(&[("name", name)]);
        let response = self.send("find_resources", request).await?;
        let body = self.json_or_error("find_resources", response).await?;

        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut object) => match object.remove("data") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };

        let wanted = name_key(name);
        let mut matches = Vec::new();
        for item in items {
            let object = decode_object(&self.name, kind, item)?;
            if object.name.as_deref().map(name_key).as_deref() == Some(wanted.as_str()) {
                matches.push(object);
            }
        }
        Ok(matches)
    }

    async fn create_call(&self, payload: &Value) -> Result<RemoteCall, ProviderError> {
        let response = self.send("create_call", self.client.post(self.url("calls")).json(payload)).await?;
        let body = self.json_or_error("create_call", response).await?;
        decode_call(&self.name, &body)
    }

    async fn fetch_call(
        &self,
        remote_call_id: &RemoteId,
    ) -> Result<Option<CallDetails>, ProviderError> {
        let url = self.url(&format!("calls/{}", remote_call_id.0));
        let response = self.send("fetch_call", self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = self.json_or_error("fetch_call", response).await?;
        Ok(Some(decode_call_details(&body)))
    }
}

/// `Retry-After` is either delta-seconds or an HTTP date.
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<u64> {
    let trimmed = raw.trim();
    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(seconds);
    }
    let at = DateTime::parse_from_rfc2822(trimmed).ok()?.with_timezone(&Utc);
    Some(u64::try_from((at - now).num_seconds()).unwrap_or(0))
}

//! The remote call-orchestration provider as seen by the control plane.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dialsync_core::domain::call::CallDetails;
use dialsync_core::domain::resource::{RemoteId, RemoteObject, ResourceKind};
use dialsync_core::errors::ProviderError;

pub mod fake;
pub mod http;
pub mod mapper;

pub use fake::{FakeOp, FakeProvider};
pub use http::HttpProvider;
pub use mapper::{CallRequest, JsonPayloadMapper, PayloadMapper, PayloadRefs};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub remote_call_id: RemoteId,
    pub status: Option<String>,
}

/// One attempt against the provider. Retries are the caller's concern.
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn create_resource(
        &self,
        kind: ResourceKind,
        payload: &Value,
    ) -> Result<RemoteObject, ProviderError>;

    async fn update_resource(
        &self,
        kind: ResourceKind,
        remote_id: &RemoteId,
        payload: &Value,
    ) -> Result<RemoteObject, ProviderError>;

    /// Deleting an object the provider no longer has succeeds.
    async fn delete_resource(
        &self,
        kind: ResourceKind,
        remote_id: &RemoteId,
    ) -> Result<(), ProviderError>;

    /// `None` when the provider answers 404.
    async fn fetch_resource(
        &self,
        kind: ResourceKind,
        remote_id: &RemoteId,
    ) -> Result<Option<RemoteObject>, ProviderError>;

    /// Every object of `kind` whose normalized name matches `name`.
    async fn find_resources(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Vec<RemoteObject>, ProviderError>;

    async fn create_call(&self, payload: &Value) -> Result<RemoteCall, ProviderError>;

    async fn fetch_call(&self, remote_call_id: &RemoteId)
        -> Result<Option<CallDetails>, ProviderError>;
}

pub fn collection(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Agent => "agents",
        ResourceKind::Voice => "voices",
        ResourceKind::Batch => "batches",
    }
}

/// Reads the provider's identifier from a response body. Providers differ on
/// the field name, so `id`, `remote_id` and `<kind>_id` are all accepted.
pub fn decode_object(
    provider: &str,
    kind: ResourceKind,
    body: Value,
) -> Result<RemoteObject, ProviderError> {
    let object = body.get("data").filter(|data| data.is_object()).cloned().unwrap_or(body);
    let kind_field = format!("{}_id", kind.as_str());
    let remote_id = ["id", "remote_id", kind_field.as_str()]
        .iter()
        .find_map(|field| object.get(*field).and_then(value_as_id))
        .ok_or_else(|| {
            ProviderError::decode(provider, format!("{} response carries no identifier", kind.as_str()))
        })?;

    Ok(RemoteObject {
        remote_id: RemoteId(remote_id),
        status: object.get("status").and_then(Value::as_str).map(str::to_string),
        name: object.get("name").and_then(Value::as_str).map(str::to_string),
        data: object,
    })
}

pub fn decode_call(provider: &str, body: &Value) -> Result<RemoteCall, ProviderError> {
    let remote_call_id = ["id", "call_id"]
        .iter()
        .find_map(|field| body.get(*field).and_then(value_as_id))
        .ok_or_else(|| ProviderError::decode(provider, "call response carries no identifier"))?;

    Ok(RemoteCall {
        remote_call_id: RemoteId(remote_call_id),
        status: body.get("status").and_then(Value::as_str).map(str::to_string),
    })
}

pub fn decode_call_details(body: &Value) -> CallDetails {
    CallDetails {
        transcript: body.get("transcript").and_then(Value::as_str).map(str::to_string),
        analysis: body.get("analysis").filter(|value| !value.is_null()).cloned(),
    }
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use dialsync_core::domain::resource::ResourceKind;

    use super::{decode_call, decode_object};

    #[test]
    fn decode_object_accepts_alternate_id_fields_and_envelopes() {
        let plain = decode_object("acme", ResourceKind::Voice, json!({ "voice_id": "v-9", "status": "training" }))
            .expect("voice");
        assert_eq!(plain.remote_id.0, "v-9");
        assert_eq!(plain.status.as_deref(), Some("training"));

        let wrapped = decode_object(
            "acme",
            ResourceKind::Agent,
            json!({ "data": { "id": 42, "name": "Front Desk" } }),
        )
        .expect("agent");
        assert_eq!(wrapped.remote_id.0, "42");
        assert_eq!(wrapped.name.as_deref(), Some("Front Desk"));
    }

    #[test]
    fn missing_identifier_is_a_decode_error() {
        let error = decode_object("acme", ResourceKind::Batch, json!({ "status": "ok" }))
            .expect_err("no id");
        assert!(!error.is_retryable());

        assert!(decode_call("acme", &json!({ "status": "queued" })).is_err());
        assert_eq!(
            decode_call("acme", &json!({ "call_id": "c-1" })).expect("call").remote_call_id.0,
            "c-1"
        );
    }
}

use serde_json::{json, Map, Value};

use dialsync_core::domain::call::CallId;
use dialsync_core::domain::format_timestamp;
use dialsync_core::domain::resource::{RemoteId, ResourceId, ResourceSpec};
use dialsync_core::domain::TenantId;

/// Identifiers the mapper needs beyond the resource spec itself.
#[derive(Clone, Copy, Debug)]
pub struct PayloadRefs<'a> {
    pub tenant_id: &'a TenantId,
    pub local_id: &'a ResourceId,
    /// Remote id of the referenced voice (agents) or agent (batches).
    pub reference: Option<&'a RemoteId>,
}

#[derive(Clone, Copy, Debug)]
pub struct CallRequest<'a> {
    pub tenant_id: &'a TenantId,
    pub call_id: &'a CallId,
    pub agent_remote_id: &'a RemoteId,
    pub batch_remote_id: Option<&'a RemoteId>,
    pub to_number: &'a str,
}

/// Turns a validated spec into the provider's request body. Implementations
/// must be pure.
pub trait PayloadMapper: Send + Sync {
    fn build(&self, spec: &ResourceSpec, refs: PayloadRefs<'_>) -> Value;

    fn build_call(&self, request: CallRequest<'_>) -> Value;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonPayloadMapper;

impl PayloadMapper for JsonPayloadMapper {
    fn build(&self, spec: &ResourceSpec, refs: PayloadRefs<'_>) -> Value {
        let mut body = settings_object(spec.settings());
        body.insert("name".to_string(), Value::String(spec.name().to_string()));

        match spec {
            ResourceSpec::Agent(_) => {
                if let Some(voice) = refs.reference {
                    body.insert("voice_id".to_string(), Value::String(voice.0.clone()));
                }
            }
            ResourceSpec::Voice(_) => {}
            ResourceSpec::Batch(batch) => {
                if let Some(agent) = refs.reference {
                    body.insert("agent_id".to_string(), Value::String(agent.0.clone()));
                }
                body.insert("recipients".to_string(), json!(batch.recipients));
                if let Some(scheduled_at) = batch.scheduled_at {
                    body.insert(
                        "scheduled_at".to_string(),
                        Value::String(format_timestamp(&scheduled_at)),
                    );
                }
            }
        }

        body.insert(
            "metadata".to_string(),
            json!({ "local_id": refs.local_id.0, "tenant_id": refs.tenant_id.0 }),
        );
        Value::Object(body)
    }

    fn build_call(&self, request: CallRequest<'_>) -> Value {
        let mut body = Map::new();
        body.insert("agent_id".to_string(), Value::String(request.agent_remote_id.0.clone()));
        body.insert("to_number".to_string(), Value::String(request.to_number.to_string()));
        if let Some(batch) = request.batch_remote_id {
            body.insert("batch_id".to_string(), Value::String(batch.0.clone()));
        }
        body.insert(
            "metadata".to_string(),
            json!({ "local_id": request.call_id.0, "tenant_id": request.tenant_id.0 }),
        );
        Value::Object(body)
    }
}

// Settings that are not an object are kept under their own key rather than dropped.
fn settings_object(settings: &Value) -> Map<String, Value> {
    match settings {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("settings".to_string(), other.clone());
            map
        }
    }
}

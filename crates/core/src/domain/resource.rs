use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteId(pub String);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Agent,
    Voice,
    Batch,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Voice => "voice",
            Self::Batch => "batch",
        }
    }

    /// Accepts singular and plural forms so URL segments like `agents` resolve.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agent" | "agents" => Some(Self::Agent),
            "voice" | "voices" => Some(Self::Voice),
            "batch" | "batches" => Some(Self::Batch),
            _ => None,
        }
    }

    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Agent => "agt",
            Self::Voice => "vce",
            Self::Batch => "bat",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Draft,
    Creating,
    Active,
    Failed,
    Deleted,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "creating" => Some(Self::Creating),
            "active" => Some(Self::Active),
            "failed" => Some(Self::Failed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub voice_id: Option<ResourceId>,
    #[serde(default = "empty_settings")]
    pub settings: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoiceSpec {
    pub name: String,
    #[serde(default = "empty_settings")]
    pub settings: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSpec {
    pub name: String,
    pub agent_id: ResourceId,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "empty_settings")]
    pub settings: Value,
}

fn empty_settings() -> Value {
    Value::Object(Map::new())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Agent(AgentSpec),
    Voice(VoiceSpec),
    Batch(BatchSpec),
}

impl ResourceSpec {
    /// Decodes a kind-specific body, e.g. the JSON posted to `/resources/agent`.
    pub fn from_json(kind: ResourceKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ResourceKind::Agent => Self::Agent(serde_json::from_value(value)?),
            ResourceKind::Voice => Self::Voice(serde_json::from_value(value)?),
            ResourceKind::Batch => Self::Batch(serde_json::from_value(value)?),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Agent(_) => ResourceKind::Agent,
            Self::Voice(_) => ResourceKind::Voice,
            Self::Batch(_) => ResourceKind::Batch,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Agent(spec) => &spec.name,
            Self::Voice(spec) => &spec.name,
            Self::Batch(spec) => &spec.name,
        }
    }

    pub fn set_name(&mut self, name: String) {
        match self {
            Self::Agent(spec) => spec.name = name,
            Self::Voice(spec) => spec.name = name,
            Self::Batch(spec) => spec.name = name,
        }
    }

    pub fn settings(&self) -> &Value {
        match self {
            Self::Agent(spec) => &spec.settings,
            Self::Voice(spec) => &spec.settings,
            Self::Batch(spec) => &spec.settings,
        }
    }

    /// The sub-resource this spec depends on, if any.
    pub fn reference(&self) -> Option<(ResourceKind, &ResourceId)> {
        match self {
            Self::Agent(spec) => spec.voice_id.as_ref().map(|id| (ResourceKind::Voice, id)),
            Self::Voice(_) => None,
            Self::Batch(spec) => Some((ResourceKind::Agent, &spec.agent_id)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncedResource {
    pub tenant_id: TenantId,
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub name: String,
    pub remote_id: Option<RemoteId>,
    pub status: SyncStatus,
    pub spec: ResourceSpec,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncedResource {
    /// Mid-saga rows must never be observable by readers.
    pub fn is_visible(&self) -> bool {
        !matches!(self.status, SyncStatus::Creating | SyncStatus::Deleted)
    }

    pub fn is_live(&self) -> bool {
        self.status != SyncStatus::Deleted
    }

    /// A linked record carries a remote id exactly when it is active, or when
    /// it was active before being deleted.
    pub fn remote_link_is_consistent(&self) -> bool {
        match self.status {
            SyncStatus::Active => self.remote_id.is_some(),
            SyncStatus::Deleted => true,
            SyncStatus::Draft | SyncStatus::Creating | SyncStatus::Failed => {
                self.remote_id.is_none()
            }
        }
    }
}

/// A resource as reported by the remote provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub remote_id: RemoteId,
    pub status: Option<String>,
    pub name: Option<String>,
    pub data: Value,
}

impl RemoteObject {
    /// Local id stamped into the remote object's metadata at creation time.
    pub fn local_id(&self) -> Option<&str> {
        self.metadata_str("local_id")
    }

    /// Tenant stamped into the remote object's metadata at creation time.
    pub fn tenant_id(&self) -> Option<&str> {
        self.metadata_str("tenant_id")
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.data.get("metadata").and_then(|metadata| metadata.get(key)).and_then(Value::as_str)
    }
}

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::resource::RemoteId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WebhookEventType {
    CallQueued,
    CallRinging,
    CallStarted,
    CallEnded,
    CallFailed,
    CallAnalyzed,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallQueued => "call.queued",
            Self::CallRinging => "call.ringing",
            Self::CallStarted => "call.started",
            Self::CallEnded => "call.ended",
            Self::CallFailed => "call.failed",
            Self::CallAnalyzed => "call.analyzed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "call.queued" => Some(Self::CallQueued),
            "call.ringing" => Some(Self::CallRinging),
            "call.started" => Some(Self::CallStarted),
            "call.ended" => Some(Self::CallEnded),
            "call.failed" => Some(Self::CallFailed),
            "call.analyzed" => Some(Self::CallAnalyzed),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("webhook body is not a valid event envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("webhook event `{0}` does not name a remote resource")]
    MissingResourceId(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(alias = "event", alias = "type")]
    event_type: String,
    #[serde(default, alias = "call_id")]
    resource_id: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default, alias = "data")]
    payload: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WebhookEvent {
    pub event_type: String,
    pub resource_id: RemoteId,
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: Value,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope = serde_json::from_slice(body)?;
        let resource_id = raw
            .resource_id
            .or_else(|| string_field(&raw.payload, &["call_id", "id"]))
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| EnvelopeError::MissingResourceId(raw.event_type.clone()))?;
        let timestamp =
            raw.timestamp.as_ref().and_then(timestamp_text).and_then(|text| parse_event_time(&text));

        Ok(Self {
            event_type: raw.event_type,
            resource_id: RemoteId(resource_id),
            timestamp,
            payload: raw.payload,
        })
    }

    pub fn kind(&self) -> Option<WebhookEventType> {
        WebhookEventType::parse(&self.event_type)
    }

    /// Duration in whole seconds; fractional values round up.
    pub fn duration_secs(&self) -> Option<u32> {
        ["duration_secs", "duration", "call_duration"].iter().find_map(|field| {
            let value = self.payload.get(*field)?;
            if let Some(whole) = value.as_u64() {
                return u32::try_from(whole).ok();
            }
            value.as_f64().filter(|secs| *secs >= 0.0).map(|secs| secs.ceil() as u32)
        })
    }

    pub fn failure_reason(&self) -> Option<String> {
        string_field(&self.payload, &["reason", "error", "end_reason"])
    }

    pub fn transcript(&self) -> Option<String> {
        string_field(&self.payload, &["transcript"])
    }

    pub fn analysis(&self) -> Option<Value> {
        self.payload.get("analysis").filter(|value| !value.is_null()).cloned()
    }
}

/// The envelope timestamp as the text the sender signed.
pub fn envelope_timestamp(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("timestamp").and_then(timestamp_text)
}

fn timestamp_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Accepts unix seconds, unix milliseconds, or RFC 3339.
pub fn parse_event_time(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(number) = trimmed.parse::<i64>() {
        return if number > 100_000_000_000 {
            Utc.timestamp_millis_opt(number).single()
        } else {
            Utc.timestamp_opt(number, 0).single()
        };
    }
    DateTime::parse_from_rfc3339(trimmed).ok().map(|value| value.with_timezone(&Utc))
}

fn string_field(payload: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        payload.get(*field).and_then(Value::as_str).map(str::to_string)
    })
}

//! Signed provider events: verification, then a strategy map from event type
//! to handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use dialsync_core::domain::webhook::{envelope_timestamp, EnvelopeError, WebhookEvent, WebhookEventType};
use dialsync_core::errors::ApplicationError;
use dialsync_core::signature::{SignatureError, SignatureVerifier};

pub mod handlers;

pub use handlers::{default_dispatcher, TranscriptRefresher};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerOutcome {
    Applied,
    /// Redelivery of an event whose effect is already recorded.
    Duplicate,
    /// No local record matches the event.
    NotFound,
    Ignored,
    /// The handler failed; the event is still acknowledged.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DispatchAck {
    pub event_type: String,
    pub resource_id: String,
    pub outcome: HandlerOutcome,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> WebhookEventType;

    async fn handle(
        &self,
        event: &WebhookEvent,
        ctx: &EventContext,
    ) -> Result<HandlerOutcome, ApplicationError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<WebhookEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    /// Never fails: unknown types and handler errors are logged and acknowledged.
    pub async fn dispatch(&self, event: &WebhookEvent, ctx: &EventContext) -> DispatchAck {
        let ack = |outcome| DispatchAck {
            event_type: event.event_type.clone(),
            resource_id: event.resource_id.0.clone(),
            outcome,
        };

        let Some(handler) = event.kind().and_then(|kind| self.handlers.get(&kind)) else {
            info!(
                event_name = "webhook.dispatch.unknown_event",
                correlation_id = %ctx.correlation_id,
                event_type = %event.event_type,
                resource_id = %event.resource_id,
                "no handler registered; acknowledging"
            );
            return ack(HandlerOutcome::Ignored);
        };

        match handler.handle(event, ctx).await {
            Ok(outcome) => {
                debug!(
                    event_name = "webhook.dispatch.handled",
                    correlation_id = %ctx.correlation_id,
                    event_type = %event.event_type,
                    resource_id = %event.resource_id,
                    outcome = ?outcome,
                    "webhook event handled"
                );
                ack(outcome)
            }
            Err(failure) => {
                error!(
                    event_name = "webhook.dispatch.handler_failed",
                    correlation_id = %ctx.correlation_id,
                    event_type = %event.event_type,
                    resource_id = %event.resource_id,
                    error = %failure,
                    "webhook handler failed; acknowledging anyway"
                );
                ack(HandlerOutcome::Failed)
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub struct WebhookIngest {
    verifier: SignatureVerifier,
    dispatcher: EventDispatcher,
}

impl WebhookIngest {
    pub fn new(verifier: SignatureVerifier, dispatcher: EventDispatcher) -> Self {
        Self { verifier, dispatcher }
    }

    /// The timestamp comes from its header when present, otherwise from the
    /// envelope's `timestamp` field.
    pub fn verify(
        &self,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), WebhookError> {
        let signature = signature.ok_or(SignatureError::MissingSignature)?;
        let timestamp = match timestamp {
            Some(header) => header.to_string(),
            None => envelope_timestamp(body).ok_or(SignatureError::MissingTimestamp)?,
        };
        self.verifier.verify(signature, &timestamp, body, now)?;
        Ok(())
    }

    /// Rejects unsigned or stale deliveries before any handler runs.
    pub async fn ingest(
        &self,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &[u8],
        ctx: &EventContext,
    ) -> Result<DispatchAck, WebhookError> {
        if let Err(rejection) = self.verify(signature, timestamp, body, ctx.received_at) {
            warn!(
                event_name = "webhook.ingest.rejected",
                correlation_id = %ctx.correlation_id,
                error = %rejection,
                "webhook failed verification"
            );
            return Err(rejection);
        }

        let event = WebhookEvent::parse(body).map_err(|malformed| {
            warn!(
                event_name = "webhook.ingest.malformed",
                correlation_id = %ctx.correlation_id,
                error = %malformed,
                "verified webhook body is not a valid envelope"
            );
            WebhookError::from(malformed)
        })?;

        Ok(self.dispatcher.dispatch(&event, ctx).await)
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use secrecy::SecretString;

    use dialsync_core::domain::webhook::{WebhookEvent, WebhookEventType};
    use dialsync_core::errors::ApplicationError;
    use dialsync_core::signature::{SignatureError, SignatureVerifier};

    use super::{
        EventContext, EventDispatcher, EventHandler, HandlerOutcome, WebhookError, WebhookIngest,
    };

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        fn event_type(&self) -> WebhookEventType {
            WebhookEventType::CallFailed
        }

        async fn handle(
            &self,
            _event: &WebhookEvent,
            _ctx: &EventContext,
        ) -> Result<HandlerOutcome, ApplicationError> {
            Err(ApplicationError::Persistence("locked".to_string()))
        }
    }

    fn ctx() -> EventContext {
        EventContext {
            correlation_id: "wh-1".to_string(),
            received_at: DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
                .expect("ts")
                .with_timezone(&Utc),
        }
    }

    fn ingest() -> (WebhookIngest, SignatureVerifier) {
        let verifier = SignatureVerifier::new(SecretString::from("whsec-test".to_string()), 300, 30);
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(Failing);
        (WebhookIngest::new(verifier.clone(), dispatcher), verifier)
    }

    #[tokio::test]
    async fn handler_errors_and_unknown_types_are_acknowledged() {
        let (ingest, verifier) = ingest();
        let timestamp = "2026-03-01T09:59:30Z";

        let failing = br#"{"event_type":"call.failed","call_id":"c-1"}"#;
        let signature = verifier.sign(timestamp, failing).expect("sign");
        let ack = ingest
            .ingest(Some(&signature), Some(timestamp), failing, &ctx())
            .await
            .expect("ack");
        assert_eq!(ack.outcome, HandlerOutcome::Failed);

        let unknown = br#"{"event_type":"voice.trained","resource_id":"rv-1"}"#;
        let signature = verifier.sign(timestamp, unknown).expect("sign");
        let ack = ingest
            .ingest(Some(&signature), Some(timestamp), unknown, &ctx())
            .await
            .expect("ack");
        assert_eq!(ack.outcome, HandlerOutcome::Ignored);
    }

    #[tokio::test]
    async fn verification_runs_before_parsing() {
        let (ingest, verifier) = ingest();
        let body = br#"not json"#;

        let unsigned = ingest.ingest(None, Some("2026-03-01T10:00:00Z"), body, &ctx()).await;
        assert!(matches!(
            unsigned,
            Err(WebhookError::Signature(SignatureError::MissingSignature))
        ));

        let stale_ts = "2026-03-01T09:50:00Z";
        let stale_sig = verifier.sign(stale_ts, body).expect("sign");
        let stale = ingest.ingest(Some(&stale_sig), Some(stale_ts), body, &ctx()).await;
        assert!(matches!(stale, Err(WebhookError::Signature(SignatureError::Expired { .. }))));

        let fresh_ts = "2026-03-01T10:00:00Z";
        let fresh_sig = verifier.sign(fresh_ts, body).expect("sign");
        let malformed = ingest.ingest(Some(&fresh_sig), Some(fresh_ts), body, &ctx()).await;
        assert!(matches!(malformed, Err(WebhookError::Envelope(_))));
    }

    #[tokio::test]
    async fn timestamp_falls_back_to_envelope_field() {
        let (ingest, verifier) = ingest();
        let body = br#"{"event_type":"call.queued","call_id":"c-9","timestamp":1772359180}"#;
        let signature = verifier.sign("1772359180", body).expect("sign");

        ingest.verify(Some(&signature), None, body, ctx().received_at).expect("verified");
        assert!(ingest.verify(Some(&signature), None, b"{}", ctx().received_at).is_err());
    }
}

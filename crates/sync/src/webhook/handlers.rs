use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use dialsync_core::domain::call::{CallDetails, CallStatus, CallTransition, TransitionOutcome};
use dialsync_core::domain::credit::BillingPolicy;
use dialsync_core::domain::resource::RemoteId;
use dialsync_core::domain::webhook::{WebhookEvent, WebhookEventType};
use dialsync_core::errors::ApplicationError;
use dialsync_core::retry::RetryExecutor;
use dialsync_db::CallRepository;
use dialsync_provider::RemoteProvider;

use super::{EventContext, EventDispatcher, EventHandler, HandlerOutcome};
use crate::followup::FollowUpRunner;
use crate::repository_error;

/// Fetches post-call data (transcript, analysis) from the provider.
#[derive(Clone)]
pub struct TranscriptRefresher {
    calls: Arc<dyn CallRepository>,
    provider: Arc<dyn RemoteProvider>,
    retry: RetryExecutor,
}

impl TranscriptRefresher {
    pub fn new(
        calls: Arc<dyn CallRepository>,
        provider: Arc<dyn RemoteProvider>,
        retry: RetryExecutor,
    ) -> Self {
        Self { calls, provider, retry }
    }

    /// Returns whether anything new was stored.
    pub async fn refresh(
        &self,
        remote_call_id: &RemoteId,
        at: DateTime<Utc>,
    ) -> Result<bool, ApplicationError> {
        let provider = self.provider.as_ref();
        let details = self
            .retry
            .execute("fetch_call", move |_| provider.fetch_call(remote_call_id))
            .await?;
        match details {
            Some(details) if !details.is_empty() => self
                .calls
                .record_details(remote_call_id, details, at)
                .await
                .map_err(repository_error),
            _ => Ok(false),
        }
    }

    fn schedule(&self, followups: &FollowUpRunner, remote_call_id: &RemoteId, ctx: &EventContext) {
        let refresher = self.clone();
        let remote_call_id = remote_call_id.clone();
        let at = ctx.received_at;
        let correlation_id = ctx.correlation_id.clone();
        followups.spawn("transcript_refresh", ctx.correlation_id.clone(), async move {
            let stored = refresher.refresh(&remote_call_id, at).await?;
            info!(
                event_name = "webhook.followup.transcript_refreshed",
                correlation_id = %correlation_id,
                remote_call_id = %remote_call_id,
                stored,
                "post-call data refreshed"
            );
            Ok(())
        });
    }
}

pub fn default_dispatcher(
    calls: Arc<dyn CallRepository>,
    billing: BillingPolicy,
    transcripts: TranscriptRefresher,
    followups: Arc<FollowUpRunner>,
) -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(CallQueuedHandler { calls: calls.clone() });
    dispatcher.register(CallProgressHandler {
        calls: calls.clone(),
        event_type: WebhookEventType::CallRinging,
        target: CallStatus::Ringing,
    });
    dispatcher.register(CallProgressHandler {
        calls: calls.clone(),
        event_type: WebhookEventType::CallStarted,
        target: CallStatus::InProgress,
    });
    dispatcher.register(CallEndedHandler {
        calls: calls.clone(),
        billing,
        transcripts: transcripts.clone(),
        followups: followups.clone(),
    });
    dispatcher.register(CallFailedHandler { calls: calls.clone(), transcripts, followups });
    dispatcher.register(CallAnalyzedHandler { calls });
    dispatcher
}

fn occurred_at(event: &WebhookEvent, ctx: &EventContext) -> DateTime<Utc> {
    event.timestamp.unwrap_or(ctx.received_at)
}

fn log_unknown_call(event: &WebhookEvent, ctx: &EventContext) -> HandlerOutcome {
    warn!(
        event_name = "webhook.call.not_found",
        correlation_id = %ctx.correlation_id,
        event_type = %event.event_type,
        remote_call_id = %event.resource_id,
        "event for a call that is not recorded locally"
    );
    HandlerOutcome::NotFound
}

async fn apply(
    calls: &dyn CallRepository,
    event: &WebhookEvent,
    ctx: &EventContext,
    transition: CallTransition,
) -> Result<TransitionOutcome, ApplicationError> {
    let target = transition.to;
    let outcome = calls
        .transition(&event.resource_id, transition)
        .await
        .map_err(repository_error)?;

    match &outcome {
        TransitionOutcome::Applied { previous, record } => info!(
            event_name = "webhook.call.transitioned",
            correlation_id = %ctx.correlation_id,
            tenant_id = %record.tenant_id,
            call_id = %record.id.0,
            remote_call_id = %event.resource_id,
            from = previous.as_str(),
            to = target.as_str(),
            "call status advanced"
        ),
        TransitionOutcome::Unchanged { current } => info!(
            event_name = "webhook.call.transition_skipped",
            correlation_id = %ctx.correlation_id,
            tenant_id = %current.tenant_id,
            remote_call_id = %event.resource_id,
            current = current.status.as_str(),
            requested = target.as_str(),
            "duplicate or out-of-order event"
        ),
        TransitionOutcome::NotFound => {}
    }
    Ok(outcome)
}

/// Calls are recorded as queued when launched, so this only confirms the record.
struct CallQueuedHandler {
    calls: Arc<dyn CallRepository>,
}

#[async_trait]
impl EventHandler for CallQueuedHandler {
    fn event_type(&self) -> WebhookEventType {
        WebhookEventType::CallQueued
    }

    async fn handle(
        &self,
        event: &WebhookEvent,
        ctx: &EventContext,
    ) -> Result<HandlerOutcome, ApplicationError> {
        let found =
            self.calls.find_by_remote_id(&event.resource_id).await.map_err(repository_error)?;
        Ok(match found {
            Some(_) => HandlerOutcome::Ignored,
            None => log_unknown_call(event, ctx),
        })
    }
}

struct CallProgressHandler {
    calls: Arc<dyn CallRepository>,
    event_type: WebhookEventType,
    target: CallStatus,
}

#[async_trait]
impl EventHandler for CallProgressHandler {
    fn event_type(&self) -> WebhookEventType {
        self.event_type
    }

    async fn handle(
        &self,
        event: &WebhookEvent,
        ctx: &EventContext,
    ) -> Result<HandlerOutcome, ApplicationError> {
        let transition = CallTransition::to(self.target, occurred_at(event, ctx));
        Ok(match apply(self.calls.as_ref(), event, ctx, transition).await? {
            TransitionOutcome::Applied { .. } => HandlerOutcome::Applied,
            TransitionOutcome::Unchanged { .. } => HandlerOutcome::Duplicate,
            TransitionOutcome::NotFound => log_unknown_call(event, ctx),
        })
    }
}

/// Completes the call and debits credits in the same store step. A repeated
/// delivery only refreshes the transcript.
struct CallEndedHandler {
    calls: Arc<dyn CallRepository>,
    billing: BillingPolicy,
    transcripts: TranscriptRefresher,
    followups: Arc<FollowUpRunner>,
}

#[async_trait]
impl EventHandler for CallEndedHandler {
    fn event_type(&self) -> WebhookEventType {
        WebhookEventType::CallEnded
    }

    async fn handle(
        &self,
        event: &WebhookEvent,
        ctx: &EventContext,
    ) -> Result<HandlerOutcome, ApplicationError> {
        let duration_secs = event.duration_secs();
        let transition = CallTransition {
            duration_secs,
            debit: Some(self.billing.debit_for(duration_secs.unwrap_or(0))),
            ..CallTransition::to(CallStatus::Completed, occurred_at(event, ctx))
        };

        Ok(match apply(self.calls.as_ref(), event, ctx, transition).await? {
            TransitionOutcome::Applied { .. } => {
                match event.transcript() {
                    Some(transcript) => {
                        let details =
                            CallDetails { transcript: Some(transcript), analysis: event.analysis() };
                        self.calls
                            .record_details(&event.resource_id, details, ctx.received_at)
                            .await
                            .map_err(repository_error)?;
                    }
                    None => self.transcripts.schedule(&self.followups, &event.resource_id, ctx),
                }
                HandlerOutcome::Applied
            }
            TransitionOutcome::Unchanged { current } => {
                if current.status.is_terminal() && current.transcript.is_none() {
                    self.transcripts.schedule(&self.followups, &event.resource_id, ctx);
                }
                HandlerOutcome::Duplicate
            }
            TransitionOutcome::NotFound => log_unknown_call(event, ctx),
        })
    }
}

struct CallFailedHandler {
    calls: Arc<dyn CallRepository>,
    transcripts: TranscriptRefresher,
    followups: Arc<FollowUpRunner>,
}

#[async_trait]
impl EventHandler for CallFailedHandler {
    fn event_type(&self) -> WebhookEventType {
        WebhookEventType::CallFailed
    }

    async fn handle(
        &self,
        event: &WebhookEvent,
        ctx: &EventContext,
    ) -> Result<HandlerOutcome, ApplicationError> {
        let transition = CallTransition {
            failure_reason: Some(event.failure_reason().unwrap_or_else(|| "unknown".to_string())),
            duration_secs: event.duration_secs(),
            ..CallTransition::to(CallStatus::Failed, occurred_at(event, ctx))
        };

        Ok(match apply(self.calls.as_ref(), event, ctx, transition).await? {
            TransitionOutcome::Applied { .. } => HandlerOutcome::Applied,
            TransitionOutcome::Unchanged { current } => {
                if current.status.is_terminal() && current.transcript.is_none() {
                    self.transcripts.schedule(&self.followups, &event.resource_id, ctx);
                }
                HandlerOutcome::Duplicate
            }
            TransitionOutcome::NotFound => log_unknown_call(event, ctx),
        })
    }
}

/// Stores analysis results; never changes status.
struct CallAnalyzedHandler {
    calls: Arc<dyn CallRepository>,
}

#[async_trait]
impl EventHandler for CallAnalyzedHandler {
    fn event_type(&self) -> WebhookEventType {
        WebhookEventType::CallAnalyzed
    }

    async fn handle(
        &self,
        event: &WebhookEvent,
        ctx: &EventContext,
    ) -> Result<HandlerOutcome, ApplicationError> {
        let details = CallDetails { transcript: event.transcript(), analysis: event.analysis() };
        if details.is_empty() {
            return Ok(HandlerOutcome::Ignored);
        }

        let stored = self
            .calls
            .record_details(&event.resource_id, details, ctx.received_at)
            .await
            .map_err(repository_error)?;
        Ok(if stored { HandlerOutcome::Applied } else { log_unknown_call(event, ctx) })
    }
}

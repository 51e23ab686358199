use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use dialsync_core::domain::call::{CallId, CallRecord, CallStatus};
use dialsync_core::domain::resource::{RemoteId, ResourceId, ResourceKind, SyncStatus};
use dialsync_core::domain::TenantId;
use dialsync_core::errors::ApplicationError;
use dialsync_core::retry::RetryExecutor;
use dialsync_db::{CallRepository, ResourceRepository};
use dialsync_provider::{CallRequest, PayloadMapper, RemoteProvider};

use crate::{repository_error, OperationContext};

pub const DEFAULT_LIST_LIMIT: u32 = 100;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StartCall {
    pub agent_id: ResourceId,
    pub to_number: String,
    #[serde(default)]
    pub batch_id: Option<ResourceId>,
}

pub struct CallLauncher {
    resources: Arc<dyn ResourceRepository>,
    calls: Arc<dyn CallRepository>,
    provider: Arc<dyn RemoteProvider>,
    mapper: Arc<dyn PayloadMapper>,
    retry: RetryExecutor,
}

impl CallLauncher {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        calls: Arc<dyn CallRepository>,
        provider: Arc<dyn RemoteProvider>,
        mapper: Arc<dyn PayloadMapper>,
        retry: RetryExecutor,
    ) -> Self {
        Self { resources, calls, provider, mapper, retry }
    }

    /// Places a call through an active agent and records it as `queued`.
    pub async fn start_call(
        &self,
        ctx: &OperationContext,
        request: StartCall,
    ) -> Result<CallRecord, ApplicationError> {
        let to_number = validate_number(&request.to_number)?;
        let agent_remote_id =
            self.synced_remote_id(&ctx.tenant_id, ResourceKind::Agent, &request.agent_id).await?;
        let batch_remote_id = match &request.batch_id {
            Some(batch_id) => {
                Some(self.synced_remote_id(&ctx.tenant_id, ResourceKind::Batch, batch_id).await?)
            }
            None => None,
        };

        let call_id = CallId(format!("call_{}", Uuid::new_v4().simple()));
        let payload = self.mapper.build_call(CallRequest {
            tenant_id: &ctx.tenant_id,
            call_id: &call_id,
            agent_remote_id: &agent_remote_id,
            batch_remote_id: batch_remote_id.as_ref(),
            to_number: &to_number,
        });

        let provider = self.provider.as_ref();
        let payload = &payload;
        let remote = self
            .retry
            .execute("create_call", move |_| provider.create_call(payload))
            .await
            .map_err(|error| {
                warn!(
                    event_name = "calls.start.remote_failed",
                    correlation_id = %ctx.correlation_id,
                    tenant_id = %ctx.tenant_id,
                    agent_id = %request.agent_id,
                    error = %error,
                    "provider did not accept the call"
                );
                ApplicationError::from(error)
            })?;

        let record = CallRecord {
            id: call_id,
            tenant_id: ctx.tenant_id.clone(),
            remote_call_id: remote.remote_call_id.clone(),
            agent_id: request.agent_id.clone(),
            batch_id: request.batch_id.clone(),
            to_number,
            status: CallStatus::Queued,
            started_at: None,
            ended_at: None,
            duration_secs: None,
            failure_reason: None,
            transcript: None,
            analysis: None,
            created_at: ctx.now,
            updated_at: ctx.now,
        };
        if let Err(store_error) = self.calls.insert(record.clone()).await {
            error!(
                event_name = "calls.start.unrecorded",
                correlation_id = %ctx.correlation_id,
                tenant_id = %ctx.tenant_id,
                remote_call_id = %remote.remote_call_id,
                error = %store_error,
                "call was placed but could not be recorded locally"
            );
            return Err(repository_error(store_error));
        }

        info!(
            event_name = "calls.start.queued",
            correlation_id = %ctx.correlation_id,
            tenant_id = %ctx.tenant_id,
            call_id = %record.id.0,
            remote_call_id = %record.remote_call_id,
            "call queued with provider"
        );
        Ok(record)
    }

    pub async fn list(
        &self,
        tenant: &TenantId,
        limit: Option<u32>,
    ) -> Result<Vec<CallRecord>, ApplicationError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 1_000);
        self.calls.list(tenant, limit).await.map_err(repository_error)
    }

    async fn synced_remote_id(
        &self,
        tenant: &TenantId,
        kind: ResourceKind,
        id: &ResourceId,
    ) -> Result<RemoteId, ApplicationError> {
        let resource = self
            .resources
            .find(tenant, id)
            .await
            .map_err(repository_error)?
            .filter(|resource| resource.kind == kind && resource.is_visible())
            .ok_or_else(|| ApplicationError::not_found(kind.as_str(), id.0.clone()))?;

        match (resource.status, resource.remote_id) {
            (SyncStatus::Active, Some(remote_id)) => Ok(remote_id),
            (status, _) => Err(ApplicationError::Validation(format!(
                "{} `{id}` is {} and cannot place calls",
                kind.as_str(),
                status.as_str()
            ))),
        }
    }
}

fn validate_number(raw: &str) -> Result<String, ApplicationError> {
    let trimmed = raw.trim();
    let digits = trimmed.chars().filter(char::is_ascii_digit).count();
    let allowed = trimmed
        .chars()
        .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | '-' | ' ' | '(' | ')'));
    if !allowed || !(7..=15).contains(&digits) {
        return Err(ApplicationError::Validation(format!(
            "`{trimmed}` is not a dialable phone number"
        )));
    }
    Ok(trimmed.to_string())
}

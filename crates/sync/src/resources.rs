//! Remote-first create/update/delete saga for agents, voices and batches.
//!
//! The provider is always written before the local mirror. A create leaves a
//! short-lived `creating` row that readers never see; it is removed when the
//! provider rejects the request and promoted to `active` once the provider
//! has answered with an identifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use dialsync_core::domain::resource::{
    RemoteId, RemoteObject, ResourceId, ResourceKind, ResourceSpec, SyncStatus, SyncedResource,
};
use dialsync_core::domain::TenantId;
use dialsync_core::drift::{corresponds, reconcile, DriftAction, DriftReport};
use dialsync_core::errors::{ApplicationError, ProviderError};
use dialsync_core::normalize::normalize_name;
use dialsync_core::retry::RetryExecutor;
use dialsync_db::ResourceRepository;
use dialsync_provider::{PayloadMapper, PayloadRefs, RemoteProvider};

use crate::{repository_error, OperationContext};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeleteAck {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// False when the provider copy could not be removed and is left for the
    /// drift sweep.
    pub remote_deleted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub report: DriftReport,
    pub applied: bool,
}

/// Serializes saga steps per resource while leaving different resources free
/// to proceed in parallel.
#[derive(Default)]
struct ResourceLocks {
    inner: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl ResourceLocks {
    fn handle(&self, tenant: &TenantId, id: &ResourceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry((tenant.0.clone(), id.0.clone())).or_default().clone()
    }
}

pub struct ResourceSynchronizer {
    resources: Arc<dyn ResourceRepository>,
    provider: Arc<dyn RemoteProvider>,
    mapper: Arc<dyn PayloadMapper>,
    retry: RetryExecutor,
    locks: ResourceLocks,
}

impl ResourceSynchronizer {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        provider: Arc<dyn RemoteProvider>,
        mapper: Arc<dyn PayloadMapper>,
        retry: RetryExecutor,
    ) -> Self {
        Self { resources, provider, mapper, retry, locks: ResourceLocks::default() }
    }

    pub async fn create(
        &self,
        ctx: &OperationContext,
        mut spec: ResourceSpec,
    ) -> Result<SyncedResource, ApplicationError> {
        self.normalize(ctx, &mut spec);
        let reference = self.validate(&ctx.tenant_id, &spec).await?;
        self.ensure_name_available(&ctx.tenant_id, &spec, None).await?;

        let kind = spec.kind();
        let pending = SyncedResource {
            tenant_id: ctx.tenant_id.clone(),
            id: new_resource_id(kind),
            kind,
            name: spec.name().to_string(),
            remote_id: None,
            status: SyncStatus::Creating,
            spec,
            last_synced_at: None,
            created_at: ctx.now,
            updated_at: ctx.now,
        };
        self.resources.insert(pending.clone()).await.map_err(repository_error)?;

        let remote = match self.push_create(ctx, &pending, reference.as_ref()).await {
            Ok(remote) => remote,
            Err(error) => {
                self.discard(ctx, &pending).await;
                warn!(
                    event_name = "sync.create.remote_failed",
                    correlation_id = %ctx.correlation_id,
                    tenant_id = %ctx.tenant_id,
                    resource_id = %pending.id,
                    kind = kind.as_str(),
                    attempts = error.attempts,
                    error = %error,
                    "provider rejected create; nothing was kept locally"
                );
                return Err(error.into());
            }
        };

        let active = SyncedResource {
            remote_id: Some(remote.remote_id.clone()),
            status: SyncStatus::Active,
            last_synced_at: Some(ctx.now),
            ..pending.clone()
        };
        if let Err(save_error) = self.resources.save(active.clone()).await {
            self.compensate(ctx, kind, &remote.remote_id).await;
            self.discard(ctx, &pending).await;
            return Err(repository_error(save_error));
        }

        info!(
            event_name = "sync.create.committed",
            correlation_id = %ctx.correlation_id,
            tenant_id = %ctx.tenant_id,
            resource_id = %active.id,
            remote_id = %remote.remote_id,
            kind = kind.as_str(),
            "resource created on provider and mirrored locally"
        );
        Ok(active)
    }

    /// Stores a spec without contacting the provider. A later update promotes it.
    pub async fn save_draft(
        &self,
        ctx: &OperationContext,
        mut spec: ResourceSpec,
    ) -> Result<SyncedResource, ApplicationError> {
        self.normalize(ctx, &mut spec);
        require_name(&spec)?;
        self.ensure_name_available(&ctx.tenant_id, &spec, None).await?;

        let kind = spec.kind();
        let draft = SyncedResource {
            tenant_id: ctx.tenant_id.clone(),
            id: new_resource_id(kind),
            kind,
            name: spec.name().to_string(),
            remote_id: None,
            status: SyncStatus::Draft,
            spec,
            last_synced_at: None,
            created_at: ctx.now,
            updated_at: ctx.now,
        };
        self.resources.insert(draft.clone()).await.map_err(repository_error)?;

        info!(
            event_name = "sync.draft.saved",
            correlation_id = %ctx.correlation_id,
            tenant_id = %ctx.tenant_id,
            resource_id = %draft.id,
            kind = kind.as_str(),
            "draft stored without provider sync"
        );
        Ok(draft)
    }

    pub async fn update(
        &self,
        ctx: &OperationContext,
        id: &ResourceId,
        mut spec: ResourceSpec,
    ) -> Result<SyncedResource, ApplicationError> {
        let lock = self.locks.handle(&ctx.tenant_id, id);
        let _guard = lock.lock().await;

        let current = self.visible(&ctx.tenant_id, id).await?;
        if current.kind != spec.kind() {
            return Err(ApplicationError::Validation(format!(
                "resource `{id}` is a {}, not a {}",
                current.kind.as_str(),
                spec.kind().as_str()
            )));
        }

        self.normalize(ctx, &mut spec);
        let reference = self.validate(&ctx.tenant_id, &spec).await?;
        self.ensure_name_available(&ctx.tenant_id, &spec, Some(id)).await?;

        let Some(remote_id) = current.remote_id.clone() else {
            return self.promote(ctx, current, spec, reference).await;
        };

        let payload = self.mapper.build(
            &spec,
            PayloadRefs {
                tenant_id: &ctx.tenant_id,
                local_id: &current.id,
                reference: reference.as_ref(),
            },
        );
        let provider = self.provider.as_ref();
        let kind = current.kind;
        let payload_ref = &payload;
        let remote_ref = &remote_id;
        self.retry
            .execute("update_resource", move |_| {
                provider.update_resource(kind, remote_ref, payload_ref)
            })
            .await
            .map_err(|error| {
                warn!(
                    event_name = "sync.update.remote_failed",
                    correlation_id = %ctx.correlation_id,
                    tenant_id = %ctx.tenant_id,
                    resource_id = %current.id,
                    remote_id = %remote_id,
                    error = %error,
                    "provider rejected update; local mirror unchanged"
                );
                ApplicationError::from(error)
            })?;

        let updated = SyncedResource {
            name: spec.name().to_string(),
            spec,
            status: SyncStatus::Active,
            last_synced_at: Some(ctx.now),
            updated_at: ctx.now,
            ..current.clone()
        };
        if let Err(save_error) = self.resources.save(updated.clone()).await {
            self.restore_remote(ctx, &current, &remote_id).await;
            return Err(repository_error(save_error));
        }

        info!(
            event_name = "sync.update.committed",
            correlation_id = %ctx.correlation_id,
            tenant_id = %ctx.tenant_id,
            resource_id = %updated.id,
            remote_id = %remote_id,
            "resource updated on provider and mirrored locally"
        );
        Ok(updated)
    }

    /// Local deletion always proceeds; provider failures are only logged.
    pub async fn delete(
        &self,
        ctx: &OperationContext,
        id: &ResourceId,
    ) -> Result<DeleteAck, ApplicationError> {
        let lock = self.locks.handle(&ctx.tenant_id, id);
        let _guard = lock.lock().await;

        let current = self
            .resources
            .find(&ctx.tenant_id, id)
            .await
            .map_err(repository_error)?
            .filter(|resource| resource.status != SyncStatus::Creating)
            .ok_or_else(|| ApplicationError::not_found("resource", id.0.clone()))?;

        if current.status == SyncStatus::Deleted {
            return Ok(DeleteAck { id: current.id, kind: current.kind, remote_deleted: false });
        }

        let remote_deleted = match &current.remote_id {
            Some(remote_id) => {
                let provider = self.provider.as_ref();
                let kind = current.kind;
                match self
                    .retry
                    .execute("delete_resource", move |_| provider.delete_resource(kind, remote_id))
                    .await
                {
                    Ok(()) => true,
                    Err(error) => {
                        warn!(
                            event_name = "sync.delete.remote_failed",
                            correlation_id = %ctx.correlation_id,
                            tenant_id = %ctx.tenant_id,
                            resource_id = %current.id,
                            remote_id = %remote_id,
                            error = %error,
                            "provider delete failed; deleting locally anyway"
                        );
                        false
                    }
                }
            }
            None => false,
        };

        let deleted =
            SyncedResource { status: SyncStatus::Deleted, updated_at: ctx.now, ..current };
        self.resources.save(deleted.clone()).await.map_err(repository_error)?;

        info!(
            event_name = "sync.delete.committed",
            correlation_id = %ctx.correlation_id,
            tenant_id = %ctx.tenant_id,
            resource_id = %deleted.id,
            remote_deleted,
            "resource deleted locally"
        );
        Ok(DeleteAck { id: deleted.id, kind: deleted.kind, remote_deleted })
    }

    pub async fn get(
        &self,
        tenant: &TenantId,
        id: &ResourceId,
    ) -> Result<SyncedResource, ApplicationError> {
        self.visible(tenant, id).await
    }

    pub async fn list(
        &self,
        tenant: &TenantId,
        kind: Option<ResourceKind>,
    ) -> Result<Vec<SyncedResource>, ApplicationError> {
        let rows = self.resources.list(tenant, kind).await.map_err(repository_error)?;
        Ok(rows.into_iter().filter(SyncedResource::is_visible).collect())
    }

    /// Compares the mirror row with the provider copy. With `apply`, safe
    /// corrections are written back; everything else is only reported.
    pub async fn refresh(
        &self,
        ctx: &OperationContext,
        id: &ResourceId,
        apply: bool,
    ) -> Result<RefreshOutcome, ApplicationError> {
        let lock = self.locks.handle(&ctx.tenant_id, id);
        let _guard = lock.lock().await;

        let local = self
            .resources
            .find(&ctx.tenant_id, id)
            .await
            .map_err(repository_error)?
            .filter(|resource| resource.status != SyncStatus::Creating)
            .ok_or_else(|| ApplicationError::not_found("resource", id.0.clone()))?;

        let remote = self.fetch_remote(&local).await?;
        let report = reconcile(&local, remote.as_ref(), local.kind);

        if report.has_drift {
            info!(
                event_name = "sync.refresh.drift_detected",
                correlation_id = %ctx.correlation_id,
                tenant_id = %ctx.tenant_id,
                resource_id = %local.id,
                details = ?report.details,
                "local mirror differs from provider"
            );
        }

        let applied = apply
            && report.recommended_action.is_safe_to_apply()
            && self.apply_drift(ctx, local, &report.recommended_action).await?;
        Ok(RefreshOutcome { report, applied })
    }

    async fn fetch_remote(
        &self,
        local: &SyncedResource,
    ) -> Result<Option<RemoteObject>, ApplicationError> {
        let provider = self.provider.as_ref();
        let kind = local.kind;
        let found = match &local.remote_id {
            Some(remote_id) => {
                self.retry
                    .execute("fetch_resource", move |_| provider.fetch_resource(kind, remote_id))
                    .await
            }
            None => {
                // Name matches from other tenants or other local rows are dropped.
                let name = local.name.as_str();
                self.retry
                    .execute("find_resources", move |_| provider.find_resources(kind, name))
                    .await
                    .map(|matches| matches.into_iter().find(|object| corresponds(local, object)))
            }
        };

        match found {
            Ok(remote) => Ok(remote),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    async fn apply_drift(
        &self,
        ctx: &OperationContext,
        local: SyncedResource,
        action: &DriftAction,
    ) -> Result<bool, ApplicationError> {
        let corrected = match action {
            DriftAction::UpdateLocalStatus { to } => SyncedResource { status: *to, ..local },
            DriftAction::LinkRemoteId { remote_id } => SyncedResource {
                remote_id: Some(remote_id.clone()),
                status: SyncStatus::Active,
                ..local
            },
            DriftAction::MarkLocalDeleted => SyncedResource { status: SyncStatus::Deleted, ..local },
            _ => return Ok(false),
        };
        if !corrected.remote_link_is_consistent() {
            warn!(
                event_name = "sync.refresh.correction_skipped",
                correlation_id = %ctx.correlation_id,
                tenant_id = %ctx.tenant_id,
                resource_id = %corrected.id,
                status = corrected.status.as_str(),
                "correction would leave the remote link inconsistent"
            );
            return Ok(false);
        }

        let corrected =
            SyncedResource { last_synced_at: Some(ctx.now), updated_at: ctx.now, ..corrected };
        self.resources.save(corrected.clone()).await.map_err(repository_error)?;

        info!(
            event_name = "sync.refresh.applied",
            correlation_id = %ctx.correlation_id,
            tenant_id = %ctx.tenant_id,
            resource_id = %corrected.id,
            status = corrected.status.as_str(),
            "drift correction applied"
        );
        Ok(true)
    }

    /// Syncs a draft (or previously failed) row for the first time. On
    /// failure the row keeps its prior state.
    async fn promote(
        &self,
        ctx: &OperationContext,
        current: SyncedResource,
        spec: ResourceSpec,
        reference: Option<RemoteId>,
    ) -> Result<SyncedResource, ApplicationError> {
        let candidate = SyncedResource { name: spec.name().to_string(), spec, ..current };
        let remote = self.push_create(ctx, &candidate, reference.as_ref()).await.map_err(|error| {
            warn!(
                event_name = "sync.promote.remote_failed",
                correlation_id = %ctx.correlation_id,
                tenant_id = %ctx.tenant_id,
                resource_id = %candidate.id,
                error = %error,
                "provider rejected promotion; local record unchanged"
            );
            ApplicationError::from(error)
        })?;

        let active = SyncedResource {
            remote_id: Some(remote.remote_id.clone()),
            status: SyncStatus::Active,
            last_synced_at: Some(ctx.now),
            updated_at: ctx.now,
            ..candidate
        };
        if let Err(save_error) = self.resources.save(active.clone()).await {
            self.compensate(ctx, active.kind, &remote.remote_id).await;
            return Err(repository_error(save_error));
        }

        info!(
            event_name = "sync.promote.committed",
            correlation_id = %ctx.correlation_id,
            tenant_id = %ctx.tenant_id,
            resource_id = %active.id,
            remote_id = %remote.remote_id,
            "unsynced resource created on provider"
        );
        Ok(active)
    }

    async fn push_create(
        &self,
        ctx: &OperationContext,
        resource: &SyncedResource,
        reference: Option<&RemoteId>,
    ) -> Result<RemoteObject, ProviderError> {
        let payload = self.mapper.build(
            &resource.spec,
            PayloadRefs { tenant_id: &ctx.tenant_id, local_id: &resource.id, reference },
        );
        let provider = self.provider.as_ref();
        let kind = resource.kind;
        let payload = &payload;
        self.retry
            .execute("create_resource", move |_| provider.create_resource(kind, payload))
            .await
    }

    /// Undoes a provider create whose local commit failed.
    async fn compensate(&self, ctx: &OperationContext, kind: ResourceKind, remote_id: &RemoteId) {
        let provider = self.provider.as_ref();
        match self
            .retry
            .execute("compensate_create", move |_| provider.delete_resource(kind, remote_id))
            .await
        {
            Ok(()) => warn!(
                event_name = "sync.create.compensated",
                correlation_id = %ctx.correlation_id,
                tenant_id = %ctx.tenant_id,
                remote_id = %remote_id,
                "local commit failed; provider copy removed"
            ),
            Err(error) => error!(
                event_name = "sync.create.orphaned_remote",
                correlation_id = %ctx.correlation_id,
                tenant_id = %ctx.tenant_id,
                kind = kind.as_str(),
                remote_id = %remote_id,
                error = %error,
                "local commit and compensation both failed; remote object is orphaned"
            ),
        }
    }

    /// Pushes the previous spec back after a local commit failure on update.
    async fn restore_remote(
        &self,
        ctx: &OperationContext,
        previous: &SyncedResource,
        remote_id: &RemoteId,
    ) {
        let reference = self.validate(&ctx.tenant_id, &previous.spec).await.ok().flatten();
        let payload = self.mapper.build(
            &previous.spec,
            PayloadRefs {
                tenant_id: &ctx.tenant_id,
                local_id: &previous.id,
                reference: reference.as_ref(),
            },
        );
        let provider = self.provider.as_ref();
        let kind = previous.kind;
        let payload = &payload;
        if let Err(error) = self
            .retry
            .execute("restore_update", move |_| provider.update_resource(kind, remote_id, payload))
            .await
        {
            error!(
                event_name = "sync.update.restore_failed",
                correlation_id = %ctx.correlation_id,
                tenant_id = %ctx.tenant_id,
                resource_id = %previous.id,
                remote_id = %remote_id,
                error = %error,
                "provider keeps the new spec while the mirror keeps the old one"
            );
        }
    }

    async fn discard(&self, ctx: &OperationContext, pending: &SyncedResource) {
        if let Err(error) = self.resources.remove(&pending.tenant_id, &pending.id).await {
            error!(
                event_name = "sync.create.cleanup_failed",
                correlation_id = %ctx.correlation_id,
                tenant_id = %ctx.tenant_id,
                resource_id = %pending.id,
                error = %error,
                "temporary creating row could not be removed"
            );
        }
    }

    fn normalize(&self, ctx: &OperationContext, spec: &mut ResourceSpec) {
        let normalized = normalize_name(spec.name());
        if normalized.changed {
            info!(
                event_name = "sync.name.normalized",
                correlation_id = %ctx.correlation_id,
                tenant_id = %ctx.tenant_id,
                original = spec.name(),
                normalized = %normalized.value,
                "resource name adjusted to provider constraints"
            );
            spec.set_name(normalized.value);
        }
    }

    /// Checks that the resource spec can be sent to the provider and resolves the
    /// remote id of the resource it references.
    async fn validate(
        &self,
        tenant: &TenantId,
        spec: &ResourceSpec,
    ) -> Result<Option<RemoteId>, ApplicationError> {
        require_name(spec)?;
        if let ResourceSpec::Batch(batch) = spec {
            if batch.agent_id.0.trim().is_empty() {
                return Err(ApplicationError::Validation("batch requires an agent".to_string()));
            }
            if batch.recipients.iter().all(|recipient| recipient.trim().is_empty()) {
                return Err(ApplicationError::Validation(
                    "batch requires at least one recipient".to_string(),
                ));
            }
        }

        let Some((kind, reference_id)) = spec.reference() else {
            return Ok(None);
        };
        let referenced = self
            .resources
            .find(tenant, reference_id)
            .await
            .map_err(repository_error)?
            .filter(SyncedResource::is_live)
            .ok_or_else(|| {
                ApplicationError::Validation(format!(
                    "referenced {} `{reference_id}` does not exist",
                    kind.as_str()
                ))
            })?;
        if referenced.kind != kind {
            return Err(ApplicationError::Validation(format!(
                "`{reference_id}` is a {}, expected a {}",
                referenced.kind.as_str(),
                kind.as_str()
            )));
        }
        match (&referenced.remote_id, referenced.status) {
            (Some(remote_id), SyncStatus::Active) => Ok(Some(remote_id.clone())),
            _ => Err(ApplicationError::Validation(format!(
                "referenced {} `{reference_id}` has not been synced to the provider",
                kind.as_str()
            ))),
        }
    }

    async fn ensure_name_available(
        &self,
        tenant: &TenantId,
        spec: &ResourceSpec,
        current: Option<&ResourceId>,
    ) -> Result<(), ApplicationError> {
        let existing = self
            .resources
            .find_by_name(tenant, spec.kind(), spec.name())
            .await
            .map_err(repository_error)?;
        match existing {
            Some(other) if Some(&other.id) != current => Err(ApplicationError::Conflict(format!(
                "a {} named `{}` already exists",
                spec.kind().as_str(),
                spec.name()
            ))),
            _ => Ok(()),
        }
    }

    async fn visible(
        &self,
        tenant: &TenantId,
        id: &ResourceId,
    ) -> Result<SyncedResource, ApplicationError> {
        self.resources
            .find(tenant, id)
            .await
            .map_err(repository_error)?
            .filter(SyncedResource::is_visible)
            .ok_or_else(|| ApplicationError::not_found("resource", id.0.clone()))
    }
}

fn require_name(spec: &ResourceSpec) -> Result<(), ApplicationError> {
    if spec.name().trim().is_empty() {
        return Err(ApplicationError::Validation(format!(
            "{} name must not be empty",
            spec.kind().as_str()
        )));
    }
    Ok(())
}

fn new_resource_id(kind: ResourceKind) -> ResourceId {
    ResourceId(format!("{}_{}", kind.id_prefix(), Uuid::new_v4().simple()))
}

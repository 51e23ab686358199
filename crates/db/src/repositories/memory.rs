use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use dialsync_core::domain::call::{
    BatchProgress, CallDetails, CallRecord, CallStatus, CallTransition, TransitionOutcome,
};
use dialsync_core::domain::credit::CreditLedgerEntry;
use dialsync_core::domain::idempotency::{IdempotencyKey, IdempotencyRecord, InsertOutcome};
use dialsync_core::domain::rate_limit::WindowHit;
use dialsync_core::domain::resource::{RemoteId, ResourceId, ResourceKind, SyncedResource};
use dialsync_core::domain::TenantId;
use dialsync_core::normalize::name_key;

use super::{
    CallRepository, CreditLedgerRepository, IdempotencyRepository, RateLimitRepository,
    RepositoryError, ResourceRepository,
};

type ResourceKey = (String, String);

#[derive(Default)]
pub struct InMemoryResourceRepository {
    resources: RwLock<HashMap<ResourceKey, SyncedResource>>,
}

fn resource_key(tenant: &TenantId, id: &ResourceId) -> ResourceKey {
    (tenant.0.clone(), id.0.clone())
}

fn name_taken(
    resources: &HashMap<ResourceKey, SyncedResource>,
    candidate: &SyncedResource,
) -> bool {
    candidate.is_live()
        && resources.values().any(|existing| {
            existing.id != candidate.id
                && existing.tenant_id == candidate.tenant_id
                && existing.kind == candidate.kind
                && existing.is_live()
                && name_key(&existing.name) == name_key(&candidate.name)
        })
}

fn name_conflict(resource: &SyncedResource) -> RepositoryError {
    RepositoryError::Conflict(format!(
        "{} `{}` already exists for tenant `{}`",
        resource.kind.as_str(),
        resource.name,
        resource.tenant_id
    ))
}

#[async_trait::async_trait]
impl ResourceRepository for InMemoryResourceRepository {
    async fn find(
        &self,
        tenant: &TenantId,
        id: &ResourceId,
    ) -> Result<Option<SyncedResource>, RepositoryError> {
        let resources = self.resources.read().await;
        Ok(resources.get(&resource_key(tenant, id)).cloned())
    }

    async fn find_by_remote_id(
        &self,
        tenant: &TenantId,
        remote_id: &RemoteId,
    ) -> Result<Option<SyncedResource>, RepositoryError> {
        let resources = self.resources.read().await;
        Ok(resources
            .values()
            .filter(|resource| {
                &resource.tenant_id == tenant && resource.remote_id.as_ref() == Some(remote_id)
            })
            .max_by_key(|resource| resource.updated_at)
            .cloned())
    }

    async fn find_by_name(
        &self,
        tenant: &TenantId,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Option<SyncedResource>, RepositoryError> {
        let wanted = name_key(name);
        let resources = self.resources.read().await;
        Ok(resources
            .values()
            .find(|resource| {
                &resource.tenant_id == tenant
                    && resource.kind == kind
                    && resource.is_live()
                    && name_key(&resource.name) == wanted
            })
            .cloned())
    }

    async fn list(
        &self,
        tenant: &TenantId,
        kind: Option<ResourceKind>,
    ) -> Result<Vec<SyncedResource>, RepositoryError> {
        let resources = self.resources.read().await;
        let mut listed: Vec<SyncedResource> = resources
            .values()
            .filter(|resource| {
                &resource.tenant_id == tenant && kind.map_or(true, |kind| resource.kind == kind)
            })
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(listed)
    }

    async fn insert(&self, resource: SyncedResource) -> Result<(), RepositoryError> {
        let mut resources = self.resources.write().await;
        let key = resource_key(&resource.tenant_id, &resource.id);
        if resources.contains_key(&key) || name_taken(&resources, &resource) {
            return Err(name_conflict(&resource));
        }
        resources.insert(key, resource);
        Ok(())
    }

    async fn save(&self, resource: SyncedResource) -> Result<(), RepositoryError> {
        let mut resources = self.resources.write().await;
        if name_taken(&resources, &resource) {
            return Err(name_conflict(&resource));
        }
        resources.insert(resource_key(&resource.tenant_id, &resource.id), resource);
        Ok(())
    }

    async fn remove(&self, tenant: &TenantId, id: &ResourceId) -> Result<bool, RepositoryError> {
        let mut resources = self.resources.write().await;
        Ok(resources.remove(&resource_key(tenant, id)).is_some())
    }
}

#[derive(Default)]
struct CallState {
    calls: HashMap<String, CallRecord>,
    ledger: Vec<CreditLedgerEntry>,
    batches: HashMap<(String, String), BatchProgress>,
}

/// Calls, credit ledger and batch counters behind one lock so a transition
/// and its side effects land together.
#[derive(Default)]
pub struct InMemoryCallRepository {
    state: RwLock<CallState>,
}

#[async_trait::async_trait]
impl CallRepository for InMemoryCallRepository {
    async fn insert(&self, record: CallRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.calls.contains_key(&record.remote_call_id.0) {
            return Err(RepositoryError::Conflict(format!(
                "call `{}` is already recorded",
                record.remote_call_id
            )));
        }
        state.calls.insert(record.remote_call_id.0.clone(), record);
        Ok(())
    }

    async fn find_by_remote_id(
        &self,
        remote_call_id: &RemoteId,
    ) -> Result<Option<CallRecord>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.calls.get(&remote_call_id.0).cloned())
    }

    async fn list(
        &self,
        tenant: &TenantId,
        limit: u32,
    ) -> Result<Vec<CallRecord>, RepositoryError> {
        let state = self.state.read().await;
        let mut calls: Vec<CallRecord> =
            state.calls.values().filter(|call| &call.tenant_id == tenant).cloned().collect();
        calls.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.0.cmp(&left.id.0))
        });
        calls.truncate(limit as usize);
        Ok(calls)
    }

    async fn transition(
        &self,
        remote_call_id: &RemoteId,
        transition: CallTransition,
    ) -> Result<TransitionOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(current) = state.calls.get(&remote_call_id.0).cloned() else {
            return Ok(TransitionOutcome::NotFound);
        };
        if !current.status.can_transition_to(transition.to) {
            return Ok(TransitionOutcome::Unchanged { current });
        }

        let next = current.advanced(&transition);
        state.calls.insert(remote_call_id.0.clone(), next.clone());

        if let Some(debit) = &transition.debit {
            let already_debited = state
                .ledger
                .iter()
                .any(|entry| entry.call_id == current.id && entry.reason == debit.reason);
            if !already_debited {
                let entry = CreditLedgerEntry {
                    id: format!("cr_{}", uuid::Uuid::new_v4().simple()),
                    tenant_id: current.tenant_id.clone(),
                    call_id: current.id.clone(),
                    amount: debit.amount,
                    reason: debit.reason.clone(),
                    created_at: transition.at,
                };
                state.ledger.push(entry);
            }
        }

        if let (true, Some(batch_id)) = (next.status.is_terminal(), &current.batch_id) {
            let progress =
                state.batches.entry((current.tenant_id.0.clone(), batch_id.0.clone())).or_default();
            if next.status == CallStatus::Completed {
                progress.completed_calls += 1;
            } else {
                progress.failed_calls += 1;
            }
        }

        Ok(TransitionOutcome::Applied { previous: current.status, record: next })
    }

    async fn record_details(
        &self,
        remote_call_id: &RemoteId,
        details: CallDetails,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(call) = state.calls.get_mut(&remote_call_id.0) else {
            return Ok(false);
        };
        if details.transcript.is_some() {
            call.transcript = details.transcript;
        }
        if details.analysis.is_some() {
            call.analysis = details.analysis;
        }
        call.updated_at = at;
        Ok(true)
    }

    async fn batch_progress(
        &self,
        tenant: &TenantId,
        batch_id: &ResourceId,
    ) -> Result<BatchProgress, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .batches
            .get(&(tenant.0.clone(), batch_id.0.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl CreditLedgerRepository for InMemoryCallRepository {
    async fn list_for_tenant(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<CreditLedgerEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.ledger.iter().filter(|entry| &entry.tenant_id == tenant).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryIdempotencyRepository {
    records: RwLock<HashMap<(String, String), IdempotencyRecord>>,
}

#[async_trait::async_trait]
impl IdempotencyRepository for InMemoryIdempotencyRepository {
    async fn find(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(&(tenant.0.clone(), key.0.clone())).cloned())
    }

    async fn insert(&self, record: IdempotencyRecord) -> Result<InsertOutcome, RepositoryError> {
        let mut records = self.records.write().await;
        let key = (record.tenant_id.0.clone(), record.key.0.clone());
        if records.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        records.insert(key, record);
        Ok(InsertOutcome::Inserted)
    }

    async fn delete_expired(
        &self,
        tenant: &TenantId,
        key: &IdempotencyKey,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        let map_key = (tenant.0.clone(), key.0.clone());
        match records.get(&map_key) {
            Some(record) if record.is_expired(now) => {
                records.remove(&map_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok((before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryRateLimitRepository {
    windows: RwLock<HashMap<String, WindowHit>>,
}

#[async_trait::async_trait]
impl RateLimitRepository for InMemoryRateLimitRepository {
    async fn hit(
        &self,
        bucket: &str,
        now: DateTime<Utc>,
        window_ms: i64,
    ) -> Result<WindowHit, RepositoryError> {
        let mut windows = self.windows.write().await;
        let window = windows
            .entry(bucket.to_string())
            .or_insert(WindowHit { count: 0, window_start: now });
        if now - window.window_start >= Duration::milliseconds(window_ms) {
            *window = WindowHit { count: 0, window_start: now };
        }
        window.count = window.count.saturating_add(1);
        Ok(*window)
    }

    async fn purge_stale(&self, before: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut windows = self.windows.write().await;
        let count = windows.len();
        windows.retain(|_, window| window.window_start >= before);
        Ok((count - windows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use dialsync_core::domain::call::{
        CallId, CallRecord, CallStatus, CallTransition, TransitionOutcome,
    };
    use dialsync_core::domain::credit::BillingPolicy;
    use dialsync_core::domain::resource::{
        RemoteId, ResourceId, ResourceKind, ResourceSpec, SyncStatus, SyncedResource, VoiceSpec,
    };
    use dialsync_core::domain::TenantId;

    use super::{InMemoryCallRepository, InMemoryRateLimitRepository, InMemoryResourceRepository};
    use crate::repositories::{
        CallRepository, CreditLedgerRepository, RateLimitRepository, RepositoryError,
        ResourceRepository,
    };

    #[tokio::test]
    async fn in_memory_resource_repo_enforces_live_name_uniqueness() {
        let repo = InMemoryResourceRepository::default();
        let now = Utc::now();
        let voice = SyncedResource {
            tenant_id: TenantId("t-1".to_string()),
            id: ResourceId("vce_1".to_string()),
            kind: ResourceKind::Voice,
            name: "Warm".to_string(),
            remote_id: None,
            status: SyncStatus::Creating,
            spec: ResourceSpec::Voice(VoiceSpec { name: "Warm".to_string(), settings: json!({}) }),
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };
        repo.insert(voice.clone()).await.expect("insert");

        let clash = SyncedResource { id: ResourceId("vce_2".to_string()), ..voice.clone() };
        assert!(matches!(repo.insert(clash.clone()).await, Err(RepositoryError::Conflict(_))));

        let other_tenant = SyncedResource { tenant_id: TenantId("t-2".to_string()), ..clash };
        repo.insert(other_tenant).await.expect("names are scoped per tenant");

        let found = repo
            .find_by_name(&voice.tenant_id, ResourceKind::Voice, "WARM")
            .await
            .expect("find by name");
        assert_eq!(found, Some(voice));
    }

    #[tokio::test]
    async fn in_memory_call_repo_debits_once() {
        let repo = InMemoryCallRepository::default();
        let now = Utc::now();
        let tenant = TenantId("t-1".to_string());
        repo.insert(CallRecord {
            id: CallId("call_1".to_string()),
            tenant_id: tenant.clone(),
            remote_call_id: RemoteId("c-123".to_string()),
            agent_id: ResourceId("agt_1".to_string()),
            batch_id: Some(ResourceId("bat_1".to_string())),
            to_number: "+15550100".to_string(),
            status: CallStatus::Queued,
            started_at: None,
            ended_at: None,
            duration_secs: None,
            failure_reason: None,
            transcript: None,
            analysis: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("insert");

        let mut ended = CallTransition::to(CallStatus::Completed, now + Duration::seconds(90));
        ended.debit = Some(BillingPolicy::default().debit_for(90));

        let remote_id = RemoteId("c-123".to_string());
        let first = repo.transition(&remote_id, ended.clone()).await.expect("first");
        let second = repo.transition(&remote_id, ended).await.expect("second");

        assert!(matches!(first, TransitionOutcome::Applied { .. }));
        assert!(matches!(second, TransitionOutcome::Unchanged { .. }));

        let ledger = repo.list_for_tenant(&tenant).await.expect("ledger");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].amount, Decimal::TWO);

        let progress = repo
            .batch_progress(&tenant, &ResourceId("bat_1".to_string()))
            .await
            .expect("progress");
        assert_eq!(progress.completed_calls, 1);
    }

    #[tokio::test]
    async fn in_memory_rate_limit_repo_matches_window_semantics() {
        let repo = InMemoryRateLimitRepository::default();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).single().expect("valid time");

        for expected in 1..=3 {
            let hit = repo.hit("b", start + Duration::seconds(expected), 60_000).await.expect("hit");
            assert_eq!(hit.count, expected as u32);
            assert_eq!(hit.window_start, start + Duration::seconds(1));
        }

        let reset = repo.hit("b", start + Duration::seconds(61), 60_000).await.expect("reset");
        assert_eq!(reset.count, 1);
        assert_eq!(repo.purge_stale(start + Duration::seconds(120)).await.expect("purge"), 1);
    }
}

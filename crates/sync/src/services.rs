//! One place that wires repositories, the provider and configuration into
//! the service objects. Built once per process.

use std::sync::Arc;

use dialsync_core::config::AppConfig;
use dialsync_core::domain::credit::BillingPolicy;
use dialsync_core::retry::{RetryExecutor, RetryPolicy};
use dialsync_core::signature::SignatureVerifier;
use dialsync_db::repositories::{
    InMemoryCallRepository, InMemoryIdempotencyRepository, InMemoryRateLimitRepository,
    InMemoryResourceRepository, SqlCallRepository, SqlIdempotencyRepository,
    SqlRateLimitRepository, SqlResourceRepository,
};
use dialsync_db::{
    CallRepository, CreditLedgerRepository, DbPool, IdempotencyRepository, RateLimitRepository,
    ResourceRepository,
};
use dialsync_provider::{JsonPayloadMapper, PayloadMapper, RemoteProvider};

use crate::calls::CallLauncher;
use crate::drift::DriftSweep;
use crate::followup::FollowUpRunner;
use crate::idempotency::IdempotencyCache;
use crate::maintenance::MaintenanceSweep;
use crate::rate_limit::RateLimiter;
use crate::resources::ResourceSynchronizer;
use crate::webhook::{default_dispatcher, TranscriptRefresher, WebhookIngest};

#[derive(Clone)]
pub struct Stores {
    pub resources: Arc<dyn ResourceRepository>,
    pub calls: Arc<dyn CallRepository>,
    pub credits: Arc<dyn CreditLedgerRepository>,
    pub idempotency: Arc<dyn IdempotencyRepository>,
    pub rate_limits: Arc<dyn RateLimitRepository>,
}

impl Stores {
    pub fn sql(pool: DbPool) -> Self {
        let calls = Arc::new(SqlCallRepository::new(pool.clone()));
        Self {
            resources: Arc::new(SqlResourceRepository::new(pool.clone())),
            calls: calls.clone(),
            credits: calls,
            idempotency: Arc::new(SqlIdempotencyRepository::new(pool.clone())),
            rate_limits: Arc::new(SqlRateLimitRepository::new(pool)),
        }
    }

    /// Single-process stores for tests and local experiments.
    pub fn in_memory() -> Self {
        let calls = Arc::new(InMemoryCallRepository::default());
        Self {
            resources: Arc::new(InMemoryResourceRepository::default()),
            calls: calls.clone(),
            credits: calls,
            idempotency: Arc::new(InMemoryIdempotencyRepository::default()),
            rate_limits: Arc::new(InMemoryRateLimitRepository::default()),
        }
    }
}

#[derive(Clone)]
pub struct Services {
    pub stores: Stores,
    pub resources: Arc<ResourceSynchronizer>,
    pub calls: Arc<CallLauncher>,
    pub idempotency: Arc<IdempotencyCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub webhooks: Arc<WebhookIngest>,
    pub followups: Arc<FollowUpRunner>,
    pub drift: Arc<DriftSweep>,
    pub maintenance: Arc<MaintenanceSweep>,
}

impl Services {
    pub fn build(stores: Stores, provider: Arc<dyn RemoteProvider>, config: &AppConfig) -> Self {
        let mapper: Arc<dyn PayloadMapper> = Arc::new(JsonPayloadMapper);
        let retry = RetryExecutor::new(provider.name(), RetryPolicy::from(&config.retry));
        let followups = Arc::new(FollowUpRunner::new());

        let resources = Arc::new(ResourceSynchronizer::new(
            stores.resources.clone(),
            provider.clone(),
            mapper.clone(),
            retry.clone(),
        ));
        let calls = Arc::new(CallLauncher::new(
            stores.resources.clone(),
            stores.calls.clone(),
            provider.clone(),
            mapper,
            retry.clone(),
        ));
        let billing = BillingPolicy {
            credits_per_minute: config.billing.credits_per_minute,
            minimum_debit: config.billing.minimum_debit,
        };
        let dispatcher = default_dispatcher(
            stores.calls.clone(),
            billing,
            TranscriptRefresher::new(stores.calls.clone(), provider, retry),
            followups.clone(),
        );
        let verifier = SignatureVerifier::new(
            config.webhook.secret.clone(),
            config.webhook.max_age_secs,
            config.webhook.future_tolerance_secs,
        );

        Self {
            resources: resources.clone(),
            calls,
            idempotency: Arc::new(IdempotencyCache::from_config(
                stores.idempotency.clone(),
                &config.idempotency,
            )),
            rate_limiter: Arc::new(RateLimiter::new(
                stores.rate_limits.clone(),
                config.rate_limit.clone(),
            )),
            webhooks: Arc::new(WebhookIngest::new(verifier, dispatcher)),
            followups,
            drift: Arc::new(DriftSweep::new(stores.resources.clone(), resources)),
            maintenance: Arc::new(MaintenanceSweep::new(
                stores.idempotency.clone(),
                stores.rate_limits.clone(),
            )),
            stores,
        }
    }
}

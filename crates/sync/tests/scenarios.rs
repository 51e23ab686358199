use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{json, Value};

use dialsync_core::config::AppConfig;
use dialsync_core::domain::call::{CallId, CallRecord, CallStatus};
use dialsync_core::domain::idempotency::{CachedResponse, IdempotencyKey};
use dialsync_core::domain::rate_limit::{RateLimitDecision, RateLimitSubject};
use dialsync_core::domain::resource::{
    AgentSpec, RemoteId, ResourceId, ResourceKind, ResourceSpec, SyncStatus, VoiceSpec,
};
use dialsync_core::domain::TenantId;
use dialsync_core::errors::{ApplicationError, ProviderError, ProviderErrorClass};
use dialsync_core::fingerprint::request_hash;
use dialsync_core::signature::SignatureVerifier;
use dialsync_provider::{FakeOp, FakeProvider};
use dialsync_sync::webhook::{EventContext, HandlerOutcome};
use dialsync_sync::{OperationContext, Services, Stores};

const WEBHOOK_SECRET: &str = "whsec-end-to-end";

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").expect("ts").with_timezone(&Utc)
}

fn tenant() -> TenantId {
    TenantId("tenant-a".to_string())
}

fn ctx() -> OperationContext {
    OperationContext::new(tenant(), "req-end-to-end").at(now())
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.provider.api_key = SecretString::from("pk-test".to_string());
    config.webhook.secret = SecretString::from(WEBHOOK_SECRET.to_string());
    config.retry.max_attempts = 3;
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config.retry.jitter = false;
    config.billing.credits_per_minute = Decimal::new(5, 1);
    config
}

fn setup() -> (Services, Arc<FakeProvider>) {
    let provider = Arc::new(FakeProvider::new("fake-voice"));
    let services = Services::build(Stores::in_memory(), provider.clone(), &config());
    (services, provider)
}

fn agent_spec(name: &str, voice: Option<&ResourceId>) -> ResourceSpec {
    ResourceSpec::Agent(AgentSpec {
        name: name.to_string(),
        voice_id: voice.cloned(),
        settings: json!({ "temperature": 0.3 }),
    })
}

#[tokio::test]
async fn create_with_synced_voice_becomes_active() {
    let (services, provider) = setup();
    let voice = services
        .resources
        .create(&ctx(), ResourceSpec::Voice(VoiceSpec { name: "Warm".to_string(), settings: json!({}) }))
        .await
        .expect("voice");
    let voice_remote = voice.remote_id.clone().expect("voice remote id");

    let agent = services
        .resources
        .create(&ctx(), agent_spec("Front Desk", Some(&voice.id)))
        .await
        .expect("agent");

    assert_eq!(agent.status, SyncStatus::Active);
    let remote_id = agent.remote_id.clone().expect("agent remote id");
    let remote = provider.object(&remote_id).await.expect("remote object");
    assert_eq!(remote.data["voice_id"], voice_remote.0.as_str());
    assert_eq!(remote.data["temperature"], 0.3);

    let stored = services.resources.get(&tenant(), &agent.id).await.expect("get");
    assert_eq!(stored, agent);
}

#[tokio::test]
async fn persistent_server_errors_leave_no_rows() {
    let (services, provider) = setup();
    provider
        .fail_always(
            FakeOp::CreateResource,
            ProviderError::from_status("fake-voice", 500, None, json!({ "error": "down" })),
        )
        .await;

    let error = services
        .resources
        .create(&ctx(), agent_spec("Front Desk", None))
        .await
        .expect_err("provider down");

    match error {
        ApplicationError::Provider(provider_error) => {
            assert_eq!(provider_error.class, ProviderErrorClass::Server);
            assert_eq!(provider_error.status, Some(500));
            assert_eq!(provider_error.attempts, 3);
            assert_eq!(provider_error.provider, "fake-voice");
        }
        other => panic!("expected provider error, got {other:?}"),
    }
    assert_eq!(provider.calls(FakeOp::CreateResource).await, 3);

    let rows = services.stores.resources.list(&tenant(), None).await.expect("list");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn replayed_request_executes_once() {
    let (services, provider) = setup();
    let key = IdempotencyKey::parse("k1").expect("key");
    let body = br#"{"name":"Front Desk"}"#;
    let hash = request_hash(
        "POST",
        "/api/v1/resources/agent",
        None,
        [("content-type", "application/json"), ("x-request-id", "first")],
        body,
    );

    let mut responses = Vec::new();
    for minutes in [0, 45] {
        let at = now() + Duration::minutes(minutes);
        if let Some(cached) =
            services.idempotency.check(&tenant(), &key, &hash, at).await.expect("check")
        {
            responses.push(cached);
            continue;
        }

        let created = services
            .resources
            .create(&ctx().at(at), agent_spec("Front Desk", None))
            .await
            .expect("create");
        let response = CachedResponse {
            status_code: 201,
            content_type: Some("application/json".to_string()),
            body: serde_json::to_vec(&created).expect("encode"),
        };
        services
            .idempotency
            .store(&tenant(), &key, &hash, response.clone(), at)
            .await
            .expect("store");
        responses.push(response);
    }

    assert_eq!(responses[0], responses[1]);
    assert_eq!(provider.calls(FakeOp::CreateResource).await, 1);

    let replay_hash = request_hash(
        "POST",
        "/api/v1/resources/agent",
        None,
        [("content-type", "application/json"), ("x-request-id", "second")],
        body,
    );
    assert_eq!(replay_hash, hash);
}

#[tokio::test]
async fn duplicate_call_ended_debits_once() {
    let (services, _) = setup();
    services
        .stores
        .calls
        .insert(CallRecord {
            id: CallId("call_1".to_string()),
            tenant_id: tenant(),
            remote_call_id: RemoteId("c-123".to_string()),
            agent_id: ResourceId("agt_1".to_string()),
            batch_id: None,
            to_number: "+15550001234".to_string(),
            status: CallStatus::InProgress,
            started_at: Some(now()),
            ended_at: None,
            duration_secs: None,
            failure_reason: None,
            transcript: None,
            analysis: None,
            created_at: now(),
            updated_at: now(),
        })
        .await
        .expect("seed call");

    let verifier = SignatureVerifier::new(SecretString::from(WEBHOOK_SECRET.to_string()), 300, 30);
    let body = json!({
        "event_type": "call.ended",
        "call_id": "c-123",
        "payload": { "duration": 130, "transcript": "Hi, this is the front desk." }
    })
    .to_string();
    let timestamp = "2026-03-01T10:00:05Z";
    let signature = verifier.sign(timestamp, body.as_bytes()).expect("sign");
    let event_ctx = EventContext {
        correlation_id: "wh-1".to_string(),
        received_at: now() + Duration::seconds(6),
    };

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let ack = services
            .webhooks
            .ingest(Some(&signature), Some(timestamp), body.as_bytes(), &event_ctx)
            .await
            .expect("verified");
        outcomes.push(ack.outcome);
    }
    services.followups.drain().await;

    assert_eq!(outcomes, vec![HandlerOutcome::Applied, HandlerOutcome::Duplicate]);
    let record = services
        .stores
        .calls
        .find_by_remote_id(&RemoteId("c-123".to_string()))
        .await
        .expect("find")
        .expect("call");
    assert_eq!(record.status, CallStatus::Completed);
    assert_eq!(record.transcript.as_deref(), Some("Hi, this is the front desk."));

    let ledger = services.stores.credits.list_for_tenant(&tenant()).await.expect("ledger");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, Decimal::new(15, 1));
}

#[tokio::test]
async fn hundred_and_first_request_is_rejected() {
    let (services, _) = setup();
    let subject = RateLimitSubject::Tenant(tenant());
    let route = "POST /api/v1/resources/{kind}";

    for offset in 0..100 {
        let at = now() + Duration::milliseconds(offset * 10);
        let decision = services.rate_limiter.allow(&subject, route, at).await.expect("allow");
        assert!(decision.is_allowed(), "request {offset} should pass");
    }

    let decision = services
        .rate_limiter
        .allow(&subject, route, now() + Duration::seconds(2))
        .await
        .expect("decision");
    let RateLimitDecision::Rejected(rejection) = decision else {
        panic!("the 101st request must be rejected");
    };
    assert_eq!(rejection.limit, 100);
    assert_eq!(rejection.reset_at, now() + Duration::seconds(60));
    assert_eq!(rejection.retry_after_secs, 58);

    let other_tenant = RateLimitSubject::Tenant(TenantId("tenant-b".to_string()));
    assert!(services
        .rate_limiter
        .allow(&other_tenant, route, now() + Duration::seconds(2))
        .await
        .expect("other tenant")
        .is_allowed());
}

#[tokio::test]
async fn deleting_with_provider_down_leaves_drift_for_the_sweep() {
    let (services, provider) = setup();
    let agent = services
        .resources
        .create(&ctx(), agent_spec("Front Desk", None))
        .await
        .expect("agent");
    provider
        .fail_always(FakeOp::DeleteResource, ProviderError::connection("fake-voice", "refused"))
        .await;

    let ack = services.resources.delete(&ctx(), &agent.id).await.expect("delete");
    assert!(!ack.remote_deleted);
    assert_eq!(ack.kind, ResourceKind::Agent);

    provider.clear_failures().await;
    let sweep = services.drift.run(&ctx(), false).await.expect("sweep");
    assert_eq!(sweep.drifted, 1);
    assert_eq!(
        serde_json::to_value(&sweep.reports[0].recommended_action).expect("encode")["action"],
        Value::String("delete_remote".to_string())
    );
}

//! HTTP surface over the sync services.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use dialsync_core::domain::TenantId;
use dialsync_sync::{OperationContext, Services};

pub mod calls;
pub mod error;
pub mod middleware;
pub mod resources;
pub mod webhooks;

use self::middleware::RequestContext;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

pub fn router(state: AppState) -> Router {
    let tenant_scoped = Router::new()
        .route("/api/v1/resources/{kind}", post(resources::create).get(resources::list))
        .route(
            "/api/v1/resources/{kind}/{id}",
            get(resources::get).put(resources::update).delete(resources::delete),
        )
        .route("/api/v1/resources/{kind}/{id}/refresh", post(resources::refresh))
        .route("/api/v1/calls", post(calls::start).get(calls::list))
        .route("/api/v1/credits", get(calls::credits))
        .route_layer(from_fn_with_state(state.clone(), middleware::idempotent_replay))
        .route_layer(from_fn_with_state(state.clone(), middleware::enforce_rate_limit))
        .route_layer(from_fn(middleware::require_tenant));

    let provider_facing = Router::new()
        .route("/api/v1/webhooks/provider", post(webhooks::receive))
        .route_layer(from_fn_with_state(state.clone(), middleware::enforce_rate_limit));

    tenant_scoped
        .merge(provider_facing)
        .layer(from_fn(middleware::assign_context))
        .with_state(state)
}

fn operation(request: &RequestContext, tenant: TenantId) -> OperationContext {
    OperationContext::new(tenant, request.correlation_id.clone()).at(request.received_at)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{HeaderMap, Request, StatusCode},
        Router,
    };
    use chrono::Utc;
    use dialsync_core::config::AppConfig;
    use dialsync_core::signature::SignatureVerifier;
    use dialsync_provider::{FakeOp, FakeProvider};
    use dialsync_sync::{Services, Stores};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, AppState};

    const WEBHOOK_SECRET: &str = "whsec-api";

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.provider.api_key = SecretString::from("pk-test".to_string());
        config.webhook.secret = SecretString::from(WEBHOOK_SECRET.to_string());
        config.retry.max_attempts = 2;
        config.retry.initial_delay_ms = 1;
        config.retry.max_delay_ms = 1;
        config.retry.jitter = false;
        config
    }

    fn app_with(config: AppConfig) -> (Router, Arc<FakeProvider>) {
        let provider = Arc::new(FakeProvider::new("fake-voice"));
        let services = Services::build(Stores::in_memory(), provider.clone(), &config);
        (router(AppState::new(services)), provider)
    }

    fn json_request(method: &str, uri: &str, tenant: Option<&str>, body: Value) -> Request<Body> {
        let mut builder =
            Request::builder().method(method).uri(uri).header("content-type", "application/json");
        if let Some(tenant) = tenant {
            builder = builder.header("x-tenant-id", tenant);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    fn empty_request(method: &str, uri: &str, tenant: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-tenant-id", tenant)
            .body(Body::empty())
            .expect("request")
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body =
            if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json") };
        (status, headers, body)
    }

    #[tokio::test]
    async fn api_routes_require_a_tenant() {
        let (app, provider) = app_with(config());

        let (status, headers, body) = send(
            &app,
            json_request("POST", "/api/v1/resources/agent", None, json!({ "name": "Desk" })),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "unauthorized");
        assert!(body["correlation_id"].as_str().is_some_and(|id| id.starts_with("req_")));
        assert!(headers.contains_key("x-correlation-id"));
        assert_eq!(provider.calls(FakeOp::CreateResource).await, 0);
    }

    #[tokio::test]
    async fn resources_are_created_read_and_deleted() {
        let (app, provider) = app_with(config());

        let (status, _, created) = send(
            &app,
            json_request(
                "POST",
                "/api/v1/resources/agent",
                Some("tenant-a"),
                json!({ "name": "  Front   Desk ", "settings": { "temperature": 0.2 } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "active");
        assert_eq!(created["name"], "Front Desk");
        let id = created["id"].as_str().expect("id").to_string();

        let (status, _, fetched) =
            send(&app, empty_request("GET", &format!("/api/v1/resources/agent/{id}"), "tenant-a"))
                .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (status, _, _) =
            send(&app, empty_request("GET", &format!("/api/v1/resources/agent/{id}"), "tenant-b"))
                .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) =
            send(&app, empty_request("GET", &format!("/api/v1/resources/voice/{id}"), "tenant-a"))
                .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, ack) = send(
            &app,
            empty_request("DELETE", &format!("/api/v1/resources/agent/{id}"), "tenant-a"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["remote_deleted"], true);
        assert_eq!(provider.object_count().await, 0);

        let (status, _, listed) =
            send(&app, empty_request("GET", "/api/v1/resources/agent", "tenant-a")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn invalid_payloads_and_kinds_are_rejected_before_the_provider() {
        let (app, provider) = app_with(config());

        let (status, _, body) = send(
            &app,
            json_request("POST", "/api/v1/resources/agent", Some("tenant-a"), json!({ "voice": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation_error");

        let (status, _, body) = send(
            &app,
            json_request("POST", "/api/v1/resources/robot", Some("tenant-a"), json!({ "name": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
        assert_eq!(provider.calls(FakeOp::CreateResource).await, 0);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_replays_the_first_response() {
        let (app, provider) = app_with(config());
        let request = || {
            let mut request = json_request(
                "POST",
                "/api/v1/resources/voice",
                Some("tenant-a"),
                json!({ "name": "Warm" }),
            );
            request.headers_mut().insert("idempotency-key", "create-voice-1".parse().expect("value"));
            request
        };

        let (first_status, first_headers, first) = send(&app, request()).await;
        let (second_status, second_headers, second) = send(&app, request()).await;

        assert_eq!(first_status, StatusCode::CREATED);
        assert_eq!(second_status, StatusCode::CREATED);
        assert!(first_headers.get("x-idempotency-replay").is_none());
        assert_eq!(second_headers["x-idempotency-replay"], "true");
        assert_eq!(first, second);
        assert_eq!(provider.calls(FakeOp::CreateResource).await, 1);
    }

    #[tokio::test]
    async fn requests_over_the_limit_get_429_with_retry_headers() {
        let mut config = config();
        config.rate_limit.requests_per_minute = 2;
        let (app, _) = app_with(config);

        for _ in 0..2 {
            let (status, headers, _) =
                send(&app, empty_request("GET", "/api/v1/calls", "tenant-a")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(headers["x-ratelimit-limit"], "2");
        }

        let (status, headers, body) =
            send(&app, empty_request("GET", "/api/v1/calls", "tenant-a")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["kind"], "rate_limited");
        assert!(headers.contains_key("retry-after"));
        assert!(headers.contains_key("x-ratelimit-reset"));

        let (status, _, _) = send(&app, empty_request("GET", "/api/v1/calls", "tenant-b")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn calls_are_placed_through_active_agents() {
        let (app, provider) = app_with(config());
        let (_, _, agent) = send(
            &app,
            json_request("POST", "/api/v1/resources/agent", Some("tenant-a"), json!({ "name": "Desk" })),
        )
        .await;

        let (status, _, call) = send(
            &app,
            json_request(
                "POST",
                "/api/v1/calls",
                Some("tenant-a"),
                json!({ "agent_id": agent["id"], "to_number": "+15550001234" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(call["status"], "queued");
        assert_eq!(provider.calls(FakeOp::CreateCall).await, 1);

        let (status, _, calls) =
            send(&app, empty_request("GET", "/api/v1/calls?limit=10", "tenant-a")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(calls.as_array().map(Vec::len), Some(1));

        let (status, _, credits) =
            send(&app, empty_request("GET", "/api/v1/credits", "tenant-a")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(credits["entries"], json!([]));
    }

    #[tokio::test]
    async fn webhooks_require_a_valid_signature() {
        let (app, _) = app_with(config());
        let body = json!({ "event_type": "call.queued", "call_id": "c-unknown" }).to_string();
        let timestamp = Utc::now().timestamp().to_string();
        let verifier =
            SignatureVerifier::new(SecretString::from(WEBHOOK_SECRET.to_string()), 300, 30);
        let signature = verifier.sign(&timestamp, body.as_bytes()).expect("sign");

        let unsigned = Request::builder()
            .method("POST")
            .uri("/api/v1/webhooks/provider")
            .header("x-webhook-timestamp", &timestamp)
            .body(Body::from(body.clone()))
            .expect("request");
        let (status, _, rejected) = send(&app, unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(rejected["kind"], "unauthorized");

        let signed = Request::builder()
            .method("POST")
            .uri("/api/v1/webhooks/provider")
            .header("x-webhook-timestamp", &timestamp)
            .header("x-webhook-signature", format!("sha256={signature}"))
            .body(Body::from(body))
            .expect("request");
        let (status, _, ack) = send(&app, signed).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["event_type"], "call.queued");
        assert_eq!(ack["outcome"], "not_found");
    }
}

//! Request pipeline shared by the API routes.
//!
//! Order, outermost first: request context, tenant resolution, rate limiting,
//! idempotent replay. The webhook receiver skips tenant resolution and is
//! limited per client address instead.

use std::net::SocketAddr;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use dialsync_core::domain::idempotency::{CachedResponse, IdempotencyKey};
use dialsync_core::domain::rate_limit::{RateLimitDecision, RateLimitSubject};
use dialsync_core::domain::TenantId;
use dialsync_core::errors::ApplicationError;
use dialsync_core::fingerprint::request_hash;
use dialsync_sync::{new_correlation_id, IdempotencyCache};
use tracing::{info, warn};

use super::error::{ApiError, RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_HEADER};
use super::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const REPLAY_HEADER: &str = "x-idempotency-replay";

const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_TENANT_LEN: usize = 128;

/// Attached to every request before routing-specific middleware runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: String,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    fn of(request: &Request) -> Self {
        request.extensions().get::<Self>().cloned().unwrap_or_else(|| Self {
            correlation_id: new_correlation_id(),
            received_at: Utc::now(),
        })
    }
}

pub async fn assign_context(mut request: Request, next: Next) -> Response {
    let correlation_id = header_str(request.headers(), CORRELATION_HEADER)
        .filter(|value| value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(new_correlation_id);
    request
        .extensions_mut()
        .insert(RequestContext { correlation_id: correlation_id.clone(), received_at: Utc::now() });

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}

/// Tenant identity is established upstream; this layer only requires it.
pub async fn require_tenant(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let context = RequestContext::of(&request);
    let tenant = header_str(request.headers(), TENANT_HEADER)
        .filter(|value| value.len() <= MAX_TENANT_LEN)
        .map(|value| TenantId(value.to_string()))
        .ok_or_else(|| {
            ApiError::unauthorized("the x-tenant-id header is required", &context.correlation_id)
        })?;

    request.extensions_mut().insert(tenant);
    Ok(next.run(request).await)
}

pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = RequestContext::of(&request);
    let route = route_key(&request);
    let subject = match request.extensions().get::<TenantId>() {
        Some(tenant) => RateLimitSubject::Tenant(tenant.clone()),
        None => RateLimitSubject::Ip(client_address(&request)),
    };

    let decision = state
        .services
        .rate_limiter
        .allow(&subject, &route, context.received_at)
        .await
        .map_err(|error| ApiError::from_application(error, &context.correlation_id))?;

    match decision {
        RateLimitDecision::Allowed { limit, remaining, reset_at } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER), HeaderValue::from(limit));
            headers.insert(
                HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
                HeaderValue::from(remaining),
            );
            headers.insert(
                HeaderName::from_static(RATE_LIMIT_RESET_HEADER),
                HeaderValue::from(reset_at.timestamp()),
            );
            Ok(response)
        }
        RateLimitDecision::Rejected(rejection) => Err(ApiError::from_application(
            ApplicationError::RateLimited(rejection),
            &context.correlation_id,
        )),
    }
}

/// Replays the stored response for a repeated `Idempotency-Key` with the same
/// request fingerprint. Requests without the header pass straight through.
pub async fn idempotent_replay(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !is_mutating(request.method()) {
        return Ok(next.run(request).await);
    }
    let Some(raw_key) = header_str(request.headers(), IDEMPOTENCY_KEY_HEADER) else {
        return Ok(next.run(request).await);
    };

    let context = RequestContext::of(&request);
    let correlation_id = context.correlation_id.as_str();
    let key = IdempotencyKey::parse(raw_key).ok_or_else(|| {
        ApiError::validation("Idempotency-Key must be 1 to 255 characters", correlation_id)
    })?;
    let tenant = request
        .extensions()
        .get::<TenantId>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("the x-tenant-id header is required", correlation_id))?;

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_BYTES).await.map_err(|error| {
        ApiError::validation(format!("request body could not be read: {error}"), correlation_id)
    })?;
    let hash = {
        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str(), value)));
        request_hash(parts.method.as_str(), parts.uri.path(), parts.uri.query(), headers, &body)
    };

    let cache = state.services.idempotency.as_ref();
    if let Some(cached) = cache
        .check(&tenant, &key, &hash, context.received_at)
        .await
        .map_err(|error| ApiError::from_application(error, correlation_id))?
    {
        info!(
            event_name = "idempotency.replay.served",
            correlation_id,
            tenant_id = %tenant,
            idempotency_key = %key.0,
            status_code = cached.status_code,
            "replaying stored response"
        );
        return Ok(replay(cached));
    }

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;
    let status_code = response.status().as_u16();
    if !IdempotencyCache::is_cacheable(status_code) {
        return Ok(response);
    }

    let (response_parts, response_body) = response.into_parts();
    let response_body = to_bytes(response_body, MAX_BODY_BYTES).await.map_err(|error| {
        ApiError::internal(format!("response body could not be buffered: {error}"), correlation_id)
    })?;
    let cached = CachedResponse {
        status_code,
        content_type: header_str(&response_parts.headers, CONTENT_TYPE.as_str()).map(str::to_string),
        body: response_body.to_vec(),
    };
    if let Err(error) = cache.store(&tenant, &key, &hash, cached, context.received_at).await {
        warn!(
            event_name = "idempotency.store.failed",
            correlation_id,
            tenant_id = %tenant,
            idempotency_key = %key.0,
            error = %error,
            "response served but not stored for replay"
        );
    }

    Ok(Response::from_parts(response_parts, Body::from(response_body)))
}

fn replay(cached: CachedResponse) -> Response {
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = StatusCode::from_u16(cached.status_code).unwrap_or(StatusCode::OK);
    let headers = response.headers_mut();
    if let Some(value) = cached.content_type.and_then(|value| HeaderValue::from_str(&value).ok()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(HeaderName::from_static(REPLAY_HEADER), HeaderValue::from_static("true"));
    response
}

/// `"{METHOD} {route template}"`, so path parameters share one bucket.
fn route_key(request: &Request) -> String {
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    format!("{} {path}", request.method())
}

fn client_address(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(address)| address.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

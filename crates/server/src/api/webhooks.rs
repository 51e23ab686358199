use axum::{body::Bytes, extract::State, http::HeaderMap, Extension, Json};
use dialsync_sync::webhook::{DispatchAck, EventContext};
use dialsync_sync::WebhookError;

use super::error::ApiError;
use super::middleware::RequestContext;
use super::AppState;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Verified events are always acknowledged with 200, even when no handler
/// matched or the handler failed, so the provider does not redeliver them.
pub async fn receive(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DispatchAck>, ApiError> {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    let ctx = EventContext {
        correlation_id: request.correlation_id.clone(),
        received_at: request.received_at,
    };

    match state
        .services
        .webhooks
        .ingest(header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER), &body, &ctx)
        .await
    {
        Ok(ack) => Ok(Json(ack)),
        Err(WebhookError::Signature(rejection)) => {
            Err(ApiError::unauthorized(rejection.to_string(), &request.correlation_id))
        }
        Err(WebhookError::Envelope(malformed)) => {
            Err(ApiError::validation(malformed.to_string(), &request.correlation_id))
        }
    }
}

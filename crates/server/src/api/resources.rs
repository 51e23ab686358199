use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use dialsync_core::domain::resource::{ResourceId, ResourceKind, ResourceSpec, SyncedResource};
use dialsync_core::domain::TenantId;
use dialsync_core::errors::ApplicationError;
use dialsync_sync::{DeleteAck, RefreshOutcome};
use serde::Deserialize;
use serde_json::Value;

use super::error::ApiError;
use super::middleware::RequestContext;
use super::{operation, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct CreateQuery {
    /// Store locally without contacting the provider.
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub apply: bool,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    Extension(tenant): Extension<TenantId>,
    Path(kind): Path<String>,
    Query(query): Query<CreateQuery>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<SyncedResource>), ApiError> {
    let correlation_id = request.correlation_id.as_str();
    let kind = parse_kind(&kind, correlation_id)?;
    let spec = parse_spec(kind, payload, correlation_id)?;
    let ctx = operation(&request, tenant);

    let created = if query.draft {
        state.services.resources.save_draft(&ctx, spec).await
    } else {
        state.services.resources.create(&ctx, spec).await
    }
    .map_err(|error| ApiError::from_application(error, correlation_id))?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    Extension(tenant): Extension<TenantId>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<SyncedResource>>, ApiError> {
    let correlation_id = request.correlation_id.as_str();
    let kind = parse_kind(&kind, correlation_id)?;

    let resources = state
        .services
        .resources
        .list(&tenant, Some(kind))
        .await
        .map_err(|error| ApiError::from_application(error, correlation_id))?;
    Ok(Json(resources))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    Extension(tenant): Extension<TenantId>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<SyncedResource>, ApiError> {
    let correlation_id = request.correlation_id.as_str();
    let id = resource_id(&kind, id, correlation_id)?;

    let resource = state
        .services
        .resources
        .get(&tenant, &id)
        .await
        .map_err(|error| ApiError::from_application(error, correlation_id))?;
    Ok(Json(resource))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    Extension(tenant): Extension<TenantId>,
    Path((kind, id)): Path<(String, String)>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SyncedResource>, ApiError> {
    let correlation_id = request.correlation_id.as_str();
    let id = resource_id(&kind, id, correlation_id)?;
    let spec = parse_spec(parse_kind(&kind, correlation_id)?, payload, correlation_id)?;
    let ctx = operation(&request, tenant);

    let updated = state
        .services
        .resources
        .update(&ctx, &id, spec)
        .await
        .map_err(|error| ApiError::from_application(error, correlation_id))?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    Extension(tenant): Extension<TenantId>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<DeleteAck>, ApiError> {
    let correlation_id = request.correlation_id.as_str();
    let id = resource_id(&kind, id, correlation_id)?;
    let ctx = operation(&request, tenant);

    let ack = state
        .services
        .resources
        .delete(&ctx, &id)
        .await
        .map_err(|error| ApiError::from_application(error, correlation_id))?;
    Ok(Json(ack))
}

pub async fn refresh(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    Extension(tenant): Extension<TenantId>,
    Path((kind, id)): Path<(String, String)>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<RefreshOutcome>, ApiError> {
    let correlation_id = request.correlation_id.as_str();
    let id = resource_id(&kind, id, correlation_id)?;
    let ctx = operation(&request, tenant);

    let outcome = state
        .services
        .resources
        .refresh(&ctx, &id, query.apply)
        .await
        .map_err(|error| ApiError::from_application(error, correlation_id))?;
    Ok(Json(outcome))
}

fn parse_kind(raw: &str, correlation_id: &str) -> Result<ResourceKind, ApiError> {
    ResourceKind::parse(raw).ok_or_else(|| {
        ApiError::from_application(ApplicationError::not_found("resource kind", raw), correlation_id)
    })
}

/// Ids carry their kind's prefix, so `/agent/vce_...` is a miss rather than a
/// cross-kind lookup.
fn resource_id(kind: &str, id: String, correlation_id: &str) -> Result<ResourceId, ApiError> {
    let kind = parse_kind(kind, correlation_id)?;
    if !id.starts_with(&format!("{}_", kind.id_prefix())) {
        return Err(ApiError::from_application(
            ApplicationError::not_found(kind.as_str(), id),
            correlation_id,
        ));
    }
    Ok(ResourceId(id))
}

fn parse_spec(
    kind: ResourceKind,
    payload: Result<Json<Value>, JsonRejection>,
    correlation_id: &str,
) -> Result<ResourceSpec, ApiError> {
    let Json(value) = payload.map_err(|rejection| {
        ApiError::validation(format!("request body is not valid JSON: {rejection}"), correlation_id)
    })?;
    ResourceSpec::from_json(kind, value).map_err(|error| {
        ApiError::validation(format!("invalid {} payload: {error}", kind.as_str()), correlation_id)
    })
}

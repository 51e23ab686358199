use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Extension, Json,
};
use dialsync_core::domain::call::CallRecord;
use dialsync_core::domain::credit::CreditLedgerEntry;
use dialsync_core::domain::TenantId;
use dialsync_sync::{repository_error, StartCall};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::middleware::RequestContext;
use super::{operation, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ListCallsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreditsResponse {
    pub tenant_id: TenantId,
    pub total_debited: Decimal,
    pub entries: Vec<CreditLedgerEntry>,
}

pub async fn start(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    Extension(tenant): Extension<TenantId>,
    payload: Result<Json<StartCall>, JsonRejection>,
) -> Result<(StatusCode, Json<CallRecord>), ApiError> {
    let correlation_id = request.correlation_id.as_str();
    let Json(start) = payload.map_err(|rejection| {
        ApiError::validation(format!("invalid call request: {rejection}"), correlation_id)
    })?;
    let ctx = operation(&request, tenant);

    let record = state
        .services
        .calls
        .start_call(&ctx, start)
        .await
        .map_err(|error| ApiError::from_application(error, correlation_id))?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    Extension(tenant): Extension<TenantId>,
    Query(query): Query<ListCallsQuery>,
) -> Result<Json<Vec<CallRecord>>, ApiError> {
    let calls = state
        .services
        .calls
        .list(&tenant, query.limit)
        .await
        .map_err(|error| ApiError::from_application(error, &request.correlation_id))?;
    Ok(Json(calls))
}

pub async fn credits(
    State(state): State<AppState>,
    Extension(request): Extension<RequestContext>,
    Extension(tenant): Extension<TenantId>,
) -> Result<Json<CreditsResponse>, ApiError> {
    let entries = state
        .services
        .stores
        .credits
        .list_for_tenant(&tenant)
        .await
        .map_err(|error| {
            ApiError::from_application(repository_error(error), &request.correlation_id)
        })?;
    let total_debited = entries.iter().map(|entry| entry.amount).sum();

    Ok(Json(CreditsResponse { tenant_id: tenant, total_debited, entries }))
}

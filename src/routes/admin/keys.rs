use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::{ErrorResponse, UpdatedResponse, parse_service};
use crate::AppState;
use crate::error::QuotaError;
use crate::keys::{ApiKeyInfo, ServiceStats};

// --- Types ---

#[derive(Serialize, ToSchema)]
pub struct ListKeysResponse {
    pub keys: Vec<ApiKeyInfo>,
}

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyPrefixRequest {
    /// Leading characters of the key; the full secret is never required
    key_prefix: String,
}

// --- Handlers ---

/// List a service's pooled keys (masked)
#[utoipa::path(
    get,
    path = "/keys/{service}",
    tag = "keys",
    params(("service" = String, Path, description = "replicate, openai, stability or generic")),
    responses(
        (status = 200, body = ListKeysResponse),
        (status = 400, body = ErrorResponse),
    )
)]
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<ListKeysResponse>, QuotaError> {
    let service = parse_service(&service)?;
    Ok(Json(ListKeysResponse {
        keys: state.keys.list_keys(service).await,
    }))
}

/// Aggregate usage for a service's key pool
#[utoipa::path(
    get,
    path = "/keys/{service}/stats",
    tag = "keys",
    params(("service" = String, Path, description = "replicate, openai, stability or generic")),
    responses(
        (status = 200, body = ServiceStats),
        (status = 400, body = ErrorResponse),
    )
)]
pub async fn get_key_stats(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<ServiceStats>, QuotaError> {
    let service = parse_service(&service)?;
    Ok(Json(state.keys.get_service_stats(service).await))
}

/// Take keys matching a prefix out of rotation
#[utoipa::path(
    post,
    path = "/keys/{service}/deactivate",
    tag = "keys",
    params(("service" = String, Path, description = "replicate, openai, stability or generic")),
    request_body = KeyPrefixRequest,
    responses(
        (status = 200, body = UpdatedResponse),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn deactivate_key(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Json(body): Json<KeyPrefixRequest>,
) -> Result<Json<UpdatedResponse>, QuotaError> {
    let service = parse_service(&service)?;
    let updated = state
        .keys
        .mark_key_inactive(service, &body.key_prefix)
        .await?;
    if updated == 0 {
        return Err(QuotaError::NotFound(format!("no {service} key matches prefix")));
    }
    Ok(Json(UpdatedResponse { updated }))
}

/// Put keys matching a prefix back into rotation
#[utoipa::path(
    post,
    path = "/keys/{service}/reactivate",
    tag = "keys",
    params(("service" = String, Path, description = "replicate, openai, stability or generic")),
    request_body = KeyPrefixRequest,
    responses(
        (status = 200, body = UpdatedResponse),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse),
    )
)]
pub async fn reactivate_key(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Json(body): Json<KeyPrefixRequest>,
) -> Result<Json<UpdatedResponse>, QuotaError> {
    let service = parse_service(&service)?;
    let updated = state.keys.reactivate_key(service, &body.key_prefix).await?;
    if updated == 0 {
        return Err(QuotaError::NotFound(format!("no {service} key matches prefix")));
    }
    Ok(Json(UpdatedResponse { updated }))
}

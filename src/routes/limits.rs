use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;
use crate::error::QuotaError;
use crate::rate_limiter::Feature;

#[derive(Serialize)]
pub struct AdmissionResponse {
    pub allowed: bool,
}

/// Admit one request for `feature` from `client_id`, or answer 429 with the wait
pub async fn check_rate_limit(
    State(state): State<Arc<AppState>>,
    Path((feature, client_id)): Path<(String, String)>,
) -> Result<Json<AdmissionResponse>, QuotaError> {
    let feature: Feature = feature.parse()?;
    state.limiters.check(feature, &client_id).await?;
    Ok(Json(AdmissionResponse { allowed: true }))
}

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::ErrorResponse;
use crate::AppState;
use crate::credits::{CreditAccount, PlanTier};
use crate::error::QuotaError;

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetPlanRequest {
    plan_tier: PlanTier,
}

/// Change a user's plan tier; the balance is refilled to the new allotment
#[utoipa::path(
    put,
    path = "/credits/{user_id}/plan",
    tag = "credits",
    params(("user_id" = String, Path, description = "User ID")),
    request_body = SetPlanRequest,
    responses(
        (status = 200, body = CreditAccount),
        (status = 400, body = ErrorResponse),
        (status = 500, body = ErrorResponse),
    )
)]
pub async fn set_plan(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<SetPlanRequest>,
) -> Result<Json<CreditAccount>, QuotaError> {
    Ok(Json(
        state.ledger.set_plan_tier(&user_id, body.plan_tier).await?,
    ))
}

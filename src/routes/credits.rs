use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AppState;
use crate::constants::DEFAULT_STATS_DAYS;
use crate::credits::{
    CreditAccount, CreditStats, GenerationType, TierRecommendation, format_credit_display,
    format_time_until_reset,
};
use crate::error::QuotaError;
use crate::timestamp_millis;

// --- Types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsResponse {
    #[serde(flatten)]
    pub account: CreditAccount,
    /// "remaining/total"
    pub display: String,
    pub resets_in: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTypeRequest {
    pub generation_type: GenerationType,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductResponse {
    pub success: bool,
    pub deduction_id: String,
    pub credits_remaining: u32,
    pub credits_charged: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub deduction_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub credits_remaining: u32,
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub days: Option<u32>,
}

// --- Handlers ---

pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<CreditsResponse>, QuotaError> {
    let now = timestamp_millis();
    let account = state.ledger.get_user_credits_at(&user_id, now).await?;
    Ok(Json(CreditsResponse {
        display: format_credit_display(&account),
        resets_in: format_time_until_reset(&account, now),
        account,
    }))
}

pub async fn deduct_credit(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<GenerationTypeRequest>,
) -> Result<Json<DeductResponse>, QuotaError> {
    let deduction = state
        .ledger
        .deduct_credit(&user_id, body.generation_type)
        .await?;
    Ok(Json(DeductResponse {
        success: true,
        deduction_id: deduction.deduction_id,
        credits_remaining: deduction.credits_remaining,
        credits_charged: deduction.credits_charged,
    }))
}

pub async fn refund_credit(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, QuotaError> {
    let credits_remaining = state
        .ledger
        .refund_credit(&user_id, &body.deduction_id)
        .await?;
    Ok(Json(RefundResponse { credits_remaining }))
}

pub async fn get_credit_stats(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<CreditStats>, QuotaError> {
    let days = query.days.unwrap_or(DEFAULT_STATS_DAYS);
    Ok(Json(state.ledger.get_credit_stats(&user_id, days).await?))
}

pub async fn get_recommendation(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<TierRecommendation>, QuotaError> {
    Ok(Json(state.ledger.get_recommended_tier(&user_id).await?))
}

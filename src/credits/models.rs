use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::constants::{
    DAY_MS, ELITE_RECOMMENDATION_THRESHOLD, ELITE_TIER_CREDITS, FREE_TIER_CREDITS,
    PRO_RECOMMENDATION_THRESHOLD, PRO_TIER_CREDITS,
};
use crate::error::QuotaError;

/// Subscription level determining the daily credit allotment
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Elite,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Elite => "elite",
        }
    }

    /// Suggested tier for an average daily credit usage
    pub fn recommended_for(daily_average: f64) -> Self {
        if daily_average >= ELITE_RECOMMENDATION_THRESHOLD {
            PlanTier::Elite
        } else if daily_average >= PRO_RECOMMENDATION_THRESHOLD {
            PlanTier::Pro
        } else {
            PlanTier::Free
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "pro" => Ok(PlanTier::Pro),
            "elite" => Ok(PlanTier::Elite),
            other => Err(QuotaError::InvalidRequest(format!(
                "unknown plan tier: {other}"
            ))),
        }
    }
}

/// Daily credit allotment per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanTable {
    pub free: u32,
    pub pro: u32,
    pub elite: u32,
}

impl PlanTable {
    pub fn credits_for(&self, tier: PlanTier) -> u32 {
        match tier {
            PlanTier::Free => self.free,
            PlanTier::Pro => self.pro,
            PlanTier::Elite => self.elite,
        }
    }
}

impl Default for PlanTable {
    fn default() -> Self {
        Self {
            free: FREE_TIER_CREDITS,
            pro: PRO_TIER_CREDITS,
            elite: ELITE_TIER_CREDITS,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationType {
    TryOn,
    OutfitSuggestion,
    StyleAnalysis,
}

impl GenerationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationType::TryOn => "try-on",
            GenerationType::OutfitSuggestion => "outfit-suggestion",
            GenerationType::StyleAnalysis => "style-analysis",
        }
    }
}

impl fmt::Display for GenerationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationType {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "try-on" => Ok(GenerationType::TryOn),
            "outfit-suggestion" => Ok(GenerationType::OutfitSuggestion),
            "style-analysis" => Ok(GenerationType::StyleAnalysis),
            other => Err(QuotaError::InvalidRequest(format!(
                "unknown generation type: {other}"
            ))),
        }
    }
}

/// Credits charged for one generation of the given type
pub fn credit_cost(generation_type: GenerationType) -> u32 {
    match generation_type {
        GenerationType::OutfitSuggestion => 0,
        GenerationType::TryOn | GenerationType::StyleAnalysis => 1,
    }
}

/// A user's daily quota. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditAccount {
    pub user_id: String,
    pub plan_tier: PlanTier,
    pub credits_remaining: u32,
    pub credits_total: u32,
    pub last_reset_at: u64,
    pub next_reset_at: u64,
}

impl CreditAccount {
    /// Fresh account with a full allotment and the next reset one day out
    pub fn new(user_id: &str, plan_tier: PlanTier, credits_total: u32, now: u64) -> Self {
        Self {
            user_id: user_id.to_string(),
            plan_tier,
            credits_remaining: credits_total,
            credits_total,
            last_reset_at: now,
            next_reset_at: now + DAY_MS,
        }
    }

    pub fn reset_due(&self, now: u64) -> bool {
        now >= self.next_reset_at
    }

    /// Reset boundaries after advancing by whole days until the next reset is
    /// in the future. One day in the common case.
    pub fn advanced_boundaries(&self, now: u64) -> (u64, u64) {
        let days = now.saturating_sub(self.next_reset_at) / DAY_MS + 1;
        (
            self.last_reset_at + days * DAY_MS,
            self.next_reset_at + days * DAY_MS,
        )
    }
}

/// Append-only audit entry for one generation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub id: String,
    pub user_id: String,
    pub generation_type: GenerationType,
    #[schema(value_type = Object)]
    pub input_data: serde_json::Value,
    pub result_reference: Option<String>,
    pub credits_charged: u32,
    pub processing_time_ms: u64,
    pub created_at: u64,
}

/// Details of a finished generation attempt, as reported by the caller
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewGeneration {
    pub user_id: String,
    pub generation_type: GenerationType,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub input_data: serde_json::Value,
    #[serde(default)]
    pub result_reference: Option<String>,
    #[serde(default)]
    pub credits_charged: u32,
    #[serde(default)]
    pub processing_time_ms: u64,
}

/// Result of a successful deduction. `deduction_id` is what a later refund
/// refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Deduction {
    pub deduction_id: String,
    pub credits_remaining: u32,
    pub credits_charged: u32,
}

/// Stored trace of one deduction, refundable at most once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionRecord {
    pub id: String,
    pub user_id: String,
    pub generation_type: GenerationType,
    pub credits_charged: u32,
    pub created_at: u64,
}

/// Outcome of claiming the refund of a deduction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundClaim {
    /// First claim; carries the amount to credit back
    Claimed(u32),
    AlreadyRefunded,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TierRecommendation {
    pub current_tier: PlanTier,
    pub recommended_tier: PlanTier,
    pub daily_average: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreditStats {
    pub total_credits_used: u64,
    pub total_generations: u64,
    #[schema(value_type = Object)]
    pub generations_by_type: BTreeMap<GenerationType, u64>,
    pub daily_average: f64,
}

impl CreditStats {
    pub fn from_records(records: &[GenerationRecord], days: u32) -> Self {
        let mut stats = CreditStats::default();
        for record in records {
            stats.total_credits_used += u64::from(record.credits_charged);
            stats.total_generations += 1;
            *stats
                .generations_by_type
                .entry(record.generation_type)
                .or_insert(0) += 1;
        }
        stats.daily_average = if days == 0 {
            0.0
        } else {
            stats.total_credits_used as f64 / f64::from(days)
        };
        stats
    }
}

/// "remaining/total", e.g. "10/10"
pub fn format_credit_display(account: &CreditAccount) -> String {
    format!("{}/{}", account.credits_remaining, account.credits_total)
}

/// Time until the account's next reset as "Xh Ym" (or "Ym" under an hour)
pub fn format_time_until_reset(account: &CreditAccount, now: u64) -> String {
    let remaining_ms = account.next_reset_at.saturating_sub(now);
    let total_minutes = remaining_ms / 60_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

//! Per-user daily credit accounting.
//!
//! Every entry point first brings the account up to date: a missing account is
//! created on the free tier, and an account whose `next_reset_at` has passed is
//! refilled before anything else is evaluated. Deductions are a single
//! conditional update in the store, so concurrent requests cannot both spend
//! the last credit.

use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{
    CreditAccount, CreditStats, Deduction, DeductionRecord, GenerationRecord, GenerationType,
    NewGeneration, PlanTable, PlanTier, RefundClaim, TierRecommendation, credit_cost,
};
use super::store::CreditStore;
use crate::cache::{TtlCache, fingerprint};
use crate::constants::{
    DAY_MS, DEFAULT_STATS_CACHE_TTL_SECS, MAX_STATS_DAYS, RECOMMENDATION_WINDOW_DAYS,
};
use crate::error::QuotaError;
use crate::timestamp_millis;

pub struct CreditLedger<S> {
    store: S,
    plans: PlanTable,
    stats_cache: TtlCache<CreditStats>,
    stats_ttl: Duration,
}

impl<S: CreditStore> CreditLedger<S> {
    pub fn new(store: S, plans: PlanTable) -> Self {
        Self {
            store,
            plans,
            stats_cache: TtlCache::new(),
            stats_ttl: Duration::from_secs(DEFAULT_STATS_CACHE_TTL_SECS),
        }
    }

    pub fn with_stats_ttl(mut self, ttl: Duration) -> Self {
        self.stats_ttl = ttl;
        self
    }

    pub fn plans(&self) -> &PlanTable {
        &self.plans
    }

    /// Current account snapshot. Creates a free-tier account on first use and
    /// applies a pending daily reset, so this is an upsert rather than a pure read.
    pub async fn get_user_credits(&self, user_id: &str) -> Result<CreditAccount, QuotaError> {
        self.get_user_credits_at(user_id, timestamp_millis()).await
    }

    pub async fn get_user_credits_at(
        &self,
        user_id: &str,
        now: u64,
    ) -> Result<CreditAccount, QuotaError> {
        validate_user_id(user_id)?;

        let account = match self.store.load_account(user_id).await? {
            Some(account) => account,
            None => {
                let fresh = CreditAccount::new(
                    user_id,
                    PlanTier::Free,
                    self.plans.credits_for(PlanTier::Free),
                    now,
                );
                info!("Created credit account for {user_id} ({})", fresh.plan_tier);
                self.store.insert_account_if_absent(&fresh, now).await?
            }
        };

        self.refresh_if_due(account, now).await
    }

    async fn refresh_if_due(
        &self,
        account: CreditAccount,
        now: u64,
    ) -> Result<CreditAccount, QuotaError> {
        if !account.reset_due(now) {
            return Ok(account);
        }

        let (last_reset_at, next_reset_at) = account.advanced_boundaries(now);
        let applied = self
            .store
            .apply_reset(
                &account.user_id,
                account.next_reset_at,
                last_reset_at,
                next_reset_at,
                now,
            )
            .await?;
        if applied {
            info!(
                "Daily credit reset for {} ({} credits)",
                account.user_id, account.credits_total
            );
        }

        // Whether this call or a concurrent one applied the reset, re-read it
        self.store
            .load_account(&account.user_id)
            .await?
            .ok_or_else(|| QuotaError::NotFound(format!("credit account {}", account.user_id)))
    }

    /// Charge one generation of `generation_type`. Fails with
    /// `InsufficientCredits` and leaves the account untouched when the balance
    /// is zero (after any due reset) or below the cost.
    pub async fn deduct_credit(
        &self,
        user_id: &str,
        generation_type: GenerationType,
    ) -> Result<Deduction, QuotaError> {
        self.deduct_credit_at(user_id, generation_type, timestamp_millis())
            .await
    }

    pub async fn deduct_credit_at(
        &self,
        user_id: &str,
        generation_type: GenerationType,
        now: u64,
    ) -> Result<Deduction, QuotaError> {
        let account = self.get_user_credits_at(user_id, now).await?;
        let cost = credit_cost(generation_type);

        match self.store.try_decrement(user_id, cost, now).await? {
            Some(credits_remaining) => {
                let record = DeductionRecord {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    generation_type,
                    credits_charged: cost,
                    created_at: now,
                };
                if let Err(e) = self.store.record_deduction(&record).await {
                    // Without a stored deduction the charge could never be refunded
                    self.store.increment_capped(user_id, cost, now).await?;
                    return Err(e);
                }

                debug!(
                    "Charged {user_id} {cost} credit(s) for {generation_type} ({}), {credits_remaining} left",
                    record.id
                );
                Ok(Deduction {
                    deduction_id: record.id,
                    credits_remaining,
                    credits_charged: cost,
                })
            }
            None => {
                let current = self.store.load_account(user_id).await?.unwrap_or(account);
                warn!(
                    "Insufficient credits for {user_id} ({generation_type}, {}/{})",
                    current.credits_remaining, current.credits_total
                );
                Err(QuotaError::InsufficientCredits {
                    remaining: current.credits_remaining,
                    next_reset_at: current.next_reset_at,
                })
            }
        }
    }

    /// Give back what a deduction charged, for a generation whose downstream
    /// call failed outright. Each deduction can be refunded once; the balance
    /// never exceeds `credits_total`. Returns the new balance.
    pub async fn refund_credit(
        &self,
        user_id: &str,
        deduction_id: &str,
    ) -> Result<u32, QuotaError> {
        self.refund_credit_at(user_id, deduction_id, timestamp_millis())
            .await
    }

    pub async fn refund_credit_at(
        &self,
        user_id: &str,
        deduction_id: &str,
        now: u64,
    ) -> Result<u32, QuotaError> {
        validate_user_id(user_id)?;

        let amount = match self.store.claim_refund(user_id, deduction_id, now).await? {
            RefundClaim::Claimed(amount) => amount,
            RefundClaim::AlreadyRefunded => {
                warn!("Refund of {deduction_id} for {user_id} rejected: already refunded");
                return Err(QuotaError::AlreadyRefunded(deduction_id.to_string()));
            }
            RefundClaim::Missing => {
                return Err(QuotaError::NotFound(format!("deduction {deduction_id}")));
            }
        };

        let remaining = self
            .store
            .increment_capped(user_id, amount, now)
            .await?
            .ok_or_else(|| QuotaError::NotFound(format!("credit account {user_id}")))?;

        info!("Refunded {amount} credit(s) to {user_id} for {deduction_id}, {remaining} left");
        Ok(remaining)
    }

    /// Move a user to another tier. The balance is refilled to the new total.
    pub async fn set_plan_tier(
        &self,
        user_id: &str,
        tier: PlanTier,
    ) -> Result<CreditAccount, QuotaError> {
        let now = timestamp_millis();
        let previous = self.get_user_credits_at(user_id, now).await?;
        let credits_total = self.plans.credits_for(tier);

        if !self.store.set_plan(user_id, tier, credits_total, now).await? {
            return Err(QuotaError::NotFound(format!("credit account {user_id}")));
        }
        info!(
            "Plan for {user_id} changed {} -> {tier} ({credits_total} credits)",
            previous.plan_tier
        );

        self.store
            .load_account(user_id)
            .await?
            .ok_or_else(|| QuotaError::NotFound(format!("credit account {user_id}")))
    }

    /// Append an audit record for a finished attempt. Independent of whether a
    /// deduction happened.
    pub async fn record_generation(
        &self,
        generation: NewGeneration,
    ) -> Result<GenerationRecord, QuotaError> {
        self.record_generation_at(generation, timestamp_millis())
            .await
    }

    pub async fn record_generation_at(
        &self,
        generation: NewGeneration,
        now: u64,
    ) -> Result<GenerationRecord, QuotaError> {
        validate_user_id(&generation.user_id)?;

        let record = GenerationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: generation.user_id,
            generation_type: generation.generation_type,
            input_data: generation.input_data,
            result_reference: generation.result_reference,
            credits_charged: generation.credits_charged,
            processing_time_ms: generation.processing_time_ms,
            created_at: now,
        };
        self.store.append_generation(&record).await?;

        debug!(
            "Recorded {} generation {} for {}",
            record.generation_type, record.id, record.user_id
        );
        Ok(record)
    }

    /// Aggregate the trailing `days` of generation records. Results are
    /// memoised for a short TTL.
    pub async fn get_credit_stats(
        &self,
        user_id: &str,
        days: u32,
    ) -> Result<CreditStats, QuotaError> {
        self.get_credit_stats_at(user_id, days, timestamp_millis())
            .await
    }

    pub async fn get_credit_stats_at(
        &self,
        user_id: &str,
        days: u32,
        now: u64,
    ) -> Result<CreditStats, QuotaError> {
        validate_user_id(user_id)?;
        if days == 0 || days > MAX_STATS_DAYS {
            return Err(QuotaError::InvalidRequest(format!(
                "days must be between 1 and {MAX_STATS_DAYS}"
            )));
        }

        let cache_key = fingerprint("credit-stats", &json!({ "userId": user_id, "days": days }));
        if let Some(stats) = self.stats_cache.get(&cache_key).await {
            return Ok(stats);
        }

        let since = now.saturating_sub(u64::from(days) * DAY_MS);
        let records = self.store.generations_since(user_id, since).await?;
        let stats = CreditStats::from_records(&records, days);

        self.stats_cache
            .set(cache_key, stats.clone(), self.stats_ttl)
            .await;
        Ok(stats)
    }

    /// Suggest a tier from the trailing week's average daily usage
    pub async fn get_recommended_tier(
        &self,
        user_id: &str,
    ) -> Result<TierRecommendation, QuotaError> {
        let now = timestamp_millis();
        let account = self.get_user_credits_at(user_id, now).await?;
        let stats = self
            .get_credit_stats_at(user_id, RECOMMENDATION_WINDOW_DAYS, now)
            .await?;

        Ok(TierRecommendation {
            current_tier: account.plan_tier,
            recommended_tier: PlanTier::recommended_for(stats.daily_average),
            daily_average: stats.daily_average,
        })
    }
}

const MAX_USER_ID_LENGTH: usize = 128;

fn validate_user_id(user_id: &str) -> Result<(), QuotaError> {
    if user_id.trim().is_empty() {
        return Err(QuotaError::InvalidRequest("user id cannot be empty".into()));
    }
    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err(QuotaError::InvalidRequest("user id too long".into()));
    }
    if user_id.chars().any(|c| c.is_control()) {
        return Err(QuotaError::InvalidRequest(
            "user id cannot contain control characters".into(),
        ));
    }
    Ok(())
}

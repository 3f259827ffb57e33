//! In-memory `CreditStore` for exercising ledger logic without a database.

use std::collections::HashMap;
use tokio::sync::Mutex;

use super::models::{CreditAccount, DeductionRecord, GenerationRecord, PlanTier, RefundClaim};
use super::store::CreditStore;
use crate::error::QuotaError;

#[derive(Default)]
pub struct MemoryCreditStore {
    accounts: Mutex<HashMap<String, CreditAccount>>,
    records: Mutex<Vec<GenerationRecord>>,
    /// Deductions by id, with their refunded flag
    deductions: Mutex<HashMap<String, (DeductionRecord, bool)>>,
}

impl MemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CreditStore for MemoryCreditStore {
    async fn load_account(&self, user_id: &str) -> Result<Option<CreditAccount>, QuotaError> {
        Ok(self.accounts.lock().await.get(user_id).cloned())
    }

    async fn insert_account_if_absent(
        &self,
        account: &CreditAccount,
        _now: u64,
    ) -> Result<CreditAccount, QuotaError> {
        let mut guard = self.accounts.lock().await;
        Ok(guard
            .entry(account.user_id.clone())
            .or_insert_with(|| account.clone())
            .clone())
    }

    async fn apply_reset(
        &self,
        user_id: &str,
        expected_next_reset: u64,
        last_reset_at: u64,
        next_reset_at: u64,
        _now: u64,
    ) -> Result<bool, QuotaError> {
        let mut guard = self.accounts.lock().await;
        match guard.get_mut(user_id) {
            Some(account) if account.next_reset_at == expected_next_reset => {
                account.credits_remaining = account.credits_total;
                account.last_reset_at = last_reset_at;
                account.next_reset_at = next_reset_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_decrement(
        &self,
        user_id: &str,
        cost: u32,
        _now: u64,
    ) -> Result<Option<u32>, QuotaError> {
        let mut guard = self.accounts.lock().await;
        match guard.get_mut(user_id) {
            Some(account) if account.credits_remaining > 0 && account.credits_remaining >= cost => {
                account.credits_remaining -= cost;
                Ok(Some(account.credits_remaining))
            }
            _ => Ok(None),
        }
    }

    async fn increment_capped(
        &self,
        user_id: &str,
        amount: u32,
        _now: u64,
    ) -> Result<Option<u32>, QuotaError> {
        let mut guard = self.accounts.lock().await;
        Ok(guard.get_mut(user_id).map(|account| {
            account.credits_remaining = account
                .credits_remaining
                .saturating_add(amount)
                .min(account.credits_total);
            account.credits_remaining
        }))
    }

    async fn set_plan(
        &self,
        user_id: &str,
        tier: PlanTier,
        credits_total: u32,
        _now: u64,
    ) -> Result<bool, QuotaError> {
        let mut guard = self.accounts.lock().await;
        Ok(guard
            .get_mut(user_id)
            .map(|account| {
                account.plan_tier = tier;
                account.credits_total = credits_total;
                account.credits_remaining = credits_total;
            })
            .is_some())
    }

    async fn record_deduction(&self, record: &DeductionRecord) -> Result<(), QuotaError> {
        self.deductions
            .lock()
            .await
            .insert(record.id.clone(), (record.clone(), false));
        Ok(())
    }

    async fn claim_refund(
        &self,
        user_id: &str,
        deduction_id: &str,
        _now: u64,
    ) -> Result<RefundClaim, QuotaError> {
        let mut guard = self.deductions.lock().await;
        Ok(match guard.get_mut(deduction_id) {
            Some((record, refunded)) if record.user_id == user_id => {
                if *refunded {
                    RefundClaim::AlreadyRefunded
                } else {
                    *refunded = true;
                    RefundClaim::Claimed(record.credits_charged)
                }
            }
            _ => RefundClaim::Missing,
        })
    }

    async fn append_generation(&self, record: &GenerationRecord) -> Result<(), QuotaError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn generations_since(
        &self,
        user_id: &str,
        since: u64,
    ) -> Result<Vec<GenerationRecord>, QuotaError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.user_id == user_id && r.created_at >= since)
            .cloned()
            .collect())
    }
}

//! Persistence contract for the credit ledger and its turso implementation.
//!
//! The ledger relies on two atomic primitives from the store: a conditional
//! reset keyed on the previously observed boundary, and a single-statement
//! decrement that only succeeds while credits remain.

use std::future::Future;
use turso::Row;

use super::models::{
    CreditAccount, DeductionRecord, GenerationRecord, GenerationType, PlanTier, RefundClaim,
};
use crate::db::{Db, get_u32, get_u64, opt_string};
use crate::error::QuotaError;

pub trait CreditStore: Send + Sync {
    fn load_account(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<CreditAccount>, QuotaError>> + Send;

    /// Insert the account unless one already exists, then return the stored row.
    fn insert_account_if_absent(
        &self,
        account: &CreditAccount,
        now: u64,
    ) -> impl Future<Output = Result<CreditAccount, QuotaError>> + Send;

    /// Refill to `credits_total` and move the boundaries, only if the stored
    /// `next_reset_at` still equals `expected_next_reset`.
    fn apply_reset(
        &self,
        user_id: &str,
        expected_next_reset: u64,
        last_reset_at: u64,
        next_reset_at: u64,
        now: u64,
    ) -> impl Future<Output = Result<bool, QuotaError>> + Send;

    /// Subtract `cost` when `credits_remaining > 0 && credits_remaining >= cost`.
    /// Returns the new remaining balance, or None if nothing was deducted.
    fn try_decrement(
        &self,
        user_id: &str,
        cost: u32,
        now: u64,
    ) -> impl Future<Output = Result<Option<u32>, QuotaError>> + Send;

    /// Add `amount`, capped at `credits_total`. None if the account is missing.
    fn increment_capped(
        &self,
        user_id: &str,
        amount: u32,
        now: u64,
    ) -> impl Future<Output = Result<Option<u32>, QuotaError>> + Send;

    /// Switch tier and refill to the new total. Returns false if missing.
    fn set_plan(
        &self,
        user_id: &str,
        tier: PlanTier,
        credits_total: u32,
        now: u64,
    ) -> impl Future<Output = Result<bool, QuotaError>> + Send;

    /// Persist the trace of a deduction so it can be refunded later
    fn record_deduction(
        &self,
        record: &DeductionRecord,
    ) -> impl Future<Output = Result<(), QuotaError>> + Send;

    /// Flag a deduction as refunded unless it already is. Only the first claim
    /// for a deduction returns `Claimed`.
    fn claim_refund(
        &self,
        user_id: &str,
        deduction_id: &str,
        now: u64,
    ) -> impl Future<Output = Result<RefundClaim, QuotaError>> + Send;

    fn append_generation(
        &self,
        record: &GenerationRecord,
    ) -> impl Future<Output = Result<(), QuotaError>> + Send;

    /// Records for a user created at or after `since`, oldest first
    fn generations_since(
        &self,
        user_id: &str,
        since: u64,
    ) -> impl Future<Output = Result<Vec<GenerationRecord>, QuotaError>> + Send;
}

const ACCOUNT_COLUMNS: &str =
    "user_id, plan_tier, credits_remaining, credits_total, last_reset_at, next_reset_at";

fn account_from_row(row: &Row) -> Result<CreditAccount, QuotaError> {
    let user_id = row
        .get::<String>(0)
        .map_err(|e| QuotaError::DatabaseError(format!("Failed to read user_id: {e}")))?;
    let plan_tier = row
        .get::<String>(1)
        .map_err(|e| QuotaError::DatabaseError(format!("Failed to read plan_tier: {e}")))?
        .parse::<PlanTier>()
        .map_err(|e| QuotaError::DatabaseError(format!("Stored plan for {user_id}: {e}")))?;

    Ok(CreditAccount {
        plan_tier,
        credits_remaining: get_u32(row, 2)?,
        credits_total: get_u32(row, 3)?,
        last_reset_at: get_u64(row, 4),
        next_reset_at: get_u64(row, 5),
        user_id,
    })
}

fn record_from_row(row: &Row) -> Result<GenerationRecord, QuotaError> {
    let text = |idx: usize, name: &str| {
        row.get::<String>(idx)
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to read {name}: {e}")))
    };

    let id = text(0, "id")?;
    let generation_type = text(2, "generation_type")?
        .parse::<GenerationType>()
        .map_err(|e| QuotaError::DatabaseError(format!("Generation record {id}: {e}")))?;
    let input_data = serde_json::from_str(&text(3, "input_data")?).map_err(|e| {
        QuotaError::DatabaseError(format!("Generation record {id} has corrupt input data: {e}"))
    })?;

    Ok(GenerationRecord {
        user_id: text(1, "user_id")?,
        generation_type,
        input_data,
        result_reference: opt_string(row, 4),
        credits_charged: get_u32(row, 5)?,
        processing_time_ms: get_u64(row, 6),
        created_at: get_u64(row, 7),
        id,
    })
}

/// `CreditStore` backed by the embedded SQL database
#[derive(Clone)]
pub struct SqlCreditStore {
    db: Db,
}

impl SqlCreditStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn read_remaining(&self, user_id: &str) -> Result<Option<u32>, QuotaError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT credits_remaining FROM credit_accounts WHERE user_id = ?",
                [user_id],
            )
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to read credits: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to read credits row: {e}")))?;
        row.map(|r| get_u32(&r, 0)).transpose()
    }
}

impl CreditStore for SqlCreditStore {
    async fn load_account(&self, user_id: &str) -> Result<Option<CreditAccount>, QuotaError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM credit_accounts WHERE user_id = ?"),
                [user_id],
            )
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to load account: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to read account row: {e}")))?
        {
            Some(row) => account_from_row(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn insert_account_if_absent(
        &self,
        account: &CreditAccount,
        now: u64,
    ) -> Result<CreditAccount, QuotaError> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO credit_accounts (user_id, plan_tier, credits_remaining, credits_total, last_reset_at, next_reset_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                account.user_id.as_str(),
                account.plan_tier.as_str(),
                i64::from(account.credits_remaining),
                i64::from(account.credits_total),
                account.last_reset_at as i64,
                account.next_reset_at as i64,
                now as i64,
                now as i64,
            ),
        )
        .await
        .map_err(|e| QuotaError::DatabaseError(format!("Failed to create account: {e}")))?;

        self.load_account(&account.user_id)
            .await?
            .ok_or_else(|| QuotaError::DatabaseError("Account missing after insert".into()))
    }

    async fn apply_reset(
        &self,
        user_id: &str,
        expected_next_reset: u64,
        last_reset_at: u64,
        next_reset_at: u64,
        now: u64,
    ) -> Result<bool, QuotaError> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "UPDATE credit_accounts SET credits_remaining = credits_total, last_reset_at = ?, next_reset_at = ?, updated_at = ? WHERE user_id = ? AND next_reset_at = ?",
                (
                    last_reset_at as i64,
                    next_reset_at as i64,
                    now as i64,
                    user_id,
                    expected_next_reset as i64,
                ),
            )
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to reset credits: {e}")))?;
        Ok(affected > 0)
    }

    async fn try_decrement(
        &self,
        user_id: &str,
        cost: u32,
        now: u64,
    ) -> Result<Option<u32>, QuotaError> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "UPDATE credit_accounts SET credits_remaining = credits_remaining - ?1, updated_at = ?2 WHERE user_id = ?3 AND credits_remaining > 0 AND credits_remaining >= ?1",
                (i64::from(cost), now as i64, user_id),
            )
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to deduct credit: {e}")))?;

        if affected == 0 {
            return Ok(None);
        }
        self.read_remaining(user_id).await
    }

    async fn increment_capped(
        &self,
        user_id: &str,
        amount: u32,
        now: u64,
    ) -> Result<Option<u32>, QuotaError> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "UPDATE credit_accounts SET credits_remaining = MIN(credits_total, credits_remaining + ?1), updated_at = ?2 WHERE user_id = ?3",
                (i64::from(amount), now as i64, user_id),
            )
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to refund credit: {e}")))?;

        if affected == 0 {
            return Ok(None);
        }
        self.read_remaining(user_id).await
    }

    async fn set_plan(
        &self,
        user_id: &str,
        tier: PlanTier,
        credits_total: u32,
        now: u64,
    ) -> Result<bool, QuotaError> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "UPDATE credit_accounts SET plan_tier = ?1, credits_total = ?2, credits_remaining = ?2, updated_at = ?3 WHERE user_id = ?4",
                (tier.as_str(), i64::from(credits_total), now as i64, user_id),
            )
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to update plan: {e}")))?;
        Ok(affected > 0)
    }

    async fn record_deduction(&self, record: &DeductionRecord) -> Result<(), QuotaError> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO credit_deductions (id, user_id, generation_type, credits_charged, created_at) VALUES (?, ?, ?, ?, ?)",
            (
                record.id.as_str(),
                record.user_id.as_str(),
                record.generation_type.as_str(),
                i64::from(record.credits_charged),
                record.created_at as i64,
            ),
        )
        .await
        .map_err(|e| QuotaError::DatabaseError(format!("Failed to record deduction: {e}")))?;
        Ok(())
    }

    async fn claim_refund(
        &self,
        user_id: &str,
        deduction_id: &str,
        now: u64,
    ) -> Result<RefundClaim, QuotaError> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "UPDATE credit_deductions SET refunded = 1, refunded_at = ?1 WHERE id = ?2 AND user_id = ?3 AND refunded = 0",
                (now as i64, deduction_id, user_id),
            )
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to claim refund: {e}")))?;

        let mut rows = conn
            .query(
                "SELECT credits_charged FROM credit_deductions WHERE id = ? AND user_id = ?",
                (deduction_id, user_id),
            )
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to read deduction: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| QuotaError::DatabaseError(format!("Failed to read deduction row: {e}")))?;

        Ok(match row {
            Some(row) if affected > 0 => RefundClaim::Claimed(get_u32(&row, 0)?),
            Some(_) => RefundClaim::AlreadyRefunded,
            None => RefundClaim::Missing,
        })
    }

    async fn append_generation(&self, record: &GenerationRecord) -> Result<(), QuotaError> {
        let conn = self.db.connect()?;
        let input_data = serde_json::to_string(&record.input_data)
            .map_err(|e| QuotaError::InvalidRequest(format!("Unserializable input data: {e}")))?;

        conn.execute(
            "INSERT INTO generation_records (id, user_id, generation_type, input_data, result_reference, credits_charged, processing_time_ms, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                record.id.as_str(),
                record.user_id.as_str(),
                record.generation_type.as_str(),
                input_data,
                record.result_reference.clone(),
                i64::from(record.credits_charged),
                record.processing_time_ms as i64,
                record.created_at as i64,
            ),
        )
        .await
        .map_err(|e| QuotaError::DatabaseError(format!("Failed to insert generation record: {e}")))?;
        Ok(())
    }

    async fn generations_since(
        &self,
        user_id: &str,
        since: u64,
    ) -> Result<Vec<GenerationRecord>, QuotaError> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT id, user_id, generation_type, input_data, result_reference, credits_charged, processing_time_ms, created_at FROM generation_records WHERE user_id = ? AND created_at >= ? ORDER BY created_at",
                (user_id, since as i64),
            )
            .await
            .map_err(|e| {
                QuotaError::DatabaseError(format!("Failed to query generation records: {e}"))
            })?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| {
            QuotaError::DatabaseError(format!("Failed to read generation record: {e}"))
        })? {
            records.push(record_from_row(&row)?);
        }
        Ok(records)
    }
}

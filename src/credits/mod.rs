pub mod ledger;
#[cfg(test)]
mod memory;
pub mod models;
pub mod store;

pub use ledger::CreditLedger;
pub use models::{
    CreditAccount, CreditStats, Deduction, DeductionRecord, GenerationRecord, GenerationType,
    NewGeneration, PlanTable, PlanTier, RefundClaim, TierRecommendation, credit_cost,
    format_credit_display, format_time_until_reset,
};
pub use store::{CreditStore, SqlCreditStore};

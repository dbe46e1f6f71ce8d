//! Budget module - cost tracking, model pricing and retry policy.
//!
//! # Key Concepts
//! - Pricing: per-model rates per 1K tokens, pre-call estimates
//! - Ledger: append-only durable cost records, replayed at startup
//! - Manager: spend totals, allocation and HARD/SUGGESTED enforcement
//! - Allocation: algorithms for distributing budget across playlists
//! - Retry: bounded exponential backoff around a single call

mod allocation;
mod ledger;
mod manager;
mod pricing;
mod retry;

pub use allocation::{allocate_budget, AllocationStrategy};
pub use ledger::{CostRecord, JsonlLedger, Ledger, LedgerError, MemoryLedger, SqliteLedger};
pub use manager::{
    BudgetAlert, BudgetError, BudgetManager, BudgetMode, BudgetSettings, BudgetSummary,
    IdentifierSummary, TrackedUsage, EARLY_WARNING_RATIO,
};
pub use pricing::{CostEstimate, ModelPricing, PricingInfo};
pub use retry::{RetryConfig, Sleeper, TokioSleeper};

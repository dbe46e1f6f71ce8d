//! Process-wide spend ledger with per-identifier allocations.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::allocation::{allocate_budget, AllocationStrategy};
use super::ledger::{CostRecord, Ledger, LedgerError};
use super::pricing::ModelPricing;

/// Fraction of the total budget that triggers the early warning.
pub const EARLY_WARNING_RATIO: f64 = 0.80;

/// Budget errors.
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Budget exceeded for {scope}: attempted ${attempted:.4}, allowed ${allowed:.4}")]
    Exceeded {
        scope: String,
        attempted: f64,
        allowed: f64,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Budget state lock poisoned")]
    LockPoisoned,
}

/// Enforcement mode for spend limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    /// Overruns raise [`BudgetError::Exceeded`]
    #[default]
    Hard,
    /// Overruns only warn
    Suggested,
}

impl fmt::Display for BudgetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hard => write!(f, "hard"),
            Self::Suggested => write!(f, "suggested"),
        }
    }
}

impl FromStr for BudgetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hard" => Ok(Self::Hard),
            "suggested" => Ok(Self::Suggested),
            other => Err(format!(
                "Invalid budget mode '{}'. Must be 'hard' or 'suggested'.",
                other
            )),
        }
    }
}

/// Budget configuration consumed by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub total_budget: f64,
    pub mode: BudgetMode,
    pub strategy: AllocationStrategy,
    pub weights: HashMap<String, f64>,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            total_budget: 10.0,
            mode: BudgetMode::Hard,
            strategy: AllocationStrategy::Equal,
            weights: HashMap::new(),
        }
    }
}

/// Limit conditions observed while tracking one usage event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetAlert {
    /// Total spend crossed [`EARLY_WARNING_RATIO`] of the total budget.
    ApproachingTotal { spent: f64, total: f64 },
    /// An identifier's spend exceeded its allocation.
    AllocationExceeded {
        identifier: String,
        attempted: f64,
        allowed: f64,
    },
    /// Total spend exceeded the total budget.
    TotalExceeded { attempted: f64, allowed: f64 },
}

/// Result of tracking one usage event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedUsage {
    pub cost_usd: f64,
    pub alerts: Vec<BudgetAlert>,
}

/// Per-identifier view in a [`BudgetSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentifierSummary {
    pub allocated: Option<f64>,
    pub spent: f64,
    pub remaining: f64,
}

/// Snapshot of the budget state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetSummary {
    pub total_budget: f64,
    pub total_spent: f64,
    pub remaining: f64,
    pub utilization: f64,
    pub mode: BudgetMode,
    pub strategy: AllocationStrategy,
    pub record_count: usize,
    pub identifiers: HashMap<String, IdentifierSummary>,
}

struct BudgetState {
    settings: BudgetSettings,
    allocations: HashMap<String, f64>,
    spent: HashMap<String, f64>,
    total_spent: f64,
    record_count: usize,
    ledger: Box<dyn Ledger>,
}

impl BudgetState {
    fn remaining_for(&self, identifier: &str) -> f64 {
        let total_remaining = (self.settings.total_budget - self.total_spent).max(0.0);
        match self.allocations.get(identifier) {
            Some(allocated) => {
                let spent = self.spent.get(identifier).copied().unwrap_or(0.0);
                (allocated - spent).max(0.0).min(total_remaining)
            }
            None => total_remaining,
        }
    }
}

/// Spend ledger and limit enforcement shared by every selection loop.
///
/// # Thread Safety
/// All state, including the ledger, sits behind one mutex so that
/// append + recompute + limit check is a single critical section.
pub struct BudgetManager {
    pricing: Arc<ModelPricing>,
    state: Mutex<BudgetState>,
}

impl BudgetManager {
    /// Create a manager and rebuild spend by replaying every ledger record.
    pub fn open(
        settings: BudgetSettings,
        pricing: Arc<ModelPricing>,
        ledger: Box<dyn Ledger>,
    ) -> Result<Self, BudgetError> {
        let records = ledger.replay()?;

        let mut spent: HashMap<String, f64> = HashMap::new();
        let mut total_spent = 0.0;
        for record in &records {
            *spent.entry(record.agent_id.clone()).or_insert(0.0) += record.cost_usd;
            total_spent += record.cost_usd;
        }

        tracing::info!(
            records = records.len(),
            total_spent,
            total_budget = settings.total_budget,
            mode = %settings.mode,
            "Budget manager restored from cost ledger"
        );

        Ok(Self {
            pricing,
            state: Mutex::new(BudgetState {
                settings,
                allocations: HashMap::new(),
                spent,
                total_spent,
                record_count: records.len(),
                ledger,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, BudgetState>, BudgetError> {
        self.state.lock().map_err(|_| BudgetError::LockPoisoned)
    }

    pub fn pricing(&self) -> &ModelPricing {
        &self.pricing
    }

    pub fn mode(&self) -> Result<BudgetMode, BudgetError> {
        Ok(self.lock()?.settings.mode)
    }

    /// Record one usage event and enforce limits.
    ///
    /// The record is durable before spend counters move. Under
    /// [`BudgetMode::Hard`] an overrun returns [`BudgetError::Exceeded`] after
    /// the record is written; under [`BudgetMode::Suggested`] it only warns.
    pub fn track_usage(
        &self,
        identifier: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        operation: &str,
    ) -> Result<TrackedUsage, BudgetError> {
        let cost = self.pricing.actual_cost(input_tokens, output_tokens, model);
        let record = CostRecord::new(identifier, model, input_tokens, output_tokens, cost, operation);

        let mut state = self.lock()?;
        state.ledger.append(&record)?;

        let previous_total = state.total_spent;
        let identifier_spent = {
            let entry = state.spent.entry(identifier.to_string()).or_insert(0.0);
            *entry += cost;
            *entry
        };
        state.total_spent += cost;
        state.record_count += 1;

        let total_budget = state.settings.total_budget;
        let mode = state.settings.mode;
        let mut alerts = Vec::new();

        let warn_at = total_budget * EARLY_WARNING_RATIO;
        if previous_total < warn_at && state.total_spent >= warn_at {
            tracing::warn!(
                spent = state.total_spent,
                total = total_budget,
                "Cost budget is {:.0}% used",
                state.total_spent / total_budget * 100.0
            );
            alerts.push(BudgetAlert::ApproachingTotal {
                spent: state.total_spent,
                total: total_budget,
            });
        }

        let mut exceeded: Option<BudgetError> = None;

        if let Some(&allowed) = state.allocations.get(identifier) {
            if identifier_spent > allowed {
                alerts.push(BudgetAlert::AllocationExceeded {
                    identifier: identifier.to_string(),
                    attempted: identifier_spent,
                    allowed,
                });
                exceeded = Some(BudgetError::Exceeded {
                    scope: identifier.to_string(),
                    attempted: identifier_spent,
                    allowed,
                });
            }
        }

        if state.total_spent > total_budget {
            alerts.push(BudgetAlert::TotalExceeded {
                attempted: state.total_spent,
                allowed: total_budget,
            });
            exceeded.get_or_insert(BudgetError::Exceeded {
                scope: "total".to_string(),
                attempted: state.total_spent,
                allowed: total_budget,
            });
        }

        drop(state);

        match (mode, exceeded) {
            (BudgetMode::Hard, Some(error)) => {
                tracing::error!(identifier, cost, "{}", error);
                Err(error)
            }
            (BudgetMode::Suggested, Some(error)) => {
                tracing::warn!(identifier, cost, "Suggested budget overrun: {}", error);
                Ok(TrackedUsage {
                    cost_usd: cost,
                    alerts,
                })
            }
            (_, None) => {
                tracing::debug!(identifier, model, input_tokens, output_tokens, cost, operation, "Tracked usage");
                Ok(TrackedUsage {
                    cost_usd: cost,
                    alerts,
                })
            }
        }
    }

    /// Split the total budget across `identifiers` using the configured strategy.
    ///
    /// Replaces any previous allocation map.
    pub fn allocate(&self, identifiers: &[String]) -> Result<HashMap<String, f64>, BudgetError> {
        let mut state = self.lock()?;
        let allocations = allocate_budget(
            state.settings.total_budget,
            identifiers,
            state.settings.strategy,
            &state.settings.weights,
        );
        tracing::info!(
            strategy = %state.settings.strategy,
            identifiers = allocations.len(),
            "Allocated cost budget"
        );
        state.allocations = allocations.clone();
        Ok(allocations)
    }

    /// Replace the weight map used by [`AllocationStrategy::Dynamic`].
    pub fn set_weights(&self, weights: HashMap<String, f64>) -> Result<(), BudgetError> {
        self.lock()?.settings.weights = weights;
        Ok(())
    }

    /// Budget still available to `identifier`.
    ///
    /// Without an allocation this is the remaining total budget.
    pub fn remaining(&self, identifier: &str) -> Result<f64, BudgetError> {
        Ok(self.lock()?.remaining_for(identifier))
    }

    pub fn total_spent(&self) -> Result<f64, BudgetError> {
        Ok(self.lock()?.total_spent)
    }

    pub fn spent(&self, identifier: &str) -> Result<f64, BudgetError> {
        Ok(self
            .lock()?
            .spent
            .get(identifier)
            .copied()
            .unwrap_or(0.0))
    }

    pub fn summary(&self) -> Result<BudgetSummary, BudgetError> {
        let state = self.lock()?;
        let total = state.settings.total_budget;

        let mut identifiers = HashMap::new();
        for id in state.allocations.keys().chain(state.spent.keys()) {
            if identifiers.contains_key(id) {
                continue;
            }
            identifiers.insert(
                id.clone(),
                IdentifierSummary {
                    allocated: state.allocations.get(id).copied(),
                    spent: state.spent.get(id).copied().unwrap_or(0.0),
                    remaining: state.remaining_for(id),
                },
            );
        }

        Ok(BudgetSummary {
            total_budget: total,
            total_spent: state.total_spent,
            remaining: (total - state.total_spent).max(0.0),
            utilization: if total > 0.0 {
                state.total_spent / total
            } else {
                0.0
            },
            mode: state.settings.mode,
            strategy: state.settings.strategy,
            record_count: state.record_count,
            identifiers,
        })
    }

    /// Erase all cost history. Allocations are kept.
    pub fn reset_history(&self) -> Result<(), BudgetError> {
        let mut state = self.lock()?;
        state.ledger.clear()?;
        state.spent.clear();
        state.total_spent = 0.0;
        state.record_count = 0;
        tracing::warn!("Cost history reset");
        Ok(())
    }
}

//! Selection context - collaborators shared by every playlist loop.

use std::sync::Arc;

use crate::budget::{BudgetManager, ModelPricing, Sleeper, TokioSleeper};
use crate::config::Config;
use crate::llm::LlmClient;
use crate::tools::ToolRegistry;

/// Shared context passed to the transport and controllers.
///
/// # Thread Safety
/// Context is wrapped in Arc for sharing across async tasks.
/// The budget manager serializes its own updates.
pub struct AgentContext {
    /// Application configuration
    pub config: Config,

    /// Reasoning-service client
    pub llm: Arc<dyn LlmClient>,

    /// Catalog tools offered to the reasoning service
    pub tools: Arc<ToolRegistry>,

    /// Model pricing information
    pub pricing: Arc<ModelPricing>,

    /// Spend ledger shared by every playlist in the process
    pub budget: Arc<BudgetManager>,

    /// Backoff sleeper used by the retry policy
    pub sleeper: Arc<dyn Sleeper>,
}

impl AgentContext {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        pricing: Arc<ModelPricing>,
        budget: Arc<BudgetManager>,
    ) -> Self {
        Self {
            config,
            llm,
            tools: Arc::new(tools),
            pricing,
            budget,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

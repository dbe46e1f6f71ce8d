//! Configuration management.
//!
//! Values come from an optional YAML file, then environment variables
//! override individual fields:
//! - `PLAYLIST_AGENT_MODEL` - reasoning-service model id
//! - `OPENROUTER_API_KEY` - API key for the reasoning service
//! - `OPENROUTER_BASE_URL` - override the OpenRouter base URL
//! - `CATALOG_ENDPOINT` - base URL of the catalog tool service
//! - `COST_LEDGER_PATH` - cost ledger location
//! - `COST_LEDGER_BACKEND` - `jsonl` or `sqlite`
//! - `MAX_RELAXATION_ITERATIONS` - relaxation iterations after the first attempt
//! - `SATISFACTION_THRESHOLD` - score at which relaxation stops
//! - `REQUEST_TIMEOUT_SECS` - per-call wall-clock bound
//! - `MAX_COST_PER_REQUEST` - per-call spend cap
//! - `TOTAL_BUDGET` - aggregate spend cap
//! - `BUDGET_MODE` - `hard` or `suggested`
//! - `ALLOCATION_STRATEGY` - `equal` or `dynamic`

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::budget::{
    BudgetSettings, JsonlLedger, Ledger, LedgerError, RetryConfig, SqliteLedger,
};
use crate::llm::OpenRouterClient;
use crate::tools::{CatalogEndpoint, ToolRegistry};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },

    #[error("Missing required value: {0}")]
    Missing(&'static str),
}

fn invalid(name: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Durable store behind the cost ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Jsonl,
    Sqlite,
}

impl fmt::Display for LedgerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jsonl => write!(f, "jsonl"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jsonl" => Ok(Self::Jsonl),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!(
                "Invalid ledger backend '{}'. Must be 'jsonl' or 'sqlite'.",
                other
            )),
        }
    }
}

/// Backoff settings in seconds, as written in config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reasoning-service model id (OpenRouter format)
    pub model: String,

    /// Never serialized back out
    #[serde(skip_serializing)]
    pub openrouter_api_key: Option<String>,

    pub openrouter_base_url: String,

    /// Base URL of the catalog tool service. Without it every selection fails.
    pub catalog_endpoint: Option<String>,

    pub ledger_path: PathBuf,

    pub ledger_backend: LedgerBackend,

    /// Relaxation iterations after the unrelaxed attempt
    pub max_iterations: u32,

    pub satisfaction_threshold: f64,

    pub request_timeout_secs: u64,

    pub max_cost_per_request: f64,

    /// Tool-calling rounds allowed in one call
    pub max_tool_rounds: usize,

    pub budget: BudgetSettings,

    pub retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4.5".to_string(),
            openrouter_api_key: None,
            openrouter_base_url: crate::llm::DEFAULT_BASE_URL.to_string(),
            catalog_endpoint: None,
            ledger_path: PathBuf::from("data/cost_ledger.jsonl"),
            ledger_backend: LedgerBackend::Jsonl,
            max_iterations: 3,
            satisfaction_threshold: 0.80,
            request_timeout_secs: 120,
            max_cost_per_request: 1.0,
            max_tool_rounds: 8,
            budget: BudgetSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

fn parse_env<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(name, e.to_string()))
}

impl Config {
    /// Parse a YAML document. Missing fields take defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Optional YAML file, then environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PLAYLIST_AGENT_MODEL") {
            self.model = v;
        }
        if let Some(v) = get("OPENROUTER_API_KEY") {
            self.openrouter_api_key = Some(v);
        }
        if let Some(v) = get("OPENROUTER_BASE_URL") {
            self.openrouter_base_url = v;
        }
        if let Some(v) = get("CATALOG_ENDPOINT") {
            self.catalog_endpoint = Some(v);
        }
        if let Some(v) = get("COST_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = get("COST_LEDGER_BACKEND") {
            self.ledger_backend = parse_env("COST_LEDGER_BACKEND", &v)?;
        }
        if let Some(v) = get("MAX_RELAXATION_ITERATIONS") {
            self.max_iterations = parse_env("MAX_RELAXATION_ITERATIONS", &v)?;
        }
        if let Some(v) = get("SATISFACTION_THRESHOLD") {
            self.satisfaction_threshold = parse_env("SATISFACTION_THRESHOLD", &v)?;
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("MAX_COST_PER_REQUEST") {
            self.max_cost_per_request = parse_env("MAX_COST_PER_REQUEST", &v)?;
        }
        if let Some(v) = get("TOTAL_BUDGET") {
            self.budget.total_budget = parse_env("TOTAL_BUDGET", &v)?;
        }
        if let Some(v) = get("BUDGET_MODE") {
            self.budget.mode = parse_env("BUDGET_MODE", &v)?;
        }
        if let Some(v) = get("ALLOCATION_STRATEGY") {
            self.budget.strategy = parse_env("ALLOCATION_STRATEGY", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(invalid("model", "must not be empty"));
        }
        if !self.budget.total_budget.is_finite() || self.budget.total_budget <= 0.0 {
            return Err(invalid("budget.total_budget", "must be positive"));
        }
        if !self.max_cost_per_request.is_finite() || self.max_cost_per_request <= 0.0 {
            return Err(invalid("max_cost_per_request", "must be positive"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.satisfaction_threshold) {
            return Err(invalid("satisfaction_threshold", "must be within [0, 1]"));
        }
        if self.max_tool_rounds == 0 {
            return Err(invalid("max_tool_rounds", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_secs < 0.0 || self.retry.max_delay_secs < self.retry.base_delay_secs {
            return Err(invalid(
                "retry",
                "delays must satisfy 0 <= base_delay_secs <= max_delay_secs",
            ));
        }
        for (id, weight) in &self.budget.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(invalid(&format!("budget.weights.{}", id), "must be non-negative"));
            }
        }
        if let Some(endpoint) = &self.catalog_endpoint {
            url::Url::parse(endpoint).map_err(|e| invalid("catalog_endpoint", e.to_string()))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry.max_attempts,
            Duration::from_secs_f64(self.retry.base_delay_secs.max(0.0)),
            Duration::from_secs_f64(self.retry.max_delay_secs.max(0.0)),
        )
    }

    /// Open the configured cost ledger.
    pub fn open_ledger(&self) -> Result<Box<dyn Ledger>, LedgerError> {
        Ok(match self.ledger_backend {
            LedgerBackend::Jsonl => Box::new(JsonlLedger::open(&self.ledger_path)?),
            LedgerBackend::Sqlite => Box::new(SqliteLedger::open(&self.ledger_path)?),
        })
    }

    /// Tool registry bound to the configured catalog endpoint, if any.
    pub fn tool_registry(&self) -> Result<ToolRegistry, ConfigError> {
        let endpoint = match &self.catalog_endpoint {
            Some(raw) => Some(
                CatalogEndpoint::parse(raw, self.request_timeout())
                    .map_err(|e| invalid("catalog_endpoint", e.to_string()))?,
            ),
            None => None,
        };
        Ok(ToolRegistry::new(endpoint))
    }

    pub fn openrouter_client(&self) -> Result<OpenRouterClient, ConfigError> {
        let key = self
            .openrouter_api_key
            .clone()
            .ok_or(ConfigError::Missing("OPENROUTER_API_KEY"))?;
        Ok(OpenRouterClient::with_base_url(key, &self.openrouter_base_url))
    }
}

//! Request, response and error types shared by the selection engine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::budget::BudgetError;
use crate::criteria::{CriteriaError, SelectionCriteria};
use crate::tools::{ToolError, DEFAULT_TOOL_NAMES};

/// Errors from one selection attempt.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Estimated or actual spend over the allowed amount. Never retried.
    #[error("Cost exceeded for {scope}: ${attempted:.4} > ${allowed:.4}")]
    CostExceeded {
        scope: String,
        attempted: f64,
        allowed: f64,
    },

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Reasoning service call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Response parsed but contained no usable tracks.
    #[error("No matching tracks returned")]
    NoMatch,

    #[error("Reasoning service error: {0}")]
    Service(String),

    #[error("Cost ledger error: {0}")]
    Ledger(String),

    #[error("Invalid selection request: {0}")]
    InvalidRequest(String),
}

impl SelectionError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::MalformedResponse(_) | Self::NoMatch | Self::Service(_)
        )
    }

    /// Whether the whole relaxation loop must stop.
    ///
    /// `ToolUnavailable` ends only the current attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CostExceeded { .. } | Self::Ledger(_) | Self::InvalidRequest(_)
        )
    }
}

impl From<BudgetError> for SelectionError {
    fn from(e: BudgetError) -> Self {
        match e {
            BudgetError::Exceeded {
                scope,
                attempted,
                allowed,
            } => Self::CostExceeded {
                scope,
                attempted,
                allowed,
            },
            other => Self::Ledger(other.to_string()),
        }
    }
}

impl From<ToolError> for SelectionError {
    fn from(e: ToolError) -> Self {
        Self::ToolUnavailable(e.to_string())
    }
}

impl From<CriteriaError> for SelectionError {
    fn from(e: CriteriaError) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

/// One call's worth of instructions for the reasoning service.
///
/// Built once per attempt and never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionRequest {
    pub id: Uuid,
    pub playlist_id: String,
    pub criteria: SelectionCriteria,
    pub target_count: usize,
    pub tools: Vec<String>,
    pub prompt_override: Option<String>,
    pub max_cost: f64,
    pub timeout: Duration,
}

impl SelectionRequest {
    pub fn new(
        playlist_id: impl Into<String>,
        criteria: SelectionCriteria,
        target_count: usize,
        max_cost: f64,
        timeout: Duration,
    ) -> Result<Self, SelectionError> {
        let playlist_id = playlist_id.into();
        if playlist_id.trim().is_empty() {
            return Err(SelectionError::InvalidRequest(
                "playlist id must not be empty".to_string(),
            ));
        }
        if target_count == 0 {
            return Err(SelectionError::InvalidRequest(
                "target count must be greater than zero".to_string(),
            ));
        }
        if !max_cost.is_finite() || max_cost <= 0.0 {
            return Err(SelectionError::InvalidRequest(format!(
                "max cost must be positive, got {}",
                max_cost
            )));
        }
        if timeout.is_zero() {
            return Err(SelectionError::InvalidRequest(
                "timeout must be greater than zero".to_string(),
            ));
        }
        criteria.validate()?;

        Ok(Self {
            id: Uuid::new_v4(),
            playlist_id,
            criteria,
            target_count,
            tools: DEFAULT_TOOL_NAMES.iter().map(|s| s.to_string()).collect(),
            prompt_override: None,
            max_cost,
            timeout,
        })
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_prompt_override(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_override = Some(prompt.into());
        self
    }
}

/// Where a track's metadata was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Track id appeared in a catalog tool result
    Verified,
    /// Only the reasoning service vouches for it
    Unverified,
    /// Required metadata was missing and defaulted
    Incomplete,
}

/// A track chosen for the playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedTrack {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub bpm: Option<f64>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub country: Option<String>,
    /// Seconds, at least 1
    pub duration_seconds: u32,
    pub rotation_category: String,
    /// 1-based
    pub position: usize,
    pub selection_reason: String,
    pub validation_status: ValidationStatus,
    pub metadata_source: String,
}

/// One tool call made while producing a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub succeeded: bool,
    #[serde(default)]
    pub summary: String,
}

/// Result of one successful selection call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionResponse {
    pub request_id: Uuid,
    pub tracks: Vec<SelectedTrack>,
    pub tool_calls: Vec<ToolInvocation>,
    pub reasoning: String,
    pub cost_usd: f64,
    pub execution_time: Duration,
    pub created_at: DateTime<Utc>,
}

impl SelectionResponse {
    /// Fails with [`SelectionError::NoMatch`] when `tracks` is empty.
    pub fn new(
        request_id: Uuid,
        tracks: Vec<SelectedTrack>,
        tool_calls: Vec<ToolInvocation>,
        reasoning: impl Into<String>,
        cost_usd: f64,
        execution_time: Duration,
    ) -> Result<Self, SelectionError> {
        if tracks.is_empty() {
            return Err(SelectionError::NoMatch);
        }
        Ok(Self {
            request_id,
            tracks,
            tool_calls,
            reasoning: reasoning.into(),
            cost_usd,
            execution_time,
            created_at: Utc::now(),
        })
    }
}

/// What happened on one relaxation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub iteration: u32,
    pub relaxation_level: u32,
    pub track_count: usize,
    pub score: f64,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full result of a relaxation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelaxationOutcome {
    pub playlist_id: String,
    /// Tracks from the returned attempt; empty if no attempt produced any
    pub tracks: Vec<SelectedTrack>,
    pub score: f64,
    pub attempts: u32,
    /// Relaxation level of the attempt whose tracks were returned
    pub relaxation_level: u32,
    /// Whether `score` reached the satisfaction threshold
    pub satisfied: bool,
    pub attempt_log: Vec<AttemptRecord>,
}

impl RelaxationOutcome {
    pub fn total_cost(&self) -> f64 {
        self.attempt_log.iter().map(|a| a.cost_usd).sum()
    }
}

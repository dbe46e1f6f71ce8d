//! Selection transport - one bounded call to the reasoning service.
//!
//! # Call Flow
//! ```text
//! 1. Estimate cost, compare with the request cap (and remaining budget in HARD mode)
//! 2. Resolve declared tools against the catalog endpoint
//! 3. Under the retry policy, each attempt bounded by the request timeout:
//!    a. Chat with the reasoning service, executing tool calls between rounds
//!    b. Record usage with the budget manager after every round
//!    c. Reject the attempt if its actual cost exceeds the request cap
//!    d. Parse the final reply into tracks
//! 4. Build the response; empty results never get this far
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use super::context::AgentContext;
use super::parse::{collect_track_ids, parse_selection};
use super::prompt::{self, RequestPayload, SYSTEM_PROMPT};
use super::types::{SelectionError, SelectionRequest, SelectionResponse, ToolInvocation};
use super::SelectionService;
use crate::budget::{BudgetMode, CostEstimate};
use crate::llm::{ChatMessage, ChatOptions, TokenUsage, ToolDefinition};

/// Ledger label for selection calls.
pub const OPERATION_LABEL: &str = "track_selection";

const SUMMARY_LIMIT: usize = 200;

/// Everything one conversation produced before parsing.
struct Conversation {
    content: String,
    usage: TokenUsage,
    cost_usd: f64,
    invocations: Vec<ToolInvocation>,
    catalog_ids: HashSet<String>,
}

fn summarize(output: &str) -> String {
    if output.chars().count() <= SUMMARY_LIMIT {
        output.to_string()
    } else {
        let head: String = output.chars().take(SUMMARY_LIMIT).collect();
        format!("{}...", head)
    }
}

/// Production [`SelectionService`] backed by the context's LLM client.
pub struct SelectionTransport {
    ctx: Arc<AgentContext>,
}

impl SelectionTransport {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Pre-call estimate for `request` with the configured model.
    pub fn estimate(&self, request: &SelectionRequest) -> CostEstimate {
        self.ctx
            .pricing
            .estimate(request.target_count, self.ctx.model())
    }

    fn check_estimate(&self, request: &SelectionRequest) -> Result<CostEstimate, SelectionError> {
        let estimate = self.estimate(request);
        if estimate.cost_usd > request.max_cost {
            tracing::warn!(
                playlist_id = %request.playlist_id,
                estimate = estimate.cost_usd,
                max_cost = request.max_cost,
                "Estimated cost exceeds request cap, not calling"
            );
            return Err(SelectionError::CostExceeded {
                scope: request.playlist_id.clone(),
                attempted: estimate.cost_usd,
                allowed: request.max_cost,
            });
        }

        if self.ctx.budget.mode()? == BudgetMode::Hard {
            let remaining = self.ctx.budget.remaining(&request.playlist_id)?;
            if estimate.cost_usd > remaining {
                tracing::warn!(
                    playlist_id = %request.playlist_id,
                    estimate = estimate.cost_usd,
                    remaining,
                    "Estimated cost exceeds remaining budget, not calling"
                );
                return Err(SelectionError::CostExceeded {
                    scope: request.playlist_id.clone(),
                    attempted: estimate.cost_usd,
                    allowed: remaining,
                });
            }
        }

        Ok(estimate)
    }

    /// Perform one selection call.
    pub async fn call(
        &self,
        request: &SelectionRequest,
    ) -> Result<SelectionResponse, SelectionError> {
        let started = Instant::now();
        let estimate = self.check_estimate(request)?;
        let tool_defs = self.ctx.tools.resolve(&request.tools)?;
        let payload = prompt::build(
            &request.criteria,
            request.target_count,
            &request.tools,
            request.prompt_override.as_deref(),
        );

        tracing::info!(
            request_id = %request.id,
            playlist_id = %request.playlist_id,
            target_count = request.target_count,
            tools = tool_defs.len(),
            estimate = estimate.cost_usd,
            "Requesting track selection"
        );

        let retry = self.ctx.config.retry_config();
        let payload = &payload;
        let tool_defs = &tool_defs;
        let estimate = &estimate;

        let (conversation, parsed) = retry
            .run(
                self.ctx.sleeper.as_ref(),
                SelectionError::is_retryable,
                move |attempt| async move {
                    tracing::debug!(request_id = %request.id, attempt, "Selection attempt");
                    let conversation = tokio::time::timeout(
                        request.timeout,
                        self.converse(request, payload, tool_defs, estimate),
                    )
                    .await
                    .map_err(|_| SelectionError::Timeout(request.timeout))??;

                    if conversation.cost_usd > request.max_cost {
                        return Err(SelectionError::CostExceeded {
                            scope: request.playlist_id.clone(),
                            attempted: conversation.cost_usd,
                            allowed: request.max_cost,
                        });
                    }

                    let parsed = parse_selection(
                        &conversation.content,
                        &request.criteria,
                        &conversation.catalog_ids,
                    )?;
                    Ok((conversation, parsed))
                },
            )
            .await?;

        let mut tool_calls = conversation.invocations;
        tool_calls.extend(parsed.tool_calls);

        let response = SelectionResponse::new(
            request.id,
            parsed.tracks,
            tool_calls,
            parsed.reasoning,
            conversation.cost_usd,
            started.elapsed(),
        )?;

        tracing::info!(
            request_id = %request.id,
            playlist_id = %request.playlist_id,
            tracks = response.tracks.len(),
            tool_calls = response.tool_calls.len(),
            input_tokens = conversation.usage.prompt_tokens,
            output_tokens = conversation.usage.completion_tokens,
            cost = response.cost_usd,
            elapsed_ms = response.execution_time.as_millis() as u64,
            "Track selection complete"
        );

        Ok(response)
    }

    /// Chat until the model answers without requesting tools.
    async fn converse(
        &self,
        request: &SelectionRequest,
        payload: &RequestPayload,
        tool_defs: &[ToolDefinition],
        estimate: &CostEstimate,
    ) -> Result<Conversation, SelectionError> {
        let model = self.ctx.model();
        let max_rounds = self.ctx.config.max_tool_rounds.max(1);
        let options = ChatOptions {
            temperature: Some(0.3),
            max_tokens: None,
            json_response: false,
        };

        let mut messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(payload.prompt.clone()),
        ];
        let mut usage = TokenUsage::default();
        let mut cost_usd = 0.0;
        let mut invocations = Vec::new();
        let mut catalog_ids = HashSet::new();

        for round in 1..=max_rounds {
            let tools = if tool_defs.is_empty() {
                None
            } else {
                Some(tool_defs)
            };
            let response = self
                .ctx
                .llm
                .chat_completion_with_options(model, &messages, tools, options.clone())
                .await
                .map_err(|e| SelectionError::Service(e.to_string()))?;

            let round_usage = response.usage.unwrap_or_else(|| {
                tracing::warn!(round, "No usage reported, charging the estimate");
                TokenUsage::new(estimate.input_tokens, estimate.output_tokens)
            });
            let tracked = self.ctx.budget.track_usage(
                &request.playlist_id,
                model,
                round_usage.prompt_tokens,
                round_usage.completion_tokens,
                OPERATION_LABEL,
            )?;
            usage = usage.add(round_usage);
            cost_usd += tracked.cost_usd;

            let calls = response.requested_tools().to_vec();
            if calls.is_empty() {
                return Ok(Conversation {
                    content: response.content.unwrap_or_default(),
                    usage,
                    cost_usd,
                    invocations,
                    catalog_ids,
                });
            }

            tracing::debug!(round, calls = calls.len(), "Executing tool calls");
            messages.push(ChatMessage::assistant_tool_calls(
                response.content.clone(),
                calls.clone(),
            ));

            for call in calls {
                let name = call.function.name.clone();
                let (arguments, output, succeeded) =
                    match serde_json::from_str::<Value>(&call.function.arguments) {
                        Err(e) => (
                            Value::String(call.function.arguments.clone()),
                            format!("Error: arguments are not valid JSON: {}", e),
                            false,
                        ),
                        Ok(args) => match self.ctx.tools.execute(&name, args.clone()).await {
                            Ok(output) => {
                                collect_track_ids(&output, &mut catalog_ids);
                                (args, output, true)
                            }
                            Err(e) => {
                                tracing::warn!(tool = %name, "Tool call failed: {}", e);
                                (args, format!("Error: {}", e), false)
                            }
                        },
                    };

                invocations.push(ToolInvocation {
                    tool_name: name,
                    arguments,
                    succeeded,
                    summary: summarize(&output),
                });
                messages.push(ChatMessage::tool_result(call.id, output));
            }
        }

        Err(SelectionError::MalformedResponse(format!(
            "no final answer after {} tool rounds",
            max_rounds
        )))
    }
}

#[async_trait]
impl SelectionService for SelectionTransport {
    async fn select(
        &self,
        request: &SelectionRequest,
    ) -> Result<SelectionResponse, SelectionError> {
        self.call(request).await
    }
}

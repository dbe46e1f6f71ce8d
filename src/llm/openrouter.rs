//! OpenRouter chat-completions client.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError, LlmErrorKind, TokenUsage,
    ToolCall, ToolDefinition,
};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter client. Holds one pooled HTTP client for the process.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<UsageBody>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn request_body(
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    options: &ChatOptions,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
    });

    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        body["tools"] = json!(tools);
        body["tool_choice"] = json!("auto");
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = options.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if options.json_response {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

fn parse_completion(body: CompletionBody) -> Result<ChatResponse, LlmError> {
    let usage = body
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));

    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::new(LlmErrorKind::InvalidResponse, "Response has no choices"))?;

    Ok(ChatResponse {
        content: choice.message.content,
        tool_calls: choice.message.tool_calls.filter(|calls| !calls.is_empty()),
        finish_reason: choice.finish_reason,
        usage,
        model: body.model,
    })
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        self.chat_completion_with_options(model, messages, tools, ChatOptions::default())
            .await
    }

    async fn chat_completion_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        let body = request_body(model, messages, tools, &options);

        tracing::debug!(model, messages = messages.len(), "Sending chat completion");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::new(LlmErrorKind::Network, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), text).into());
        }

        let parsed: CompletionBody = response
            .json()
            .await
            .map_err(|e| LlmError::new(LlmErrorKind::InvalidResponse, e.to_string()))?;

        Ok(parse_completion(parsed)?)
    }
}

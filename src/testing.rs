//! Test fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::{
    AgentContext, SelectedTrack, SelectionError, SelectionRequest, SelectionResponse,
    SelectionService, ValidationStatus,
};
use crate::budget::{BudgetManager, MemoryLedger, ModelPricing, Sleeper};
use crate::config::Config;
use crate::llm::{
    ChatMessage, ChatResponse, FunctionCall, LlmClient, TokenUsage, ToolCall, ToolDefinition,
};
use crate::tools::{CatalogEndpoint, Tool, ToolRegistry, DEFAULT_TOOL_NAMES};

/// Sleeper that records requested delays and returns immediately.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// One scripted LLM turn.
pub(crate) enum Scripted {
    Reply(ChatResponse),
    Fail(String),
    /// Never completes
    Hang,
}

/// LLM client replaying a fixed script and recording what it was sent.
pub(crate) struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    history: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub(crate) fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn history(&self) -> Vec<Vec<ChatMessage>> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history.lock().unwrap().push(messages.to_vec());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(anyhow::anyhow!(message)),
            Some(Scripted::Hang) => futures::future::pending().await,
            None => Err(anyhow::anyhow!("script exhausted")),
        }
    }
}

/// Final answer with usage.
pub(crate) fn answer(content: &str, prompt_tokens: u64, completion_tokens: u64) -> ChatResponse {
    ChatResponse {
        content: Some(content.to_string()),
        tool_calls: None,
        finish_reason: Some("stop".to_string()),
        usage: Some(TokenUsage::new(prompt_tokens, completion_tokens)),
        model: None,
    }
}

/// Turn requesting a single tool call.
pub(crate) fn tool_call_reply(id: &str, name: &str, arguments: &str) -> ChatResponse {
    ChatResponse {
        content: None,
        tool_calls: Some(vec![ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }]),
        finish_reason: Some("tool_calls".to_string()),
        usage: Some(TokenUsage::new(50, 5)),
        model: None,
    }
}

/// JSON reply with tracks `t0..t{count}`, the first `domestic` marked CA.
pub(crate) fn tracks_payload(count: usize, domestic: usize) -> String {
    let tracks: Vec<Value> = (0..count)
        .map(|i| {
            let country = if i < domestic { "CA" } else { "US" };
            json!({
                "track_id": format!("t{}", i),
                "title": format!("Song {}", i),
                "artist": "Band",
                "album": "LP",
                "bpm": 110,
                "genre": "Rock",
                "year": 1995,
                "country": country,
                "duration_seconds": 200,
                "selection_reason": "steady tempo"
            })
        })
        .collect();
    json!({ "tracks": tracks, "reasoning": "fits the morning block" }).to_string()
}

/// Catalog tool answering locally with tracks `t0` and `t1`.
pub(crate) struct FakeCatalogTool {
    name: String,
}

impl FakeCatalogTool {
    pub(crate) const OUTPUT_MARKER: &'static str = "fake-catalog";

    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Tool for FakeCatalogTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "fake"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value, _catalog: &CatalogEndpoint) -> anyhow::Result<String> {
        Ok(json!({
            "source": Self::OUTPUT_MARKER,
            "results": [{"track_id": "t0"}, {"track_id": "t1"}]
        })
        .to_string())
    }
}

/// Context with a memory ledger, fake catalog tools and a recording sleeper.
pub(crate) fn context_with(
    llm: Arc<dyn LlmClient>,
    config: Config,
) -> (Arc<AgentContext>, Arc<RecordingSleeper>) {
    let pricing = Arc::new(ModelPricing::default());
    let budget = Arc::new(
        BudgetManager::open(
            config.budget.clone(),
            pricing.clone(),
            Box::new(MemoryLedger::new()),
        )
        .unwrap(),
    );

    let endpoint = CatalogEndpoint::parse("http://catalog.test/", Duration::from_secs(1)).unwrap();
    let mut tools = ToolRegistry::new(Some(endpoint));
    for name in DEFAULT_TOOL_NAMES {
        tools.register(Arc::new(FakeCatalogTool::new(name)));
    }

    let sleeper = Arc::new(RecordingSleeper::default());
    let ctx = AgentContext::new(config, llm, tools, pricing, budget).with_sleeper(sleeper.clone());
    (Arc::new(ctx), sleeper)
}

/// Complete, unverified track at `bpm` with a domestic origin.
pub(crate) fn track(id: &str, bpm: f64) -> SelectedTrack {
    SelectedTrack {
        track_id: id.to_string(),
        title: format!("Title {}", id),
        artist: "Artist".to_string(),
        album: "Album".to_string(),
        bpm: Some(bpm),
        genre: None,
        year: Some(2001),
        country: Some("CA".to_string()),
        duration_seconds: 180,
        rotation_category: "current".to_string(),
        position: 1,
        selection_reason: String::new(),
        validation_status: ValidationStatus::Unverified,
        metadata_source: "reasoning_service".to_string(),
    }
}

/// Selection service replaying scripted outcomes and recording requests.
pub(crate) struct CountingService {
    outcomes: Mutex<VecDeque<Result<Vec<SelectedTrack>, SelectionError>>>,
    requests: Mutex<Vec<SelectionRequest>>,
}

impl CountingService {
    pub(crate) fn new(outcomes: Vec<Result<Vec<SelectedTrack>, SelectionError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<SelectionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SelectionService for CountingService {
    async fn select(
        &self,
        request: &SelectionRequest,
    ) -> Result<SelectionResponse, SelectionError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(SelectionError::NoMatch));
        let tracks = next?;
        SelectionResponse::new(
            request.id,
            tracks,
            Vec::new(),
            "scripted",
            0.01,
            Duration::from_millis(5),
        )
    }
}

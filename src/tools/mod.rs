//! Tool system for the reasoning service.
//!
//! Tools are the catalog capabilities the model may call while choosing
//! tracks. This crate only declares them and forwards calls; the catalog
//! service behind the endpoint does the real work.

mod catalog;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::llm::{FunctionDefinition, ToolDefinition};

pub use catalog::{FindSimilarTracks, LibraryAnalytics, ListGenres, SearchCatalog};

/// Names of every tool registered by default.
pub const DEFAULT_TOOL_NAMES: [&str; 4] = [
    "search_catalog",
    "list_genres",
    "find_similar_tracks",
    "library_analytics",
];

/// Errors resolving declared tools.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("No catalog endpoint configured")]
    NoEndpoint,

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid catalog endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// HTTP endpoint of the catalog/metadata service.
///
/// Calling contract: `POST {base}/tools/{name}` with the JSON arguments as
/// body; the response body is handed back to the model verbatim.
#[derive(Debug, Clone)]
pub struct CatalogEndpoint {
    base: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl CatalogEndpoint {
    pub fn parse(endpoint: &str, timeout: Duration) -> Result<Self, ToolError> {
        let mut base = Url::parse(endpoint).map_err(|e| ToolError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ToolError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "URL cannot be a base".to_string(),
            });
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            client: reqwest::Client::new(),
            timeout,
        })
    }

    pub fn tool_url(&self, tool: &str) -> Result<Url, ToolError> {
        self.base
            .join(&format!("tools/{}", tool))
            .map_err(|e| ToolError::InvalidEndpoint {
                endpoint: self.base.to_string(),
                reason: e.to_string(),
            })
    }

    /// Forward one tool call to the catalog service.
    pub async fn call(&self, tool: &str, args: &Value) -> anyhow::Result<String> {
        let url = self.tool_url(tool)?;
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(args)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("Catalog returned HTTP {} for {}: {}", status.as_u16(), tool, body);
        }
        Ok(body)
    }
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments against the catalog.
    async fn execute(&self, args: Value, catalog: &CatalogEndpoint) -> anyhow::Result<String>;
}

/// Registry of declared tools and the endpoint that serves them.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    endpoint: Option<CatalogEndpoint>,
}

impl ToolRegistry {
    /// Create a registry with all catalog tools.
    pub fn new(endpoint: Option<CatalogEndpoint>) -> Self {
        let mut tools: BTreeMap<String, Arc<dyn Tool>> = BTreeMap::new();
        tools.insert("search_catalog".to_string(), Arc::new(SearchCatalog));
        tools.insert("list_genres".to_string(), Arc::new(ListGenres));
        tools.insert("find_similar_tracks".to_string(), Arc::new(FindSimilarTracks));
        tools.insert("library_analytics".to_string(), Arc::new(LibraryAnalytics));
        Self { tools, endpoint }
    }

    /// Registry with no catalog endpoint. Every resolution fails.
    pub fn without_endpoint() -> Self {
        Self::new(None)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has_endpoint(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Resolve declared capability names into definitions for the model.
    ///
    /// Fails if no endpoint is configured, even for an empty list, or if a
    /// name is not registered.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<ToolDefinition>, ToolError> {
        if self.endpoint.is_none() {
            return Err(ToolError::NoEndpoint);
        }
        names
            .iter()
            .map(|name| {
                let tool = self
                    .tools
                    .get(name)
                    .ok_or_else(|| ToolError::UnknownTool(name.clone()))?;
                Ok(ToolDefinition {
                    tool_type: "function".to_string(),
                    function: FunctionDefinition {
                        name: tool.name().to_string(),
                        description: tool.description().to_string(),
                        parameters: tool.parameters_schema(),
                    },
                })
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, args: Value) -> anyhow::Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or(ToolError::NoEndpoint)?;

        tool.execute(args, endpoint).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::without_endpoint()
    }
}

//! Web search tool using Brave Search API

use crate::brave::BraveClient;
use async_trait::async_trait;
use rig::completion::ToolDefinition;
use rig::tool::Tool;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use weave_core::tools::{PlainTool, ToolError};

#[derive(Debug, Error)]
pub enum WebSearchError {
    #[error("Search failed: {0}")]
    SearchFailed(String),
}

#[derive(Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    #[schemars(description = "The search query to look up on the web")]
    pub query: String,
}

#[derive(Clone)]
pub struct WebSearch {
    client: Arc<BraveClient>,
}

impl WebSearch {
    pub fn new(client: Arc<BraveClient>) -> Self {
        Self { client }
    }
}

impl Tool for WebSearch {
    const NAME: &'static str = "web_search";
    type Error = WebSearchError;
    type Args = WebSearchArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".to_string(),
            description: "Search the web for current information, news, facts, or any topic. Use this when you need up-to-date information or don't know something.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to look up on the web"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        use crate::brave::SearchOptions;

        let options = SearchOptions {
            count: Some(5),
            ..Default::default()
        };

        let response = self
            .client
            .search(&args.query, Some(options))
            .await
            .map_err(|e| WebSearchError::SearchFailed(e.to_string()))?;

        Ok(response.format_results())
    }
}

/// Lets `WebSearch` also bind into a `weave-core` agent's tool list
/// alongside rig's own `Tool` trait, which the orchestrator never sees.
#[async_trait]
impl PlainTool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information, news, facts, or any topic. Use this when you need up-to-date information or don't know something."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to look up on the web"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: WebSearchArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArgs(e.to_string()))?;
        let output = Tool::call(self, args)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(Value::String(output))
    }
}

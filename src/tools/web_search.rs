//! Web search backed by the Tavily API

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{required_str, AgentTool, ToolError};
use crate::llm::Tool;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on results per query regardless of what the model asks for
pub const MAX_RESULTS_LIMIT: usize = 10;

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// Response from `POST /search`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

/// Error type for search requests
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("search API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<SearchError> for ToolError {
    fn from(e: SearchError) -> Self {
        ToolError::Upstream {
            service: "web search",
            message: e.to_string(),
        }
    }
}

/// Client for the Tavily search API
#[derive(Clone)]
pub struct TavilyClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl TavilyClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Run one search query
    pub async fn search(&self, query: &str, max_results: usize) -> Result<SearchResponse, SearchError> {
        let endpoint = format!("{}/search", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "query": query,
                "max_results": max_results,
                "search_depth": "basic",
                "include_answer": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

/// `web_search` tool exposed to the model
pub struct WebSearchTool {
    client: TavilyClient,
    default_max_results: usize,
}

impl WebSearchTool {
    pub const NAME: &'static str = "web_search";

    pub fn new(client: TavilyClient, default_max_results: usize) -> Self {
        Self {
            client,
            default_max_results: default_max_results.clamp(1, MAX_RESULTS_LIMIT),
        }
    }
}

#[async_trait]
impl AgentTool for WebSearchTool {
    fn definition(&self) -> Tool {
        Tool::function(
            Self::NAME,
            "Search the web for current information: trends, news, product facts, statistics. \
             Returns the most relevant pages with a short extract of each.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    },
                    "max_results": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_RESULTS_LIMIT,
                        "description": "How many results to return"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let query = required_str(&arguments, "query")?;
        let max_results = requested_max_results(&arguments, self.default_max_results);

        tracing::debug!(query, max_results, "Running web search");
        let response = self.client.search(query, max_results).await?;
        tracing::debug!(results = response.results.len(), "Web search returned");

        serde_json::to_string(&response)
            .map_err(|e| ToolError::Rejected(format!("could not encode search results: {}", e)))
    }
}

/// `max_results` asked for by the model, kept within `1..=MAX_RESULTS_LIMIT`
fn requested_max_results(arguments: &serde_json::Value, default: usize) -> usize {
    arguments
        .get("max_results")
        .and_then(|v| v.as_u64())
        .map(|n| usize::try_from(n).unwrap_or(MAX_RESULTS_LIMIT).clamp(1, MAX_RESULTS_LIMIT))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requested_max_results_is_clamped() {
        assert_eq!(requested_max_results(&json!({ "query": "q" }), 5), 5);
        assert_eq!(requested_max_results(&json!({ "max_results": 3 }), 5), 3);
        assert_eq!(requested_max_results(&json!({ "max_results": 0 }), 5), 1);
        assert_eq!(requested_max_results(&json!({ "max_results": 50 }), 5), MAX_RESULTS_LIMIT);
        assert_eq!(requested_max_results(&json!({ "max_results": u64::MAX }), 5), MAX_RESULTS_LIMIT);
        assert_eq!(requested_max_results(&json!({ "max_results": "many" }), 5), 5);
    }
}

//! Tools the agent can call mid-generation
//!
//! Every tool implements [`AgentTool`]: it describes itself with a JSON Schema
//! definition for the model and executes calls with already-decoded
//! arguments. The [`Toolbox`] routes model-issued [`ToolCall`]s to the right
//! tool by name.

pub mod transcriptions;
pub mod web_search;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{Tool, ToolCall};

pub use transcriptions::{
    register_library_tools, CreatorTranscriptionsTool, LibraryError, ListCreatorsTool,
    TranscriptLibrary, Transcription,
};
pub use web_search::{SearchError, SearchResponse, SearchResult, TavilyClient, WebSearchTool};

/// Error type for tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    /// The model sent arguments the tool cannot use
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The call was well-formed but cannot be satisfied (unknown tool, unknown creator)
    #[error("{0}")]
    Rejected(String),

    /// The external service behind the tool failed
    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },
}

impl ToolError {
    /// Whether the failure should abort the run instead of being
    /// reported back to the model
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolError::Upstream { .. })
    }
}

/// A capability the model may invoke
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Definition offered to the model
    fn definition(&self) -> Tool;

    /// Execute one call and return the text handed back to the model
    async fn call(&self, arguments: serde_json::Value) -> Result<String, ToolError>;
}

/// Record of one tool invocation during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: f64,
}

impl ToolExecution {
    /// Record for a call that has not run yet
    pub fn pending(call: &ToolCall) -> Self {
        let arguments = call
            .parsed_arguments()
            .unwrap_or_else(|_| serde_json::Value::String(call.function.arguments.clone()));
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.function.name.clone(),
            arguments,
            result: None,
            error: None,
            duration_ms: 0.0,
        }
    }
}

/// Registry of the tools available to the agent
#[derive(Clone, Default)]
pub struct Toolbox {
    tools: Vec<Arc<dyn AgentTool>>,
}

impl Toolbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. When two tools share a name, the first one registered wins.
    pub fn register(&mut self, tool: impl AgentTool + 'static) {
        self.tools.push(Arc::new(tool));
    }

    pub fn with(mut self, tool: impl AgentTool + 'static) -> Self {
        self.register(tool);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|t| t.definition().function.name)
            .collect()
    }

    /// Route a model-issued call to its tool
    pub async fn dispatch(&self, call: &ToolCall) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.definition().function.name == call.function.name)
            .ok_or_else(|| {
                ToolError::Rejected(format!(
                    "unknown tool '{}'; available tools: {}",
                    call.function.name,
                    self.names().join(", ")
                ))
            })?;

        let arguments = call
            .parsed_arguments()
            .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {}", e)))?;
        if !arguments.is_object() {
            return Err(ToolError::InvalidArguments(
                "arguments must be a JSON object".to_string(),
            ));
        }

        tool.call(arguments).await
    }
}

/// Read a required, non-blank string argument
pub(crate) fn required_str<'a>(
    arguments: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{}' must be a non-empty string", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl AgentTool for Echo {
        fn definition(&self) -> Tool {
            Tool::function(
                "echo",
                "Echo the text back",
                serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            )
        }

        async fn call(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok(required_str(&arguments, "text")?.to_string())
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_name() {
        let toolbox = Toolbox::new().with(Echo);
        let out = toolbox
            .dispatch(&ToolCall::new("c1", "echo", r#"{"text":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rejected_not_fatal() {
        let toolbox = Toolbox::new().with(Echo);
        let err = toolbox
            .dispatch(&ToolCall::new("c1", "rm_rf", "{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Rejected(_)));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("echo"));
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let toolbox = Toolbox::new().with(Echo);
        for raw in ["{\"text\":", "[1,2]", "{\"text\":\"  \"}"] {
            let err = toolbox
                .dispatch(&ToolCall::new("c1", "echo", raw))
                .await
                .unwrap_err();
            assert!(matches!(err, ToolError::InvalidArguments(_)), "{raw}");
        }
    }

    #[test]
    fn test_pending_record_keeps_unparseable_arguments() {
        let record = ToolExecution::pending(&ToolCall::new("c9", "echo", "not json"));
        assert_eq!(record.tool_name, "echo");
        assert_eq!(record.arguments, serde_json::Value::String("not json".into()));
        assert!(record.result.is_none());
    }
}

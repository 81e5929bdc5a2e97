//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use copywriter_agent::agent::{Agent, AgentSettings, SessionStore};
use copywriter_agent::llm::{ChatModel, ChatRequest, ChunkStream, LlmError, ModelChunk, Tool, ToolCall};
use copywriter_agent::tools::{AgentTool, ToolError, Toolbox};
use futures_util::stream;
use serde_json::{json, Value};

/// One scripted reply of the fake model
pub enum Step {
    /// Stream these chunks and finish normally
    Reply(Vec<ModelChunk>),
    /// Stream these chunks, then fail
    BreakAfter(Vec<ModelChunk>),
    /// Fail before streaming anything
    Refuse,
}

impl Step {
    pub fn text(parts: &[&str]) -> Self {
        Step::Reply(parts.iter().map(|p| ModelChunk::Content(p.to_string())).collect())
    }

    pub fn tool_call(id: &str, name: &str, arguments: Value) -> Self {
        Step::Reply(vec![ModelChunk::ToolCalls(vec![ToolCall::new(
            id,
            name,
            arguments.to_string(),
        )])])
    }
}

/// Chat model that replays a script and records every request
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, LlmError> {
        self.requests.lock().unwrap().push(request);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Provider("script exhausted".to_string()))?;

        match step {
            Step::Reply(chunks) => Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok)))),
            Step::BreakAfter(chunks) => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(LlmError::Provider("connection reset".to_string()))));
                Ok(Box::pin(stream::iter(items)))
            }
            Step::Refuse => Err(LlmError::Status {
                status: 503,
                body: "service unavailable".to_string(),
            }),
        }
    }
}

/// `web_search` stand-in returning a canned result
pub struct CannedSearch;

#[async_trait]
impl AgentTool for CannedSearch {
    fn definition(&self) -> Tool {
        Tool::function(
            "web_search",
            "Search the web",
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        )
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let query = arguments["query"].as_str().unwrap_or_default();
        Ok(json!({
            "query": query,
            "results": [{ "title": "SPF guide", "url": "https://example.com/spf", "content": "Use SPF 30 daily." }]
        })
        .to_string())
    }
}

/// `web_search` stand-in whose provider is down
pub struct BrokenSearch;

#[async_trait]
impl AgentTool for BrokenSearch {
    fn definition(&self) -> Tool {
        CannedSearch.definition()
    }

    async fn call(&self, _arguments: Value) -> Result<String, ToolError> {
        Err(ToolError::Upstream {
            service: "web search",
            message: "HTTP 500".to_string(),
        })
    }
}

pub async fn memory_store() -> SessionStore {
    SessionStore::connect("sqlite::memory:")
        .await
        .expect("in-memory store")
}

pub fn settings() -> AgentSettings {
    AgentSettings {
        model: "test-model".to_string(),
        system_prompt: "You write copy.".to_string(),
        user_memories: false,
        ..AgentSettings::default()
    }
}

pub async fn agent_with(
    model: Arc<ScriptedModel>,
    toolbox: Toolbox,
    settings: AgentSettings,
) -> (Agent, SessionStore) {
    let store = memory_store().await;
    let agent = Agent::new(settings, model, toolbox, store.clone());
    (agent, store)
}

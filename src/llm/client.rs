//! Streaming client for OpenAI-compatible chat completion APIs

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;

use super::tool_use::{ChatMessage, FunctionCall, Tool, ToolCall};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// One item of a streamed completion.
///
/// Text arrives as many small `Content` deltas. Tool calls arrive as
/// fragments on the wire; the client reassembles them and emits a single
/// `ToolCalls` item once the completion has finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    Content(String),
    ToolCalls(Vec<ToolCall>),
}

/// Lazy, finite stream of completion chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ModelChunk, LlmError>> + Send>>;

/// A single completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// `None` forbids tool use for this completion
    pub tools: Option<Vec<Tool>>,
}

/// Error type for model provider calls
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("provider reported an error: {0}")]
    Provider(String),

    #[error("empty response from model")]
    EmptyResponse,
}

/// Anything that can stream chat completions
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, LlmError>;
}

/// Client for `/chat/completions` with streaming and tool calling
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    service_tier: Option<String>,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. "https://api.openai.com/v1"
    /// * `api_key` - Bearer token
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_tier: None,
            client,
        })
    }

    /// Ask the provider for a specific processing tier (e.g. "flex")
    pub fn with_service_tier(mut self, tier: Option<String>) -> Self {
        self.service_tier = tier;
        self
    }

    fn request_body(&self, request: &ChatRequest) -> Result<serde_json::Value, LlmError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
        });

        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = serde_json::to_value(tools)?;
        }
        if let Some(tier) = &self.service_tier {
            body["service_tier"] = serde_json::Value::String(tier.clone());
        }
        Ok(body)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, LlmError> {
        let endpoint = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request)?;

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Box::pin(decode_completion_stream(response.bytes_stream())))
    }
}

/// Turn the raw SSE byte stream of a completion into [`ModelChunk`]s.
///
/// A body that ends before `[DONE]` or a `finish_reason` was seen is a cut
/// connection and fails the stream.
fn decode_completion_stream<S, B>(bytes: S) -> impl Stream<Item = Result<ModelChunk, LlmError>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::try_stream! {
        let mut events = Box::pin(bytes.eventsource());
        let mut pending = PendingToolCalls::default();
        let mut finished = false;

        while let Some(event) = events.next().await {
            let event = event.map_err(stream_error)?;
            if event.data.is_empty() {
                continue;
            }
            if event.data == "[DONE]" {
                finished = true;
                break;
            }
            let (deltas, finish_reason) = parse_chunk(&event.data, &mut pending)?;
            finished |= finish_reason;
            for delta in deltas {
                yield delta;
            }
        }

        if !finished {
            Err::<(), _>(LlmError::Provider("stream ended before completion".to_string()))?;
        }

        let calls = pending.finish();
        if !calls.is_empty() {
            yield ModelChunk::ToolCalls(calls);
        }
    }
}

fn stream_error(error: EventStreamError<reqwest::Error>) -> LlmError {
    match error {
        EventStreamError::Transport(e) => LlmError::Request(e),
        other => LlmError::Provider(format!("malformed event stream: {}", other)),
    }
}

/// Parse one `data:` payload; the flag is set once a choice carries a `finish_reason`
fn parse_chunk(
    data: &str,
    pending: &mut PendingToolCalls,
) -> Result<(Vec<ModelChunk>, bool), LlmError> {
    let chunk: CompletionChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(LlmError::Provider(error.message));
    }

    let mut out = Vec::new();
    let mut finished = false;
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            out.push(ModelChunk::Content(content));
        }
        for fragment in choice.delta.tool_calls.unwrap_or_default() {
            pending.merge(fragment);
        }
        finished |= choice.finish_reason.is_some();
    }
    Ok((out, finished))
}

/// Tool calls being reassembled from streamed fragments, keyed by index
#[derive(Debug, Default)]
struct PendingToolCalls {
    calls: BTreeMap<usize, ToolCall>,
}

impl PendingToolCalls {
    fn merge(&mut self, fragment: ToolCallFragment) {
        let entry = self.calls.entry(fragment.index).or_insert_with(|| ToolCall {
            id: String::new(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: String::new(),
                arguments: String::new(),
            },
        });
        if let Some(id) = fragment.id {
            entry.id = id;
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                entry.function.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                entry.function.arguments.push_str(&arguments);
            }
        }
    }

    fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter(|(_, call)| !call.function.name.is_empty())
            .map(|(index, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{}", index);
                }
                call
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}

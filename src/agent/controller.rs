//! Agent orchestration loop
//!
//! One [`Agent`] is built at start-up and shared by every request. A run
//! loads recent history for the session, streams the model's answer, executes
//! any tool calls the model asks for, and appends the finished turn to the
//! session store.
//!
//! ```text
//! RunInput ─► validate ─► history ─► model (tools offered) ─┬─► text ─► persist ─► RunCompleted
//!                                         ▲                 │
//!                                         └── tool results ◄┘ tool calls (≤ max_tool_rounds)
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::sessions::{NewTurn, SessionStore, StoreError, Turn, UserMemory};
use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmError, ModelChunk};
use crate::metrics::{
    AGENT_RUNS, AGENT_RUNS_IN_FLIGHT, AGENT_RUN_DURATION, AGENT_TOOL_CALLS, AGENT_TOOL_ROUNDS,
    LLM_CALL_DURATION,
};
use crate::tools::{ToolError, ToolExecution, Toolbox};

/// Instruction appended to the system prompt when markdown output is enabled
pub const MARKDOWN_INSTRUCTION: &str = "Use markdown to format your answers.";

/// Heading of the remembered facts in the system message
pub const MEMORY_HEADING: &str = "Things you remember about this user:";

/// Instructions for the memory update that follows every finished run
pub const MEMORY_INSTRUCTION: &str = r#"You keep long-term notes about the user of a copywriting assistant.

Read the user's latest message and write down new facts about them that will
still matter in future conversations: who they are, their brand or niche, their
audience, the tone they like, creators they admire, their goals. Ignore one-off
requests. Do not repeat facts that are already known.

Answer with one fact per line, in the third person. If there is nothing new,
answer NONE."#;

/// Upper bound on facts stored by one memory update
pub const MAX_NEW_MEMORIES: usize = 5;

/// Fallback persona used when no prompt file is supplied
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a copywriter for digital influencers.

Research the topic on the web when facts, trends or numbers matter, and study the
tone of the available creators before imitating them. Write copy that is ready to
post: a strong hook, a clear body and a call to action."#;

/// Immutable agent configuration, built once at start-up
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    /// Model identifier sent to the provider
    pub model: String,
    pub system_prompt: String,
    /// Ask the model to answer in markdown
    pub markdown: bool,
    /// Number of previous turns replayed into the context
    pub history_runs: usize,
    /// Model rounds that may request tools before a final answer is forced
    pub max_tool_rounds: usize,
    /// Extract and recall long-term facts about each user
    pub user_memories: bool,
    /// Most recent memories added to the context
    pub memory_limit: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            agent_id: "copywriter_modelador".to_string(),
            name: "Copywriter Modelador".to_string(),
            description: "Copywriter that researches a topic on the web and models \
                          influencer creators to write content"
                .to_string(),
            model: crate::config::DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            markdown: true,
            history_runs: 10,
            max_tool_rounds: 5,
            user_memories: true,
            memory_limit: 20,
        }
    }
}

impl AgentSettings {
    /// Full system message: description, prompt, output format
    pub fn instructions(&self) -> String {
        let mut text = String::new();
        if !self.description.is_empty() {
            text.push_str(&self.description);
            text.push_str("\n\n");
        }
        text.push_str(self.system_prompt.trim());
        if self.markdown {
            text.push_str("\n\n");
            text.push_str(MARKDOWN_INSTRUCTION);
        }
        text
    }
}

/// Public description of the agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub model: String,
    pub tools: Vec<String>,
}

/// Input of one chat turn
#[derive(Debug, Clone)]
pub struct RunInput {
    pub user_id: String,
    pub session_id: String,
    pub message: String,
}

/// Events produced while a run progresses
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        session_id: String,
        agent_id: String,
        model: String,
        created_at: DateTime<Utc>,
    },
    /// Incremental text
    RunContent {
        run_id: String,
        session_id: String,
        content: String,
    },
    ToolCallStarted {
        run_id: String,
        session_id: String,
        tool: ToolExecution,
    },
    ToolCallCompleted {
        run_id: String,
        session_id: String,
        tool: ToolExecution,
    },
    /// Terminal marker of a successful run; the turn is already persisted
    RunCompleted {
        run_id: String,
        session_id: String,
        turn_id: String,
        content: String,
        tools: Vec<ToolExecution>,
    },
}

impl RunEvent {
    /// Event name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::RunStarted { .. } => "RunStarted",
            RunEvent::RunContent { .. } => "RunContent",
            RunEvent::ToolCallStarted { .. } => "ToolCallStarted",
            RunEvent::ToolCallCompleted { .. } => "ToolCallCompleted",
            RunEvent::RunCompleted { .. } => "RunCompleted",
        }
    }
}

/// Result of a run consumed to completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutput {
    pub run_id: String,
    pub session_id: String,
    pub turn_id: String,
    pub content: String,
    pub tools: Vec<ToolExecution>,
}

/// Error type for agent runs
#[derive(Debug, Error)]
pub enum AgentError {
    /// Rejected before any provider call
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("model provider failed: {0}")]
    Model(#[from] LlmError),

    #[error("tool {tool} failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: ToolError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run ended without a completion")]
    Incomplete,
}

impl AgentError {
    /// Failure of an external provider (LLM or search)
    pub fn is_upstream(&self) -> bool {
        matches!(self, AgentError::Model(_) | AgentError::Tool { .. })
    }

    fn status_label(&self) -> &'static str {
        match self {
            AgentError::InvalidRequest(_) => "invalid_request",
            AgentError::Model(_) | AgentError::Tool { .. } => "upstream_error",
            AgentError::Store(_) => "storage_error",
            AgentError::Incomplete => "incomplete",
        }
    }
}

/// Stream of run events; ends after `RunCompleted` or the first error
pub type RunStream = Pin<Box<dyn Stream<Item = Result<RunEvent, AgentError>> + Send>>;

/// Tracks an in-flight run for metrics. A run dropped before it reached an
/// outcome is counted as cancelled.
struct RunGuard {
    started: Instant,
    outcome: Option<&'static str>,
}

impl RunGuard {
    fn start() -> Self {
        AGENT_RUNS_IN_FLIGHT.inc();
        Self {
            started: Instant::now(),
            outcome: None,
        }
    }

    fn finish(&mut self, status: &'static str) {
        if self.outcome.is_none() {
            AGENT_RUNS.with_label_values(&[status]).inc();
            self.outcome = Some(status);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.finish("cancelled");
        AGENT_RUNS_IN_FLIGHT.dec();
        AGENT_RUN_DURATION.observe(self.started.elapsed().as_secs_f64());
    }
}

/// Agent orchestrating the model, its tools and the session store
#[derive(Clone)]
pub struct Agent {
    settings: Arc<AgentSettings>,
    model: Arc<dyn ChatModel>,
    toolbox: Arc<Toolbox>,
    store: SessionStore,
}

impl Agent {
    /// Create a new agent
    ///
    /// # Arguments
    /// * `settings` - Immutable agent configuration
    /// * `model` - Chat model used for every completion
    /// * `toolbox` - Tools offered to the model
    /// * `store` - Where finished turns are persisted
    pub fn new(
        settings: AgentSettings,
        model: Arc<dyn ChatModel>,
        toolbox: Toolbox,
        store: SessionStore,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            model,
            toolbox: Arc::new(toolbox),
            store,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.settings.agent_id.clone(),
            name: self.settings.name.clone(),
            description: self.settings.description.clone(),
            model: self.settings.model.clone(),
            tools: self.toolbox.names(),
        }
    }

    /// Start a run.
    ///
    /// Invalid input is rejected here, before anything is sent to the model.
    /// Nothing happens until the returned stream is polled; dropping it stops
    /// the run without persisting anything.
    pub fn run(&self, input: RunInput) -> Result<RunStream, AgentError> {
        validate(&input)?;

        let run_id = Uuid::now_v7().to_string();
        let span = info_span!(
            "agent_run",
            run_id = %run_id,
            session_id = %input.session_id,
            user_id = %input.user_id,
            model = %self.settings.model,
            otel.name = "agent_run"
        );

        let mut guard = RunGuard::start();
        let events = self.clone().drive(run_id, input, span).map(move |item| {
            match &item {
                Ok(RunEvent::RunCompleted { .. }) => guard.finish("success"),
                Err(e) => guard.finish(e.status_label()),
                Ok(_) => {}
            }
            item
        });
        Ok(Box::pin(events))
    }

    /// Run to the end and return the final answer
    pub async fn run_to_completion(&self, input: RunInput) -> Result<RunOutput, AgentError> {
        let mut events = self.run(input)?;
        while let Some(event) = events.next().await {
            if let RunEvent::RunCompleted {
                run_id,
                session_id,
                turn_id,
                content,
                tools,
            } = event?
            {
                return Ok(RunOutput {
                    run_id,
                    session_id,
                    turn_id,
                    content,
                    tools,
                });
            }
        }
        Err(AgentError::Incomplete)
    }

    fn drive(
        self,
        run_id: String,
        input: RunInput,
        span: Span,
    ) -> impl Stream<Item = Result<RunEvent, AgentError>> + Send + 'static {
        async_stream::try_stream! {
            let settings = self.settings.clone();
            let session_id = input.session_id.clone();

            info!(parent: &span, run_id = %run_id, "Starting agent run");
            yield RunEvent::RunStarted {
                run_id: run_id.clone(),
                session_id: session_id.clone(),
                agent_id: settings.agent_id.clone(),
                model: settings.model.clone(),
                created_at: Utc::now(),
            };

            let history = self
                .store
                .recent_turns(&session_id, settings.history_runs)
                .instrument(span.clone())
                .await?;
            let memories = if settings.user_memories {
                self.store
                    .user_memories(&input.user_id, settings.memory_limit)
                    .instrument(span.clone())
                    .await?
            } else {
                Vec::new()
            };
            let mut messages = build_context(&settings, &memories, &history, &input.message);

            let tool_definitions = self.toolbox.definitions();
            let mut rounds = 0usize;
            let mut content = String::new();
            let mut executions: Vec<ToolExecution> = Vec::new();

            loop {
                let offer_tools = !tool_definitions.is_empty() && rounds < settings.max_tool_rounds;
                if !offer_tools && rounds > 0 {
                    warn!(parent: &span, run_id = %run_id, rounds, "Tool round limit reached, forcing final answer");
                }

                let llm_span = info_span!(
                    parent: &span,
                    "llm_call",
                    run_id = %run_id,
                    round = rounds,
                    tools_offered = offer_tools,
                    otel.name = "llm_call"
                );
                let request = ChatRequest {
                    model: settings.model.clone(),
                    messages: messages.clone(),
                    tools: offer_tools.then(|| tool_definitions.clone()),
                };

                let call_start = Instant::now();
                let mut chunks = self.model.stream_chat(request).instrument(llm_span.clone()).await?;

                let mut round_text = String::new();
                let mut calls = Vec::new();
                while let Some(chunk) = chunks.next().instrument(llm_span.clone()).await {
                    match chunk? {
                        ModelChunk::Content(delta) => {
                            let mut shown = delta.clone();
                            if round_text.is_empty() && !content.is_empty() {
                                shown.insert_str(0, "\n\n");
                            }
                            round_text.push_str(&delta);
                            content.push_str(&shown);
                            yield RunEvent::RunContent {
                                run_id: run_id.clone(),
                                session_id: session_id.clone(),
                                content: shown,
                            };
                        }
                        ModelChunk::ToolCalls(mut requested) => calls.append(&mut requested),
                    }
                }

                LLM_CALL_DURATION
                    .with_label_values(&[settings.model.as_str()])
                    .observe(call_start.elapsed().as_secs_f64());

                if calls.is_empty() || !offer_tools {
                    break;
                }

                rounds += 1;
                info!(parent: &span, run_id = %run_id, round = rounds, tool_calls = calls.len(), "Model requested tools");
                messages.push(ChatMessage::assistant_tool_calls(round_text, calls.clone()));

                for call in calls {
                    let mut record = ToolExecution::pending(&call);
                    yield RunEvent::ToolCallStarted {
                        run_id: run_id.clone(),
                        session_id: session_id.clone(),
                        tool: record.clone(),
                    };

                    let tool_span = info_span!(
                        parent: &span,
                        "tool_call",
                        run_id = %run_id,
                        tool = %call.function.name,
                        otel.name = "tool_call"
                    );
                    let started = Instant::now();
                    let outcome = self.toolbox.dispatch(&call).instrument(tool_span).await;
                    record.duration_ms = started.elapsed().as_secs_f64() * 1000.0;

                    let reply = match outcome {
                        Ok(output) => {
                            AGENT_TOOL_CALLS.with_label_values(&[call.function.name.as_str(), "success"]).inc();
                            record.result = Some(output.clone());
                            output
                        }
                        Err(e) if e.is_fatal() => {
                            AGENT_TOOL_CALLS.with_label_values(&[call.function.name.as_str(), "upstream_error"]).inc();
                            warn!(parent: &span, run_id = %run_id, tool = %call.function.name, error = %e, "Tool provider failed");
                            Err::<String, _>(AgentError::Tool { tool: call.function.name.clone(), source: e })?
                        }
                        Err(e) => {
                            AGENT_TOOL_CALLS.with_label_values(&[call.function.name.as_str(), "rejected"]).inc();
                            record.error = Some(e.to_string());
                            format!("Error: {}", e)
                        }
                    };

                    messages.push(ChatMessage::tool(call.id.clone(), reply));
                    executions.push(record.clone());
                    yield RunEvent::ToolCallCompleted {
                        run_id: run_id.clone(),
                        session_id: session_id.clone(),
                        tool: record,
                    };
                }
            }

            AGENT_TOOL_ROUNDS.observe(rounds as f64);

            if content.trim().is_empty() {
                Err::<(), _>(AgentError::Model(LlmError::EmptyResponse))?;
            }

            let turn: Turn = self
                .store
                .append_turn(NewTurn {
                    session_id: session_id.clone(),
                    user_id: input.user_id.clone(),
                    agent_id: settings.agent_id.clone(),
                    run_id: run_id.clone(),
                    user_message: input.message.clone(),
                    response: content.clone(),
                    tool_calls: executions.clone(),
                })
                .instrument(span.clone())
                .await?;

            info!(parent: &span, run_id = %run_id, turn_id = %turn.turn_id, seq = turn.seq, tool_rounds = rounds, "Agent run completed");

            // A failed update leaves the stored turn as it is
            if settings.user_memories {
                let memory_span = info_span!(parent: &span, "memory_update", run_id = %run_id, otel.name = "memory_update");
                match self
                    .update_memories(&input.user_id, &input.message, &memories)
                    .instrument(memory_span)
                    .await
                {
                    Ok(added) => info!(parent: &span, run_id = %run_id, added, "User memories updated"),
                    Err(e) => warn!(parent: &span, run_id = %run_id, error = %e, "User memory update failed"),
                }
            }

            yield RunEvent::RunCompleted {
                run_id,
                session_id,
                turn_id: turn.turn_id,
                content,
                tools: executions,
            };
        }
    }

    /// Ask the model, without tools, for new facts about the user and store
    /// them. Returns how many were added.
    async fn update_memories(
        &self,
        user_id: &str,
        message: &str,
        known: &[UserMemory],
    ) -> Result<usize, AgentError> {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: memory_context(known, message),
            tools: None,
        };

        let mut chunks = self.model.stream_chat(request).await?;
        let mut reply = String::new();
        while let Some(chunk) = chunks.next().await {
            if let ModelChunk::Content(delta) = chunk? {
                reply.push_str(&delta);
            }
        }

        let facts = parse_memories(&reply);
        if facts.is_empty() {
            return Ok(0);
        }
        Ok(self.store.add_memories(user_id, &facts).await?.len())
    }
}

fn validate(input: &RunInput) -> Result<(), AgentError> {
    if input.session_id.trim().is_empty() {
        return Err(AgentError::InvalidRequest("session_id must not be empty".to_string()));
    }
    if input.message.trim().is_empty() {
        return Err(AgentError::InvalidRequest("message must not be empty".to_string()));
    }
    if input.user_id.trim().is_empty() {
        return Err(AgentError::InvalidRequest("user_id must not be empty".to_string()));
    }
    Ok(())
}

/// System prompt (with remembered facts), replayed history, then the new message
fn build_context(
    settings: &AgentSettings,
    memories: &[UserMemory],
    history: &[Turn],
    message: &str,
) -> Vec<ChatMessage> {
    let mut system = settings.instructions();
    if !memories.is_empty() {
        system.push_str("\n\n");
        system.push_str(MEMORY_HEADING);
        for memory in memories {
            system.push_str("\n- ");
            system.push_str(&memory.memory);
        }
    }

    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(system));
    for turn in history {
        messages.push(ChatMessage::user(turn.user_message.clone()));
        messages.push(ChatMessage::assistant(turn.response.clone()));
    }
    messages.push(ChatMessage::user(message));
    messages
}

fn memory_context(known: &[UserMemory], message: &str) -> Vec<ChatMessage> {
    let mut prompt = String::from("Known facts:\n");
    if known.is_empty() {
        prompt.push_str("(none)\n");
    }
    for memory in known {
        prompt.push_str("- ");
        prompt.push_str(&memory.memory);
        prompt.push('\n');
    }
    prompt.push_str("\nLatest message:\n");
    prompt.push_str(message);

    vec![ChatMessage::system(MEMORY_INSTRUCTION), ChatMessage::user(prompt)]
}

/// One fact per non-empty line, list markers stripped; `NONE` means no facts
fn parse_memories(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '*', '•']).trim())
        .filter(|line| !line.is_empty() && !line.trim_end_matches('.').eq_ignore_ascii_case("none"))
        .map(str::to_string)
        .take(MAX_NEW_MEMORIES)
        .collect()
}

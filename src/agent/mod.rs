//! Agent module for the copywriting assistant
//!
//! This module provides the run loop that orchestrates:
//! - the hosted LLM with tool calling (streamed chat completions)
//! - the tools (web search, creator transcriptions)
//! - persistence of finished turns in the session store
//! - long-term memories about each user
//!
//! # Architecture
//!
//! ```text
//! HTTP request → Agent::run → SessionStore::recent_turns (history)
//!                    ↓
//!              ChatModel::stream_chat (with tools) ──► RunContent events
//!                    ↓
//!              Tool call: web_search / creator tools
//!                    ↓
//!              Feed results back → next round (bounded) or final answer
//!                    ↓
//!              SessionStore::append_turn → memory update → RunCompleted
//! ```
//!
//! Facts the model extracts about the user are kept in the store and added
//! to the system message of every later run for that user.

pub mod controller;
pub mod sessions;

pub use controller::{
    Agent, AgentError, AgentInfo, AgentSettings, RunEvent, RunInput, RunOutput, RunStream,
};
pub use sessions::{NewTurn, SessionStore, SessionSummary, StoreError, Turn, UserMemory};

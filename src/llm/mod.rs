//! Hosted LLM integration module
//!
//! This module provides a streaming client for OpenAI-compatible
//! `/chat/completions` endpoints, including tool/function calling.

pub mod client;
pub mod tool_use;

pub use client::{ChatModel, ChatRequest, ChunkStream, LlmError, ModelChunk, OpenAiClient};
pub use tool_use::{ChatMessage, FunctionCall, Role, Tool, ToolCall, ToolFunction};

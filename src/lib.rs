//! Copywriter agent - copywriting assistant backed by a hosted LLM
//!
//! The agent researches topics on the web, studies creator transcriptions and
//! writes social media copy. Conversations are kept per session in a
//! relational database and answers are streamed to the browser.
//!
//! # Modules
//!
//! - `agent` - Run loop orchestrating model, tools and session store
//! - `llm` - OpenAI-compatible streaming chat client with tool calling
//! - `tools` - Web search and creator transcription tools
//! - `server` - HTTP API of the agent service
//! - `frontend` - Browser chat page
//! - `config` - Environment configuration
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - Structured logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use copywriter_agent::{Agent, AgentSettings, RunInput, SessionStore, Toolbox};
//!
//! let store = SessionStore::connect("postgres://localhost/agent").await?;
//! let agent = Agent::new(AgentSettings::default(), Arc::new(model), Toolbox::new(), store);
//! let output = agent
//!     .run_to_completion(RunInput {
//!         user_id: "u1".into(),
//!         session_id: "s1".into(),
//!         message: "Write a hook for a skincare reel".into(),
//!     })
//!     .await?;
//! ```

pub mod agent;
pub mod config;
pub mod frontend;
pub mod llm;
pub mod metrics;
pub mod server;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{Agent, AgentError, AgentSettings, RunEvent, RunInput, RunOutput, SessionStore};
pub use llm::{ChatModel, OpenAiClient};
pub use tools::Toolbox;

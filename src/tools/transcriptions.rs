//! Creator transcription library
//!
//! The library is a JSON file produced offline from creators' videos:
//!
//! ```json
//! { "creator_name": [ { "video": "clip.mp4", "transcription": "..." } ] }
//! ```
//!
//! Two tools expose it so the model can study a creator's voice before
//! writing copy in that style.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{required_str, AgentTool, ToolError, Toolbox};
use crate::llm::Tool;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to read transcription library: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed transcription library: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One transcribed video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub video: String,
    pub transcription: String,
}

/// Transcriptions grouped by creator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptLibrary {
    creators: BTreeMap<String, Vec<Transcription>>,
}

impl TranscriptLibrary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, LibraryError> {
        Ok(Self {
            creators: serde_json::from_str(json)?,
        })
    }

    /// Creator names in alphabetical order
    pub fn creators(&self) -> Vec<&str> {
        self.creators.keys().map(String::as_str).collect()
    }

    /// Look up a creator, ignoring case and surrounding whitespace
    pub fn get(&self, creator: &str) -> Option<&[Transcription]> {
        let wanted = creator.trim();
        self.creators
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, items)| items.as_slice())
    }
}

/// Register both library tools on a toolbox
pub fn register_library_tools(toolbox: &mut Toolbox, library: Arc<TranscriptLibrary>) {
    toolbox.register(ListCreatorsTool {
        library: library.clone(),
    });
    toolbox.register(CreatorTranscriptionsTool { library });
}

/// `list_available_creators` tool
pub struct ListCreatorsTool {
    library: Arc<TranscriptLibrary>,
}

impl ListCreatorsTool {
    pub const NAME: &'static str = "list_available_creators";

    pub fn new(library: Arc<TranscriptLibrary>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl AgentTool for ListCreatorsTool {
    fn definition(&self) -> Tool {
        Tool::function(
            Self::NAME,
            "List the creators whose video transcriptions are available for style modelling.",
            serde_json::json!({"type": "object", "properties": {}}),
        )
    }

    async fn call(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        Ok(serde_json::json!({ "creators": self.library.creators() }).to_string())
    }
}

/// `get_creator_transcriptions` tool
pub struct CreatorTranscriptionsTool {
    library: Arc<TranscriptLibrary>,
}

impl CreatorTranscriptionsTool {
    pub const NAME: &'static str = "get_creator_transcriptions";

    pub fn new(library: Arc<TranscriptLibrary>) -> Self {
        Self { library }
    }
}

#[async_trait]
impl AgentTool for CreatorTranscriptionsTool {
    fn definition(&self) -> Tool {
        Tool::function(
            Self::NAME,
            "Get the video transcriptions of one creator, to model their tone, hooks and structure.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "creator_name": {
                        "type": "string",
                        "description": "Creator name as returned by list_available_creators"
                    }
                },
                "required": ["creator_name"]
            }),
        )
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let creator = required_str(&arguments, "creator_name")?;
        let items = self.library.get(creator).ok_or_else(|| {
            ToolError::Rejected(format!(
                "creator '{}' not found; available creators: {}",
                creator,
                self.library.creators().join(", ")
            ))
        })?;

        Ok(serde_json::json!({
            "creator": creator,
            "transcriptions": items,
        })
        .to_string())
    }
}

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Who produced a message. The transcript format is open-ended — anything
/// we don't recognize lands in `Other` and is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
    #[serde(other)]
    Other,
}

/// Message content as it arrives from the host runtime: either a bare
/// string or an ordered list of typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One block inside structured content. Unknown block types keep their
/// raw fields in `rest`; extraction helpers skip them rather than fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(text.into()),
            rest: serde_json::Map::new(),
        }
    }
}

/// Free-form metadata attached to tool results by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResultDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, rename = "exitCode", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// A single transcript entry. Immutable once produced by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, rename = "toolCallId", skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, rename = "toolName", skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ToolResultDetails>,
}

impl Message {
    /// Plain text message with the given role.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            tool_call_id: None,
            tool_name: None,
            is_error: None,
            details: None,
        }
    }

    /// Visible text of the message: the string itself, or the `text`
    /// fields of all `text` blocks joined with newlines. Non-text blocks
    /// contribute nothing.
    pub fn extracted_text(&self) -> String {
        match &self.content {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.kind == "text")
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// File paths the session touched, as reported by the host. The three
/// sets are disjoint on the way in; `ArtifactDetails` re-derives the
/// read/modified split on the way out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileOps {
    #[serde(default)]
    pub read: BTreeSet<String>,
    #[serde(default)]
    pub edited: BTreeSet<String>,
    #[serde(default)]
    pub written: BTreeSet<String>,
}

/// Host-provided knobs that ride along with a compaction request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionSettings {
    /// Tokens reserved for the completion response when sizing each
    /// summarization request.
    #[serde(default, rename = "reserveTokens")]
    pub reserve_tokens: u32,
}

/// Everything the orchestrator needs to compact one session's overflow.
#[derive(Debug, Clone)]
pub struct CompactionRequest {
    /// History older than the verbatim tail, oldest first.
    pub messages_to_summarize: Vec<Message>,
    /// Pre-boundary part of the current turn. Non-empty only when the
    /// cut falls inside a single turn.
    pub turn_prefix_messages: Vec<Message>,
    pub is_split_turn: bool,
    pub first_kept_entry_id: String,
    /// Token count of the full window before compaction, when the host
    /// knows it.
    pub tokens_before: Option<u32>,
    pub previous_summary: Option<String>,
    pub settings: CompactionSettings,
    pub custom_instructions: Option<String>,
    pub signal: CancellationToken,
    pub file_ops: FileOps,
}

impl Default for CompactionRequest {
    fn default() -> Self {
        Self {
            messages_to_summarize: Vec::new(),
            turn_prefix_messages: Vec::new(),
            is_split_turn: false,
            first_kept_entry_id: String::new(),
            tokens_before: None,
            previous_summary: None,
            settings: CompactionSettings::default(),
            custom_instructions: None,
            signal: CancellationToken::new(),
            file_ops: FileOps::default(),
        }
    }
}

/// What compaction hands back to the host. Always produced — on failure
/// the summary is the fallback text, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionArtifact {
    pub summary: String,
    #[serde(rename = "firstKeptEntryId")]
    pub first_kept_entry_id: String,
    #[serde(rename = "tokensBefore", skip_serializing_if = "Option::is_none")]
    pub tokens_before: Option<u32>,
    pub details: ArtifactDetails,
}

/// Sorted, deduplicated file lists. `read_files` excludes anything that
/// was also modified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDetails {
    #[serde(rename = "readFiles")]
    pub read_files: Vec<String>,
    #[serde(rename = "modifiedFiles")]
    pub modified_files: Vec<String>,
}

impl ArtifactDetails {
    /// Derive the outgoing lists from the host's raw sets: modified is
    /// the union of edited and written; read drops anything modified.
    pub fn from_file_ops(ops: &FileOps) -> Self {
        let modified: BTreeSet<&String> = ops.edited.iter().chain(ops.written.iter()).collect();
        let read_files = ops
            .read
            .iter()
            .filter(|p| !modified.contains(p))
            .cloned()
            .collect();
        Self {
            read_files,
            modified_files: modified.into_iter().cloned().collect(),
        }
    }
}

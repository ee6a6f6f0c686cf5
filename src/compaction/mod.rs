//! Conversation compaction: prune, stage-summarize, audit, assemble.
//!
//! The orchestrator never fails — every path ends in a `CompactionArtifact`,
//! falling back to a canned summary when the model is unreachable.

pub mod digest;
pub mod estimator;
pub mod guard;
pub mod orchestrator;
pub mod planner;
pub mod pruner;
pub mod stages;

pub use digest::{collect_tool_failures, format_tool_failures};
pub use estimator::{estimate_message_tokens, estimate_messages_tokens};
pub use guard::{audit_summary_quality, build_structure_instructions, extract_opaque_identifiers};
pub use orchestrator::{split_preserved_recent_turns, BeforeCompactEvent, Compactor, SessionContext};
pub use planner::{adaptive_chunk_ratio, is_oversized_for_summary};
pub use pruner::{prune_history_for_context_share, PruneRequest, PruneResult};
pub use stages::{summarize_in_stages, StageRequest};

/// Summary emitted when summarization is impossible or failed.
pub const FALLBACK_SUMMARY: &str = "Earlier conversation history was compacted to stay within \
the model's context window. A detailed summary could not be produced; rely on the preserved \
recent turns and re-establish any missing context from the workspace.";

/// Headroom multiplier applied to token estimates before budget checks.
pub const SAFETY_MARGIN: f64 = 1.2;

pub const MAX_TOOL_FAILURES: usize = 8;
pub const MAX_TOOL_FAILURE_CHARS: usize = 240;
pub const DEFAULT_RECENT_TURNS_PRESERVE: u32 = 3;
pub const MAX_RECENT_TURNS_PRESERVE: u32 = 12;
pub const DEFAULT_QUALITY_GUARD_MAX_RETRIES: u32 = 1;
pub const MAX_QUALITY_GUARD_MAX_RETRIES: u32 = 3;
pub const MAX_EXTRACTED_IDENTIFIERS: usize = 12;
pub const MAX_RECENT_TURN_TEXT_CHARS: usize = 600;
pub const MAX_SUMMARY_CONTEXT_CHARS: usize = 2000;
pub const DEFAULT_MAX_HISTORY_SHARE: f64 = 0.5;

/// Fraction of the context window one summarization chunk may use when
/// messages are ordinarily sized.
pub const BASE_CHUNK_RATIO: f64 = 0.3;
/// Floor for the chunk ratio when outlier messages force it down.
pub const MIN_CHUNK_RATIO: f64 = 0.1;

/// Sections a structured summary must contain, in order.
pub const REQUIRED_SUMMARY_SECTIONS: [&str; 5] = [
    "## Decisions",
    "## Open TODOs",
    "## Constraints/Rules",
    "## Pending user asks",
    "## Exact identifiers",
];

//! Context preservation for long-running assistant sessions: decide what
//! to remember when the working window overflows, and what to retrieve
//! from persistent memory when answering.
//!
//! Two subsystems, wired through [`Compactor::on_before_compact`] and
//! [`retrieval::ChunkStore`]:
//!
//! - **compaction** — prunes overflowing history, summarizes it in
//!   chained stages through a [`ModelClient`], audits the result against
//!   quality predicates with bounded retries, and assembles the final
//!   artifact (verbatim recent turns, tool-failure digest, file-op
//!   lists, workspace rules). Compaction never fails: every error path
//!   degrades to a fallback artifact.
//! - **retrieval** — fuses dense-vector and BM25 keyword search over one
//!   SQLite chunk corpus, applies an optional recency penalty, and cuts
//!   the ranking at a query-adaptive threshold.

pub mod compaction;
pub mod config;
pub mod error;
pub mod provider;
pub mod retrieval;
pub mod types;

pub use compaction::{BeforeCompactEvent, Compactor, SessionContext};
pub use config::{RuntimeRegistry, SafeguardRuntime};
pub use error::{CompactError, ModelError};
pub use provider::{AnthropicClient, ApiKeyResolver, CompletionRequest, ModelClient, ModelHandle};
pub use retrieval::{
    merge_hybrid_results, Chunk, ChunkStore, HybridResult, MergeOptions, RecencyConfig,
    RetrievalError,
};
pub use types::{
    ArtifactDetails, CompactionArtifact, CompactionRequest, CompactionSettings, ContentBlock,
    FileOps, Message, MessageContent, Role, ToolResultDetails,
};

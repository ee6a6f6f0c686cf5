//! Hybrid memory retrieval: dense-vector and BM25 keyword search over a
//! shared chunk corpus, fused by weighted sum with a query-adaptive
//! relevance cutoff.

pub mod embedding;
pub mod error;
pub mod fts;
pub mod merge;
pub mod scoring;
pub mod store;
pub mod types;

pub use embedding::{EmbeddingProvider, OllamaEmbedder};
pub use error::RetrievalError;
pub use fts::{bm25_rank_to_score, build_fts_query};
pub use merge::{
    apply_dynamic_threshold, calculate_dynamic_threshold, merge_hybrid_results, MergeOptions,
    Scored,
};
pub use scoring::{cosine_similarity, now_ms, recency_penalty, RecencyConfig};
pub use store::{ChunkStore, KeywordSearchOptions, VectorSearchOptions};
pub use types::{Chunk, HybridResult, KeywordHit, VectorHit};

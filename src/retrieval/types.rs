use serde::{Deserialize, Serialize};

use super::merge::Scored;

/// One indexed passage with stable identity, embedding, and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Free-form provenance label ("repo", "notes", "web", ...).
    pub source: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Wall-clock milliseconds of the last content change, if known.
    pub updated_at: Option<i64>,
    /// Embedding provider+model that produced `embedding`. Searches are
    /// restricted to chunks from the store's configured model.
    pub model: String,
}

/// A dense-search hit. Carries the chunk id so the hybrid merge can key
/// on it; the recency penalty has already been applied to `score`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub source: String,
    pub snippet: String,
    pub score: f64,
}

/// A lexical-search hit. `text_score` is the normalized BM25 score;
/// `score` equals it on this path.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub id: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub source: String,
    pub snippet: String,
    pub score: f64,
    pub text_score: f64,
}

/// What callers consume after the merge: provenance, snippet, and the
/// fused score with its two components. Identity, embedding, and
/// timestamps stay internal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridResult {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub source: String,
    pub snippet: String,
    pub score: f64,
    pub vector_score: f64,
    pub text_score: f64,
}

impl Scored for VectorHit {
    fn score(&self) -> f64 {
        self.score
    }
}

impl Scored for KeywordHit {
    fn score(&self) -> f64 {
        self.score
    }
}

impl Scored for HybridResult {
    fn score(&self) -> f64 {
        self.score
    }
}

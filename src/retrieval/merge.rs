//! Weighted-sum fusion of vector and keyword result sets, and the
//! query-adaptive relevance cutoff derived from top-result confidence.

use std::collections::HashMap;

use super::types::{HybridResult, KeywordHit, VectorHit};

pub const HIGH_CUT: f64 = 0.7;
pub const MED_CUT: f64 = 0.3;
pub const HIGH_MULT: f64 = 0.5;
pub const MED_MULT: f64 = 0.6;
pub const FLOOR: f64 = 0.15;

/// Anything with a fusable relevance score. Lets the threshold filter
/// work on any result shape.
pub trait Scored {
    fn score(&self) -> f64;
}

/// Relevance cutoff as a function of the best score in the list:
/// confident tops keep only their near neighbors, weak tops fall back to
/// a fixed floor. Negative tops land in the floor branch too.
pub fn calculate_dynamic_threshold(top: f64) -> f64 {
    if top >= HIGH_CUT {
        top * HIGH_MULT
    } else if top >= MED_CUT {
        top * MED_MULT
    } else {
        FLOOR
    }
}

/// Filter a descending-sorted result list by the dynamic threshold.
/// Identity when disabled or empty.
pub fn apply_dynamic_threshold<T: Scored>(results: Vec<T>, enabled: bool) -> Vec<T> {
    if !enabled || results.is_empty() {
        return results;
    }
    let tau = calculate_dynamic_threshold(results[0].score());
    results.into_iter().filter(|r| r.score() >= tau).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    pub vector_weight: f64,
    pub text_weight: f64,
    pub dynamic_threshold: bool,
}

/// Fuse the two result sets by chunk id. A side that missed a chunk
/// contributes zero; keyword snippets win over vector snippets when
/// non-empty. Output is sorted descending by fused score with ties left
/// in insertion order (vector results first, then keyword-only ones),
/// optionally cut by the dynamic threshold.
pub fn merge_hybrid_results(
    vector: Vec<VectorHit>,
    keyword: Vec<KeywordHit>,
    options: MergeOptions,
) -> Vec<HybridResult> {
    struct Entry {
        path: String,
        start_line: u32,
        end_line: u32,
        source: String,
        snippet: String,
        vector_score: f64,
        text_score: f64,
    }

    let mut order: Vec<Entry> = Vec::with_capacity(vector.len() + keyword.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in vector {
        index.insert(hit.id, order.len());
        order.push(Entry {
            path: hit.path,
            start_line: hit.start_line,
            end_line: hit.end_line,
            source: hit.source,
            snippet: hit.snippet,
            vector_score: hit.score,
            text_score: 0.0,
        });
    }

    for hit in keyword {
        match index.get(&hit.id) {
            Some(&i) => {
                order[i].text_score = hit.text_score;
                if !hit.snippet.is_empty() {
                    order[i].snippet = hit.snippet;
                }
            }
            None => {
                index.insert(hit.id, order.len());
                order.push(Entry {
                    path: hit.path,
                    start_line: hit.start_line,
                    end_line: hit.end_line,
                    source: hit.source,
                    snippet: hit.snippet,
                    vector_score: 0.0,
                    text_score: hit.text_score,
                });
            }
        }
    }

    let mut results: Vec<HybridResult> = order
        .into_iter()
        .map(|e| HybridResult {
            score: options.vector_weight * e.vector_score + options.text_weight * e.text_score,
            path: e.path,
            start_line: e.start_line,
            end_line: e.end_line,
            source: e.source,
            snippet: e.snippet,
            vector_score: e.vector_score,
            text_score: e.text_score,
        })
        .collect();

    // Stable sort: equal scores keep insertion order.
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    apply_dynamic_threshold(results, options.dynamic_threshold)
}

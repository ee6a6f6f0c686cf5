use tracing::debug;

use super::estimator::estimate_messages_tokens;
use crate::types::Message;

/// Inputs for a prune pass.
#[derive(Debug)]
pub struct PruneRequest {
    pub messages: Vec<Message>,
    pub max_context_tokens: u32,
    /// Share of the window history may occupy, in (0, 1].
    pub max_history_share: f64,
    /// How many roughly-equal buckets to split the history into; removal
    /// happens a whole bucket at a time, oldest first.
    pub parts: usize,
}

/// Survivors plus what was removed. Both sides keep original order.
#[derive(Debug)]
pub struct PruneResult {
    pub messages: Vec<Message>,
    pub dropped: Vec<Message>,
    pub dropped_chunks: usize,
}

impl PruneResult {
    pub fn dropped_messages(&self) -> usize {
        self.dropped.len()
    }
}

/// Drop the oldest chunks of summarizable history until what remains fits
/// inside `max_context_tokens × max_history_share`.
pub fn prune_history_for_context_share(request: PruneRequest) -> PruneResult {
    let PruneRequest {
        mut messages,
        max_context_tokens,
        max_history_share,
        parts,
    } = request;

    let budget = (max_context_tokens as f64 * max_history_share).floor() as u32;
    let chunk_len = messages.len().div_ceil(parts.max(1)).max(1);

    let mut dropped = Vec::new();
    let mut dropped_chunks = 0;

    while !messages.is_empty() && estimate_messages_tokens(&messages) > budget {
        let take = chunk_len.min(messages.len());
        dropped.extend(messages.drain(..take));
        dropped_chunks += 1;
    }

    if dropped_chunks > 0 {
        debug!(
            dropped_chunks,
            dropped_messages = dropped.len(),
            remaining = messages.len(),
            budget,
            "pruned oldest history chunks"
        );
    }

    PruneResult {
        messages,
        dropped,
        dropped_chunks,
    }
}

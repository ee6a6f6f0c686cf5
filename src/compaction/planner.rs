use super::estimator::{estimate_message_tokens, estimate_messages_tokens};
use super::{BASE_CHUNK_RATIO, MIN_CHUNK_RATIO, SAFETY_MARGIN};
use crate::types::Message;

/// Average message size, as a share of the window, above which the chunk
/// ratio starts shrinking.
const OUTLIER_SHARE: f64 = 0.10;

/// Fraction of the context window one summarization chunk may use,
/// adapted to the size of the messages being summarized.
///
/// Ordinarily-sized messages get `BASE_CHUNK_RATIO`. When the average
/// message exceeds 10% of the window, the ratio shrinks proportionally
/// so a chunk still holds more than one message, floored at
/// `MIN_CHUNK_RATIO`.
pub fn adaptive_chunk_ratio(messages: &[Message], context_window: u32) -> f64 {
    if messages.is_empty() {
        return BASE_CHUNK_RATIO;
    }

    let avg = estimate_messages_tokens(messages) as f64 / messages.len() as f64;
    let threshold = context_window as f64 * OUTLIER_SHARE;
    if avg <= threshold || avg == 0.0 {
        return BASE_CHUNK_RATIO;
    }

    (BASE_CHUNK_RATIO * threshold / avg).clamp(MIN_CHUNK_RATIO, BASE_CHUNK_RATIO)
}

/// True when a single message, with safety headroom, would eat more than
/// half the context window — too big to summarize whole.
pub fn is_oversized_for_summary(message: &Message, context_window: u32) -> bool {
    estimate_message_tokens(message) as f64 * SAFETY_MARGIN > context_window as f64 * 0.5
}

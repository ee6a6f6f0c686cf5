use crate::types::Message;

/// Calibration constant for the character heuristic: roughly four
/// characters of English or code per token. Good enough for the ratio
/// math downstream; nothing here needs a real tokenizer.
pub const CHARS_PER_TOKEN: usize = 4;

/// Flat per-message cost for role and framing.
pub(crate) const MESSAGE_OVERHEAD_TOKENS: u32 = 3;

/// Token estimate for a single message: visible text at chars/4 plus a
/// fixed overhead. Adding a message never decreases the total.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    let text_len = message.extracted_text().len();
    (text_len / CHARS_PER_TOKEN) as u32 + MESSAGE_OVERHEAD_TOKENS
}

/// Token estimate for a message sequence.
pub fn estimate_messages_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::estimator::{estimate_message_tokens, CHARS_PER_TOKEN, MESSAGE_OVERHEAD_TOKENS};
use crate::error::{CompactError, ModelError};
use crate::provider::{CompletionRequest, ModelClient};
use crate::types::{Message, Role};

/// Inputs for one staged-summarization run.
pub struct StageRequest<'a> {
    pub messages: &'a [Message],
    pub model: &'a str,
    pub api_key: &'a str,
    pub signal: &'a CancellationToken,
    /// Response budget forwarded to each completion call.
    pub reserve_tokens: u32,
    /// Upper bound on the token estimate of one segment.
    pub max_chunk_tokens: u32,
    pub instructions: &'a str,
    pub previous_summary: Option<String>,
}

/// Summarize a message sequence in chained stages.
///
/// Messages are partitioned into contiguous segments bounded by
/// `max_chunk_tokens`; each segment's prompt embeds the summary returned
/// for the previous one, so the final completion covers everything seen
/// so far. Segments run strictly in order — the chained-summary protocol
/// forbids parallelism. Cancellation is observed before and during every
/// model call.
pub async fn summarize_in_stages(
    client: &dyn ModelClient,
    request: StageRequest<'_>,
) -> Result<String, CompactError> {
    let segments = partition_messages(request.messages, request.max_chunk_tokens);
    let mut summary = request.previous_summary.clone();

    debug!(
        segments = segments.len(),
        messages = request.messages.len(),
        max_chunk_tokens = request.max_chunk_tokens,
        "staged summarization starting"
    );

    for (index, segment) in segments.iter().enumerate() {
        if request.signal.is_cancelled() {
            return Err(CompactError::Cancelled);
        }

        let prompt = build_stage_prompt(request.instructions, summary.as_deref(), segment);
        let completion = CompletionRequest {
            model: request.model.to_string(),
            api_key: request.api_key.to_string(),
            prompt,
            reserve_tokens: request.reserve_tokens,
        };

        let stage_summary = tokio::select! {
            result = client.complete(completion) => result?,
            _ = request.signal.cancelled() => {
                debug!(stage = index, "summarization cancelled mid-call");
                return Err(CompactError::Cancelled);
            }
        };

        debug!(stage = index, chars = stage_summary.len(), "stage summarized");
        summary = Some(stage_summary);
    }

    match summary {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(CompactError::Model(ModelError::EmptyCompletion)),
    }
}

/// Split messages into contiguous segments whose estimates stay within
/// `max_chunk_tokens`. A message that alone exceeds the bound has its
/// text truncated at the estimator budget and proceeds as its own
/// segment — the tail of a pathological transcript entry is the least
/// valuable thing in it.
fn partition_messages(messages: &[Message], max_chunk_tokens: u32) -> Vec<Vec<Message>> {
    let mut segments: Vec<Vec<Message>> = Vec::new();
    let mut current: Vec<Message> = Vec::new();
    let mut current_tokens: u32 = 0;

    for message in messages {
        let mut message = message.clone();
        let mut tokens = estimate_message_tokens(&message);

        if tokens > max_chunk_tokens {
            message = truncate_to_budget(&message, max_chunk_tokens);
            tokens = estimate_message_tokens(&message);
        }

        if !current.is_empty() && current_tokens + tokens > max_chunk_tokens {
            segments.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push(message);
    }

    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

fn truncate_to_budget(message: &Message, max_chunk_tokens: u32) -> Message {
    let budget_chars = (max_chunk_tokens.saturating_sub(MESSAGE_OVERHEAD_TOKENS) as usize)
        .saturating_mul(CHARS_PER_TOKEN);
    let text = message.extracted_text();
    let mut end = budget_chars.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = Message::text(message.role, &text[..end]);
    truncated.tool_call_id = message.tool_call_id.clone();
    truncated.tool_name = message.tool_name.clone();
    truncated.is_error = message.is_error;
    truncated
}

fn build_stage_prompt(instructions: &str, previous_summary: Option<&str>, segment: &[Message]) -> String {
    let mut prompt = String::from(instructions);

    if let Some(previous) = previous_summary {
        prompt.push_str("\n\nSummary of the conversation so far (fold the new segment into it):\n");
        prompt.push_str(previous);
    }

    prompt.push_str("\n\n---\nConversation segment:\n");
    prompt.push_str(&render_transcript(segment));
    prompt
}

fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let text = message.extracted_text();
        if text.is_empty() {
            continue;
        }
        let label = match message.role {
            Role::User => "User".to_string(),
            Role::Assistant => "Assistant".to_string(),
            Role::ToolResult => {
                let name = message.tool_name.as_deref().unwrap_or("tool");
                if message.is_error == Some(true) {
                    format!("Tool result ({name}, error)")
                } else {
                    format!("Tool result ({name})")
                }
            }
            Role::Other => "Context".to_string(),
        };
        out.push_str(&label);
        out.push_str(": ");
        out.push_str(&text);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockClient {
        responses: Mutex<VecDeque<Result<String, ModelError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(
                    responses.into_iter().map(|s| Ok(s.to_string())).collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            let mut queue = VecDeque::new();
            queue.push_back(Err(ModelError::Request("connection reset".into())));
            Self {
                responses: Mutex::new(queue),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for MockClient {
        async fn complete(&self, request: CompletionRequest) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(request.prompt);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ModelError::Request("no more mock responses".into())))
        }
    }

    fn msg(text: &str) -> Message {
        Message::text(Role::User, text)
    }

    fn request<'a>(
        messages: &'a [Message],
        signal: &'a CancellationToken,
        max_chunk_tokens: u32,
    ) -> StageRequest<'a> {
        StageRequest {
            messages,
            model: "test-model",
            api_key: "key",
            signal,
            reserve_tokens: 512,
            max_chunk_tokens,
            instructions: "Summarize.",
            previous_summary: None,
        }
    }

    #[tokio::test]
    async fn single_segment_single_call() {
        let client = MockClient::new(vec!["the summary"]);
        let messages = vec![msg("hello"), msg("world")];
        let signal = CancellationToken::new();

        let summary = summarize_in_stages(&client, request(&messages, &signal, 10_000))
            .await
            .unwrap();
        assert_eq!(summary, "the summary");
        assert_eq!(client.prompts().len(), 1);
    }

    #[tokio::test]
    async fn chained_segments_feed_forward() {
        let client = MockClient::new(vec!["summary one", "summary two"]);
        // Each message ~28 tokens; cap forces two segments.
        let messages = vec![msg(&"a".repeat(100)), msg(&"b".repeat(100))];
        let signal = CancellationToken::new();

        let summary = summarize_in_stages(&client, request(&messages, &signal, 30))
            .await
            .unwrap();
        assert_eq!(summary, "summary two");

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(
            prompts[1].contains("summary one"),
            "second prompt must embed the first stage's output"
        );
    }

    #[tokio::test]
    async fn previous_summary_seeds_first_prompt() {
        let client = MockClient::new(vec!["updated"]);
        let messages = vec![msg("new stuff")];
        let signal = CancellationToken::new();
        let mut req = request(&messages, &signal, 10_000);
        req.previous_summary = Some("earlier summary".into());

        summarize_in_stages(&client, req).await.unwrap();
        assert!(client.prompts()[0].contains("earlier summary"));
    }

    #[tokio::test]
    async fn oversized_message_is_truncated_not_fatal() {
        let client = MockClient::new(vec!["ok"]);
        let messages = vec![msg(&"z".repeat(100_000))];
        let signal = CancellationToken::new();

        let summary = summarize_in_stages(&client, request(&messages, &signal, 50))
            .await
            .unwrap();
        assert_eq!(summary, "ok");
        // The prompt carries at most the estimator budget of message text.
        assert!(client.prompts()[0].len() < 1_000);
    }

    #[tokio::test]
    async fn cancellation_before_call() {
        let client = MockClient::new(vec!["never"]);
        let messages = vec![msg("hello")];
        let signal = CancellationToken::new();
        signal.cancel();

        let err = summarize_in_stages(&client, request(&messages, &signal, 10_000))
            .await
            .unwrap_err();
        assert!(matches!(err, CompactError::Cancelled));
        assert!(client.prompts().is_empty());
    }

    #[tokio::test]
    async fn upstream_error_propagates() {
        let client = MockClient::failing();
        let messages = vec![msg("hello")];
        let signal = CancellationToken::new();

        let err = summarize_in_stages(&client, request(&messages, &signal, 10_000))
            .await
            .unwrap_err();
        assert!(matches!(err, CompactError::Model(_)));
    }

    #[tokio::test]
    async fn empty_input_is_an_error_not_an_empty_summary() {
        let client = MockClient::new(vec![]);
        let messages: Vec<Message> = Vec::new();
        let signal = CancellationToken::new();

        let err = summarize_in_stages(&client, request(&messages, &signal, 10_000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CompactError::Model(ModelError::EmptyCompletion)
        ));
    }

    #[test]
    fn partition_respects_budget() {
        let messages: Vec<Message> = (0..6).map(|_| msg(&"x".repeat(100))).collect();
        // ~28 tokens each; budget 60 fits two per segment.
        let segments = partition_messages(&messages, 60);
        assert_eq!(segments.len(), 3);
        for segment in &segments {
            assert_eq!(segment.len(), 2);
        }
    }

    #[test]
    fn transcript_skips_empty_and_labels_tools() {
        let mut failure = Message::text(Role::ToolResult, "ENOENT");
        failure.tool_name = Some("exec".into());
        failure.is_error = Some(true);
        let messages = vec![msg(""), failure, Message::text(Role::Assistant, "done")];

        let transcript = render_transcript(&messages);
        assert!(transcript.contains("Tool result (exec, error): ENOENT"));
        assert!(transcript.contains("Assistant: done"));
        assert!(!transcript.contains("User:"));
    }
}

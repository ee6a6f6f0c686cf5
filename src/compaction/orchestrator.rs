use tracing::{debug, info, warn};

use super::digest::{format_file_ops, format_tool_failures, load_workspace_rules};
use super::guard::{audit_summary_quality, build_structure_instructions, extract_opaque_identifiers};
use super::planner::adaptive_chunk_ratio;
use super::pruner::{prune_history_for_context_share, PruneRequest};
use super::stages::{summarize_in_stages, StageRequest};
use super::{
    DEFAULT_MAX_HISTORY_SHARE, DEFAULT_QUALITY_GUARD_MAX_RETRIES, DEFAULT_RECENT_TURNS_PRESERVE,
    FALLBACK_SUMMARY, MAX_QUALITY_GUARD_MAX_RETRIES, MAX_RECENT_TURNS_PRESERVE,
    MAX_RECENT_TURN_TEXT_CHARS,
};
use crate::config::RuntimeRegistry;
use crate::error::CompactError;
use crate::provider::{ApiKeyResolver, ModelClient, ModelHandle};
use crate::types::{ArtifactDetails, CompactionArtifact, CompactionRequest, Message, Role};

/// Instructions prepended when the split-turn prefix is summarized on its
/// own, separate from the main history.
const TURN_PREFIX_INSTRUCTIONS: &str = "The messages below are the already-elapsed part of the \
turn currently in progress. Summarize them as working context for finishing that turn: the \
user's intent, what has been attempted so far, and any intermediate results.";

/// The `session_before_compact` payload from the host runtime.
#[derive(Debug)]
pub struct BeforeCompactEvent {
    pub preparation: CompactionRequest,
    /// Event-level focus instructions; override the request's when set.
    pub custom_instructions: Option<String>,
}

/// Host-session facilities the orchestrator consults.
pub struct SessionContext<'a> {
    pub model: Option<ModelHandle>,
    pub keys: &'a dyn ApiKeyResolver,
    /// Session-manager identity, used for the runtime-config lookup.
    pub session_id: &'a str,
    pub registry: &'a RuntimeRegistry,
}

/// Knobs after registry lookup, clamping, and defaulting.
#[derive(Debug, Clone, Copy)]
struct ResolvedKnobs {
    context_window: u32,
    recent_turns_preserve: u32,
    quality_guard_enabled: bool,
    quality_guard_max_retries: u32,
    max_history_share: f64,
}

/// Drives one compaction request through prune → preserve-tail →
/// summarize (with audit retries) → assemble. Always produces an
/// artifact; every failure path degrades to the fallback summary.
pub struct Compactor {
    client: Box<dyn ModelClient>,
}

impl Compactor {
    pub fn new(client: impl ModelClient + 'static) -> Self {
        Self {
            client: Box::new(client),
        }
    }

    pub async fn on_before_compact(
        &self,
        event: BeforeCompactEvent,
        ctx: &SessionContext<'_>,
    ) -> CompactionArtifact {
        let prep = event.preparation;
        let custom_instructions = event
            .custom_instructions
            .or_else(|| prep.custom_instructions.clone());

        let details = ArtifactDetails::from_file_ops(&prep.file_ops);
        let all_messages: Vec<Message> = prep
            .messages_to_summarize
            .iter()
            .chain(prep.turn_prefix_messages.iter())
            .cloned()
            .collect();
        let tool_failure_section = format_tool_failures(&all_messages);
        let file_ops_block = format_file_ops(&details);

        let Some(model) = ctx.model.clone() else {
            return fallback_artifact(
                "no model configured",
                &prep,
                &details,
                &tool_failure_section,
                &file_ops_block,
            );
        };
        let Some(api_key) = ctx.keys.api_key(&model.id) else {
            return fallback_artifact(
                "no API key for model",
                &prep,
                &details,
                &tool_failure_section,
                &file_ops_block,
            );
        };

        let knobs = resolve_knobs(ctx, &model);
        debug!(
            context_window = knobs.context_window,
            recent_turns = knobs.recent_turns_preserve,
            guard = knobs.quality_guard_enabled,
            retries = knobs.quality_guard_max_retries,
            "compaction knobs resolved"
        );

        match self
            .summarize_phase(&prep, custom_instructions.as_deref(), &model, &api_key, knobs)
            .await
        {
            Ok(summary) => {
                let mut final_summary = summary;
                if !tool_failure_section.is_empty() {
                    final_summary.push_str("\n\n");
                    final_summary.push_str(&tool_failure_section);
                }
                final_summary.push_str(&file_ops_block);
                final_summary.push_str(&load_workspace_rules().await);

                info!(
                    summary_chars = final_summary.len(),
                    first_kept_entry_id = %prep.first_kept_entry_id,
                    "compaction complete"
                );
                CompactionArtifact {
                    summary: final_summary,
                    first_kept_entry_id: prep.first_kept_entry_id,
                    tokens_before: prep.tokens_before,
                    details,
                }
            }
            Err(e) => fallback_artifact(
                &e.to_string(),
                &prep,
                &details,
                &tool_failure_section,
                &file_ops_block,
            ),
        }
    }

    /// PRUNE → PRESERVE_TAIL → SUMMARIZE (with the quality-guard retry
    /// loop). Returns the summary text before assembly.
    async fn summarize_phase(
        &self,
        prep: &CompactionRequest,
        custom_instructions: Option<&str>,
        model: &ModelHandle,
        api_key: &str,
        knobs: ResolvedKnobs,
    ) -> Result<String, CompactError> {
        let structured_instructions = build_structure_instructions(custom_instructions);
        let mut summarizable = prep.messages_to_summarize.clone();
        let prefix = &prep.turn_prefix_messages;

        // PRUNE: when the host told us the pre-compaction window size,
        // check whether the content that must stay verbatim would starve
        // the summarization step itself.
        let mut dropped_summary: Option<String> = None;
        if let Some(tokens_before) = prep.tokens_before {
            let summarizable_tokens = super::estimate_messages_tokens(&summarizable)
                + super::estimate_messages_tokens(prefix);
            let new_content_tokens = tokens_before.saturating_sub(summarizable_tokens);
            let limit = (knobs.context_window as f64
                * knobs.max_history_share
                * super::SAFETY_MARGIN)
                .floor() as u32;

            if new_content_tokens > limit {
                let result = prune_history_for_context_share(PruneRequest {
                    messages: std::mem::take(&mut summarizable),
                    max_context_tokens: knobs.context_window,
                    max_history_share: knobs.max_history_share,
                    parts: 2,
                });
                summarizable = result.messages;

                if result.dropped_chunks > 0 {
                    warn!(
                        dropped_chunks = result.dropped_chunks,
                        dropped_messages = result.dropped.len(),
                        "new content exceeds history budget, oldest chunks dropped"
                    );
                    if !result.dropped.is_empty() {
                        let ratio = adaptive_chunk_ratio(&result.dropped, knobs.context_window);
                        let max_chunk_tokens =
                            ((knobs.context_window as f64 * ratio).floor() as u32).max(1);
                        match summarize_in_stages(
                            self.client.as_ref(),
                            StageRequest {
                                messages: &result.dropped,
                                model: &model.id,
                                api_key,
                                signal: &prep.signal,
                                reserve_tokens: prep.settings.reserve_tokens,
                                max_chunk_tokens,
                                instructions: &structured_instructions,
                                previous_summary: None,
                            },
                        )
                        .await
                        {
                            Ok(summary) => dropped_summary = Some(summary),
                            Err(e) => warn!(
                                error = %e,
                                "dropped-history summarization failed, continuing without it"
                            ),
                        }
                    }
                }
            }
        }

        // PRESERVE_TAIL
        let (summarizable, preserved) =
            split_preserved_recent_turns(summarizable, knobs.recent_turns_preserve as usize);
        let preserved_section = format_preserved_section(&preserved);

        // SUMMARIZE
        let latest_user_ask = summarizable
            .iter()
            .chain(preserved.iter())
            .chain(prefix.iter())
            .filter(|m| m.role == Role::User)
            .map(|m| m.extracted_text())
            .next_back();

        let seed_text = {
            let tail_start = summarizable.len().saturating_sub(10);
            summarizable[tail_start..]
                .iter()
                .chain(preserved.iter())
                .map(|m| m.extracted_text())
                .collect::<Vec<_>>()
                .join("\n")
        };
        let identifiers = extract_opaque_identifiers(&seed_text);

        let ratio_input: Vec<Message> = summarizable
            .iter()
            .chain(prefix.iter())
            .cloned()
            .collect();
        let adaptive_ratio = adaptive_chunk_ratio(&ratio_input, knobs.context_window);
        let max_chunk_tokens =
            ((knobs.context_window as f64 * adaptive_ratio).floor() as u32).max(1);
        let effective_previous_summary =
            dropped_summary.or_else(|| prep.previous_summary.clone());

        let total_attempts = if knobs.quality_guard_enabled {
            knobs.quality_guard_max_retries + 1
        } else {
            1
        };
        let mut current_instructions = structured_instructions.clone();

        for attempt in 0..total_attempts {
            let history_summary = summarize_in_stages(
                self.client.as_ref(),
                StageRequest {
                    messages: &summarizable,
                    model: &model.id,
                    api_key,
                    signal: &prep.signal,
                    reserve_tokens: prep.settings.reserve_tokens,
                    max_chunk_tokens,
                    instructions: &current_instructions,
                    previous_summary: effective_previous_summary.clone(),
                },
            )
            .await?;

            let mut summary = history_summary;
            if prep.is_split_turn && !prefix.is_empty() {
                let prefix_instructions =
                    format!("{TURN_PREFIX_INSTRUCTIONS}\n\n{current_instructions}");
                let prefix_summary = summarize_in_stages(
                    self.client.as_ref(),
                    StageRequest {
                        messages: prefix,
                        model: &model.id,
                        api_key,
                        signal: &prep.signal,
                        reserve_tokens: prep.settings.reserve_tokens,
                        max_chunk_tokens,
                        instructions: &prefix_instructions,
                        previous_summary: None,
                    },
                )
                .await?;
                summary = format!(
                    "{summary}\n\n---\n\n**Turn Context (split turn):**\n\n{prefix_summary}"
                );
            }

            if !preserved_section.is_empty() {
                summary.push_str("\n\n");
                summary.push_str(&preserved_section);
            }

            if !knobs.quality_guard_enabled || attempt + 1 == total_attempts {
                return Ok(summary);
            }

            let audit = audit_summary_quality(&summary, &identifiers, latest_user_ask.as_deref());
            if audit.ok {
                return Ok(summary);
            }

            warn!(
                attempt,
                reasons = %audit.reasons.join(", "),
                "summary failed quality audit, retrying with repair instructions"
            );
            current_instructions = format!(
                "{structured_instructions}\n\nPrevious summary failed quality checks ({}). \
                 Fix all issues and include every required section with exact identifiers \
                 preserved.",
                audit.reasons.join(", ")
            );
        }

        unreachable!("retry loop always returns on its final attempt")
    }
}

fn fallback_artifact(
    reason: &str,
    prep: &CompactionRequest,
    details: &ArtifactDetails,
    tool_failure_section: &str,
    file_ops_block: &str,
) -> CompactionArtifact {
    warn!(reason, "compaction falling back to canned summary");
    let mut summary = FALLBACK_SUMMARY.to_string();
    if !tool_failure_section.is_empty() {
        summary.push_str("\n\n");
        summary.push_str(tool_failure_section);
    }
    summary.push_str(file_ops_block);
    CompactionArtifact {
        summary,
        first_kept_entry_id: prep.first_kept_entry_id.clone(),
        tokens_before: prep.tokens_before,
        details: details.clone(),
    }
}

fn resolve_knobs(ctx: &SessionContext<'_>, model: &ModelHandle) -> ResolvedKnobs {
    let runtime = ctx.registry.get(ctx.session_id).unwrap_or_default();

    let max_history_share = runtime
        .max_history_share
        .filter(|s| *s > 0.0 && *s <= 1.0)
        .unwrap_or(DEFAULT_MAX_HISTORY_SHARE);

    ResolvedKnobs {
        context_window: runtime
            .context_window_tokens
            .unwrap_or(model.context_window),
        recent_turns_preserve: runtime
            .recent_turns_preserve
            .unwrap_or(DEFAULT_RECENT_TURNS_PRESERVE)
            .min(MAX_RECENT_TURNS_PRESERVE),
        quality_guard_enabled: runtime.quality_guard_enabled.unwrap_or(true),
        quality_guard_max_retries: runtime
            .quality_guard_max_retries
            .unwrap_or(DEFAULT_QUALITY_GUARD_MAX_RETRIES)
            .min(MAX_QUALITY_GUARD_MAX_RETRIES),
        max_history_share,
    }
}

/// Peel the newest `recent_turns` user/assistant pairs off the
/// summarizable set. Returns `(summarizable, preserved)`, both in
/// original order. With `recent_turns = 0` this is the identity on the
/// left and empty on the right.
pub fn split_preserved_recent_turns(
    messages: Vec<Message>,
    recent_turns: usize,
) -> (Vec<Message>, Vec<Message>) {
    if recent_turns == 0 {
        return (messages, Vec::new());
    }

    let want = recent_turns * 2;
    let mut keep = vec![false; messages.len()];
    let mut collected = 0;
    for i in (0..messages.len()).rev() {
        if collected >= want {
            break;
        }
        if matches!(messages[i].role, Role::User | Role::Assistant) {
            keep[i] = true;
            collected += 1;
        }
    }

    let mut summarizable = Vec::new();
    let mut preserved = Vec::new();
    for (message, preserve) in messages.into_iter().zip(keep) {
        if preserve {
            preserved.push(message);
        } else {
            summarizable.push(message);
        }
    }
    (summarizable, preserved)
}

/// Render the verbatim-tail section. Messages with no visible text are
/// skipped; long ones are cut at `MAX_RECENT_TURN_TEXT_CHARS`.
fn format_preserved_section(preserved: &[Message]) -> String {
    let mut lines = Vec::new();
    for message in preserved {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            _ => continue,
        };
        let text = message.extracted_text();
        if text.is_empty() {
            continue;
        }
        let shown = if text.chars().count() > MAX_RECENT_TURN_TEXT_CHARS {
            let cut: String = text.chars().take(MAX_RECENT_TURN_TEXT_CHARS).collect();
            format!("{cut}...")
        } else {
            text
        };
        lines.push(format!("- {label}: {shown}"));
    }

    if lines.is_empty() {
        String::new()
    } else {
        format!("## Recent turns preserved verbatim\n{}", lines.join("\n"))
    }
}

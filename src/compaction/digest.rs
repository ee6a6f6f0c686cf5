//! Pure formatting helpers for the assembled artifact: tool-failure
//! digest, file-operation block, workspace rules.

use std::collections::HashSet;

use tracing::debug;

use super::{MAX_SUMMARY_CONTEXT_CHARS, MAX_TOOL_FAILURES, MAX_TOOL_FAILURE_CHARS};
use crate::types::{ArtifactDetails, Message, Role};

/// One failed tool call, ready for the digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub tool_name: String,
    pub meta: Option<String>,
    pub summary: String,
}

/// Collect failed tool results, newest-unaware and deduplicated by call
/// id. Only messages with `isError = true` and a string call id count.
pub fn collect_tool_failures(messages: &[Message]) -> Vec<ToolFailure> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut failures = Vec::new();

    for message in messages {
        if message.role != Role::ToolResult || message.is_error != Some(true) {
            continue;
        }
        let Some(call_id) = message.tool_call_id.as_deref() else {
            continue;
        };
        if !seen.insert(call_id) {
            continue;
        }

        let tool_name = message.tool_name.clone().unwrap_or_else(|| "tool".into());

        let meta = message.details.as_ref().and_then(|d| {
            let mut parts = Vec::new();
            if let Some(status) = &d.status {
                parts.push(format!("status={status}"));
            }
            if let Some(code) = d.exit_code {
                parts.push(format!("exitCode={code}"));
            }
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        });

        let collapsed = collapse_whitespace(&message.extracted_text());
        let summary = if collapsed.is_empty() {
            if meta.is_some() {
                "failed".to_string()
            } else {
                "failed (no output)".to_string()
            }
        } else {
            truncate_chars(&collapsed, MAX_TOOL_FAILURE_CHARS)
        };

        failures.push(ToolFailure {
            tool_name,
            meta,
            summary,
        });
    }
    failures
}

/// Render the `## Tool Failures` section, capped at `MAX_TOOL_FAILURES`
/// entries. Empty string when there is nothing to report.
pub fn format_tool_failures(messages: &[Message]) -> String {
    let failures = collect_tool_failures(messages);
    if failures.is_empty() {
        return String::new();
    }

    let mut out = String::from("## Tool Failures\n");
    for failure in failures.iter().take(MAX_TOOL_FAILURES) {
        let meta = failure
            .meta
            .as_ref()
            .map(|m| format!(" ({m})"))
            .unwrap_or_default();
        out.push_str(&format!(
            "- {}{}: {}\n",
            failure.tool_name, meta, failure.summary
        ));
    }
    if failures.len() > MAX_TOOL_FAILURES {
        out.push_str(&format!(
            "- ...and {} more\n",
            failures.len() - MAX_TOOL_FAILURES
        ));
    }
    out.trim_end().to_string()
}

/// Render the file-operation block. Empty sets are omitted; the whole
/// block is empty when nothing was touched, otherwise it starts with a
/// blank line so it can be appended to the summary directly.
pub fn format_file_ops(details: &ArtifactDetails) -> String {
    let mut sections = Vec::new();
    if !details.read_files.is_empty() {
        sections.push(format!(
            "<read-files>\n{}\n</read-files>",
            details.read_files.join("\n")
        ));
    }
    if !details.modified_files.is_empty() {
        sections.push(format!(
            "<modified-files>\n{}\n</modified-files>",
            details.modified_files.join("\n")
        ));
    }
    if sections.is_empty() {
        String::new()
    } else {
        format!("\n\n{}", sections.join("\n"))
    }
}

/// Workspace-critical rules pulled from `AGENTS.md` in the current
/// directory. Any failure — missing file, unreadable, no matching
/// sections — yields an empty string.
pub async fn load_workspace_rules() -> String {
    let content = match tokio::fs::read_to_string("AGENTS.md").await {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "no workspace rules available");
            return String::new();
        }
    };
    format_workspace_rules(&content)
}

/// Extract the `Session Startup` and `Red Lines` sections and wrap them
/// for injection. Split out from the I/O for testability.
pub fn format_workspace_rules(content: &str) -> String {
    let mut parts = Vec::new();
    for name in ["Session Startup", "Red Lines"] {
        if let Some(section) = extract_markdown_section(content, name) {
            parts.push(section);
        }
    }
    if parts.is_empty() {
        return String::new();
    }

    let mut rules = parts.join("\n\n");
    if rules.len() > MAX_SUMMARY_CONTEXT_CHARS {
        rules = truncate_char_boundary(&rules, MAX_SUMMARY_CONTEXT_CHARS);
        rules.push_str("\n...[truncated]...");
    }
    format!("\n\n<workspace-critical-rules>\n{rules}\n</workspace-critical-rules>")
}

/// Lines of a markdown section: from its heading up to the next heading
/// of any level.
fn extract_markdown_section(content: &str, name: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut inside = false;

    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(heading) = trimmed.strip_prefix('#') {
            let title = heading.trim_start_matches('#').trim();
            if inside {
                break;
            }
            inside = title == name;
            if inside {
                lines.push(line);
            }
            continue;
        }
        if inside {
            lines.push(line);
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n").trim_end().to_string())
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

fn truncate_char_boundary(text: &str, max_len: usize) -> String {
    let mut end = max_len.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileOps, ToolResultDetails};

    fn failure(id: &str, name: Option<&str>, text: &str) -> Message {
        let mut m = Message::text(Role::ToolResult, text);
        m.tool_call_id = Some(id.into());
        m.tool_name = name.map(str::to_string);
        m.is_error = Some(true);
        m
    }

    #[test]
    fn digest_matches_expected_line_format() {
        let mut failed = failure("c1", Some("exec"), "ENOENT: missing file");
        failed.details = Some(ToolResultDetails {
            status: Some("failed".into()),
            exit_code: Some(1),
            rest: serde_json::Map::new(),
        });
        let mut ok = Message::text(Role::ToolResult, "fine");
        ok.tool_call_id = Some("c2".into());
        ok.tool_name = Some("read".into());
        ok.is_error = Some(false);

        let section = format_tool_failures(&[failed, ok]);
        assert!(section.starts_with("## Tool Failures"));
        assert!(section.contains("exec (status=failed exitCode=1): ENOENT: missing file"));
        assert!(!section.contains("read"));
    }

    #[test]
    fn digest_dedupes_by_call_id() {
        let messages = vec![
            failure("c1", Some("exec"), "first"),
            failure("c1", Some("exec"), "second"),
        ];
        let failures = collect_tool_failures(&messages);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].summary, "first");
    }

    #[test]
    fn digest_requires_error_flag_and_call_id() {
        let mut no_id = Message::text(Role::ToolResult, "boom");
        no_id.is_error = Some(true);
        let mut not_error = failure("c3", None, "fine");
        not_error.is_error = None;

        assert!(collect_tool_failures(&[no_id, not_error]).is_empty());
    }

    #[test]
    fn digest_empty_output_variants() {
        let bare = failure("c1", None, "");
        let mut with_meta = failure("c2", None, "");
        with_meta.details = Some(ToolResultDetails {
            status: Some("timeout".into()),
            exit_code: None,
            rest: serde_json::Map::new(),
        });

        let failures = collect_tool_failures(&[bare, with_meta]);
        assert_eq!(failures[0].tool_name, "tool");
        assert_eq!(failures[0].summary, "failed (no output)");
        assert_eq!(failures[1].summary, "failed");
        assert_eq!(failures[1].meta.as_deref(), Some("status=timeout"));
    }

    #[test]
    fn digest_truncates_and_collapses_whitespace() {
        let text = format!("line one\n\n  line\ttwo {}", "x".repeat(500));
        let failures = collect_tool_failures(&[failure("c1", Some("exec"), &text)]);
        assert!(failures[0].summary.starts_with("line one line two"));
        assert!(failures[0].summary.ends_with("..."));
        assert_eq!(failures[0].summary.chars().count(), MAX_TOOL_FAILURE_CHARS + 3);
    }

    #[test]
    fn digest_caps_entries_and_reports_rest() {
        let messages: Vec<Message> = (0..11)
            .map(|i| failure(&format!("c{i}"), Some("exec"), "boom"))
            .collect();
        let section = format_tool_failures(&messages);
        assert_eq!(section.matches("- exec").count(), MAX_TOOL_FAILURES);
        assert!(section.ends_with("- ...and 3 more"));
    }

    #[test]
    fn no_failures_no_section() {
        assert_eq!(format_tool_failures(&[]), "");
    }

    #[test]
    fn file_ops_block_shapes() {
        let mut ops = FileOps::default();
        assert_eq!(format_file_ops(&ArtifactDetails::from_file_ops(&ops)), "");

        ops.read.insert("/b.rs".into());
        ops.read.insert("/a.rs".into());
        let block = format_file_ops(&ArtifactDetails::from_file_ops(&ops));
        assert_eq!(block, "\n\n<read-files>\n/a.rs\n/b.rs\n</read-files>");

        ops.written.insert("/c.rs".into());
        let block = format_file_ops(&ArtifactDetails::from_file_ops(&ops));
        assert!(block.contains("<read-files>"));
        assert!(block.ends_with("<modified-files>\n/c.rs\n</modified-files>"));
    }

    #[test]
    fn workspace_rules_extracts_named_sections() {
        let content = "# Intro\nhi\n## Session Startup\nrun make dev\nthen wait\n\
                       ## Other\nskip\n## Red Lines\nnever force-push\n";
        let rules = format_workspace_rules(content);
        assert!(rules.starts_with("\n\n<workspace-critical-rules>"));
        assert!(rules.contains("run make dev"));
        assert!(rules.contains("never force-push"));
        assert!(!rules.contains("skip"));
    }

    #[test]
    fn workspace_rules_absent_sections_yield_empty() {
        assert_eq!(format_workspace_rules("# Readme\nnothing here"), "");
    }

    #[test]
    fn workspace_rules_truncated_when_long() {
        let content = format!("## Red Lines\n{}", "a".repeat(3_000));
        let rules = format_workspace_rules(&content);
        assert!(rules.contains("...[truncated]..."));
        // Wrapper plus truncation marker stay within a sane bound.
        assert!(rules.len() < MAX_SUMMARY_CONTEXT_CHARS + 100);
    }

    #[tokio::test]
    async fn missing_rules_file_is_silent() {
        // The repo root has no AGENTS.md during tests run from a temp cwd;
        // either way the call must not fail.
        let _ = load_workspace_rules().await;
    }
}

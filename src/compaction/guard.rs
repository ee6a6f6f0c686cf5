//! Quality guard: structure instructions, identifier extraction, and the
//! summary audit that drives re-summarization retries.

use std::sync::LazyLock;

use regex::Regex;

use super::{MAX_EXTRACTED_IDENTIFIERS, REQUIRED_SUMMARY_SECTIONS};

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static WINDOWS_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z]:\\\S+").unwrap());
static POSIX_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^\w/.])(/[A-Za-z0-9._\-/]+)").unwrap());
static HOST_PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z0-9][A-Za-z0-9.\-]*:[0-9]{1,5}\b").unwrap());
static HEX_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{8,}\b").unwrap());
static DIGIT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[0-9]{6,}\b").unwrap());

const LEADING_WRAP: &[char] = &['(', '"', '\'', '`', '[', '{', '<'];
const TRAILING_WRAP: &[char] = &[')', ']', '"', '\'', '`', ',', ';', ':', '.', '!', '?', '<', '>'];

const MIN_IDENTIFIER_LEN: usize = 4;

/// Result of auditing a summary against the quality predicates.
#[derive(Debug, Clone)]
pub struct Audit {
    pub ok: bool,
    pub reasons: Vec<String>,
}

/// Header prepended to every summarization prompt: the exact section
/// skeleton the model must produce, plus the preservation directives.
pub fn build_structure_instructions(custom_instructions: Option<&str>) -> String {
    let mut out = String::from(
        "You are compacting a long coding-assistant conversation into a structured summary \
that will replace the original messages. Produce exactly the following markdown sections, \
in this order, and nothing else:\n\n",
    );
    for section in REQUIRED_SUMMARY_SECTIONS {
        out.push_str(section);
        out.push('\n');
    }
    out.push_str(
        "\nCopy file paths, URLs, commit hashes, ports, and other literal identifiers \
verbatim into \"## Exact identifiers\" — never paraphrase them.\n\
Do not omit unresolved user requests; every one of them belongs under \
\"## Pending user asks\".",
    );

    if let Some(custom) = custom_instructions {
        if !custom.trim().is_empty() {
            out.push_str("\n\nAdditional focus:\n");
            out.push_str(custom);
        }
    }
    out
}

/// Pull opaque identifiers out of free text: hex runs, URLs, absolute
/// paths, host:port pairs, long digit runs. Wrapping punctuation is
/// stripped, duplicates keep their first occurrence, short leftovers are
/// discarded, and the list is capped at `MAX_EXTRACTED_IDENTIFIERS`.
pub fn extract_opaque_identifiers(text: &str) -> Vec<String> {
    // (start, end, candidate) spans, collected pattern by pattern so a
    // URL claims its region before the host:port or path patterns see it.
    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut spans: Vec<(usize, String)> = Vec::new();

    fn claim(
        start: usize,
        end: usize,
        candidate: &str,
        claimed: &mut Vec<(usize, usize)>,
    ) -> Option<(usize, String)> {
        if claimed.iter().any(|&(s, e)| start < e && end > s) {
            return None;
        }
        claimed.push((start, end));
        Some((start, candidate.to_string()))
    }

    for re in [&*URL_RE, &*WINDOWS_PATH_RE] {
        for m in re.find_iter(text) {
            spans.extend(claim(m.start(), m.end(), m.as_str(), &mut claimed));
        }
    }
    for caps in POSIX_PATH_RE.captures_iter(text) {
        let m = caps.get(1).expect("posix path capture");
        spans.extend(claim(m.start(), m.end(), m.as_str(), &mut claimed));
    }
    for re in [&*HOST_PORT_RE, &*HEX_RUN_RE, &*DIGIT_RUN_RE] {
        for m in re.find_iter(text) {
            spans.extend(claim(m.start(), m.end(), m.as_str(), &mut claimed));
        }
    }

    spans.sort_by_key(|(start, _)| *start);

    let mut seen = std::collections::HashSet::new();
    let mut identifiers = Vec::new();
    for (_, raw) in spans {
        let stripped = strip_wrapping(&raw);
        if stripped.len() < MIN_IDENTIFIER_LEN {
            continue;
        }
        if seen.insert(stripped.to_string()) {
            identifiers.push(stripped.to_string());
            if identifiers.len() >= MAX_EXTRACTED_IDENTIFIERS {
                break;
            }
        }
    }
    identifiers
}

fn strip_wrapping(candidate: &str) -> &str {
    candidate
        .trim_start_matches(LEADING_WRAP)
        .trim_end_matches(TRAILING_WRAP)
}

/// Check a produced summary: required sections present, seed identifiers
/// carried literally, and the latest user ask reflected somewhere.
pub fn audit_summary_quality(
    summary: &str,
    identifiers: &[String],
    latest_ask: Option<&str>,
) -> Audit {
    let mut reasons = Vec::new();

    for section in REQUIRED_SUMMARY_SECTIONS {
        if !summary.contains(section) {
            reasons.push(format!("missing_section:{section}"));
        }
    }

    let missing: Vec<&str> = identifiers
        .iter()
        .filter(|id| !summary.contains(id.as_str()))
        .map(|id| id.as_str())
        .take(3)
        .collect();
    if !missing.is_empty() {
        reasons.push(format!("missing_identifiers:{}", missing.join(",")));
    }

    if let Some(ask) = latest_ask {
        let tokens: Vec<String> = ask
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| t.len() >= 5)
            .take(8)
            .map(str::to_string)
            .collect();
        if !tokens.is_empty() {
            let summary_lower = summary.to_lowercase();
            if !tokens.iter().any(|t| summary_lower.contains(t)) {
                reasons.push("latest_user_ask_not_reflected".to_string());
            }
        }
    }

    Audit {
        ok: reasons.is_empty(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_list_sections_in_order() {
        let text = build_structure_instructions(None);
        let mut last = 0;
        for section in REQUIRED_SUMMARY_SECTIONS {
            let pos = text.find(section).unwrap_or_else(|| panic!("{section} missing"));
            assert!(pos > last, "{section} out of order");
            last = pos;
        }
        assert!(!text.contains("Additional focus:"));
    }

    #[test]
    fn instructions_append_custom_focus() {
        let text = build_structure_instructions(Some("watch the migration plan"));
        assert!(text.contains("Additional focus:\nwatch the migration plan"));
        // Blank custom instructions add nothing.
        let text = build_structure_instructions(Some("   "));
        assert!(!text.contains("Additional focus:"));
    }

    #[test]
    fn extracts_each_identifier_kind() {
        let text = "see https://example.com/docs, file /etc/nginx/nginx.conf, \
                    win C:\\Users\\dev\\app.log, host db.internal:5432, \
                    commit deadbeefcafe1234, ticket 9081726354";
        let ids = extract_opaque_identifiers(text);
        assert!(ids.contains(&"https://example.com/docs".to_string()));
        assert!(ids.contains(&"/etc/nginx/nginx.conf".to_string()));
        assert!(ids.contains(&"C:\\Users\\dev\\app.log".to_string()));
        assert!(ids.contains(&"db.internal:5432".to_string()));
        assert!(ids.contains(&"deadbeefcafe1234".to_string()));
        assert!(ids.contains(&"9081726354".to_string()));
    }

    #[test]
    fn strips_wrapping_punctuation() {
        let ids = extract_opaque_identifiers("(see https://example.com/a). and \"/tmp/build.log\",");
        assert!(ids.contains(&"https://example.com/a".to_string()));
        assert!(ids.contains(&"/tmp/build.log".to_string()));
    }

    #[test]
    fn never_contains_short_bare_integers() {
        let ids = extract_opaque_identifiers("port 8080 and pin 12345 but id 123456 stays");
        assert!(!ids.iter().any(|i| i == "8080"));
        assert!(!ids.iter().any(|i| i == "12345"));
        assert!(ids.contains(&"123456".to_string()));
    }

    #[test]
    fn dedupes_preserving_first_occurrence_and_caps() {
        let mut text = String::from("/first/path appears /first/path twice. ");
        for i in 0..20 {
            text.push_str(&format!("/unique/path/{i:02} "));
        }
        let ids = extract_opaque_identifiers(&text);
        assert_eq!(ids.len(), MAX_EXTRACTED_IDENTIFIERS);
        assert_eq!(ids[0], "/first/path");
        assert_eq!(ids.iter().filter(|i| *i == "/first/path").count(), 1);
    }

    #[test]
    fn url_is_not_double_counted_as_host_port() {
        let ids = extract_opaque_identifiers("fetch https://api.example.com:8443/v1 now");
        assert_eq!(ids, vec!["https://api.example.com:8443/v1".to_string()]);
    }

    #[test]
    fn relative_paths_are_ignored() {
        let ids = extract_opaque_identifiers("open src/main.rs not /src/main.rs");
        assert_eq!(ids, vec!["/src/main.rs".to_string()]);
    }

    fn summary_with_all_sections(extra: &str) -> String {
        format!(
            "## Decisions\nuse sqlite\n## Open TODOs\nnone\n## Constraints/Rules\nnone\n\
             ## Pending user asks\nnone\n## Exact identifiers\n{extra}\n"
        )
    }

    #[test]
    fn audit_passes_complete_summary() {
        let summary = summary_with_all_sections("/a/b.rs");
        let audit = audit_summary_quality(&summary, &["/a/b.rs".to_string()], None);
        assert!(audit.ok, "reasons: {:?}", audit.reasons);
    }

    #[test]
    fn audit_reports_each_missing_section() {
        let summary = "## Decisions\n## Open TODOs\n## Constraints/Rules\n";
        let audit = audit_summary_quality(summary, &[], None);
        assert!(!audit.ok);
        assert!(audit
            .reasons
            .contains(&"missing_section:## Pending user asks".to_string()));
        assert!(audit
            .reasons
            .contains(&"missing_section:## Exact identifiers".to_string()));
        assert_eq!(audit.reasons.len(), 2);
    }

    #[test]
    fn audit_reports_missing_identifiers_capped_at_three() {
        let summary = summary_with_all_sections("none of them");
        let ids: Vec<String> = (0..5).map(|i| format!("/missing/{i}")).collect();
        let audit = audit_summary_quality(&summary, &ids, None);
        assert!(!audit.ok);
        assert_eq!(
            audit.reasons,
            vec!["missing_identifiers:/missing/0,/missing/1,/missing/2".to_string()]
        );
    }

    #[test]
    fn audit_checks_latest_ask_tokens() {
        let summary = summary_with_all_sections("-");
        let audit = audit_summary_quality(&summary, &[], Some("please refactor the scheduler"));
        assert!(!audit.ok);
        assert_eq!(audit.reasons, vec!["latest_user_ask_not_reflected"]);

        let summary = summary_with_all_sections("-") + "\nuser wants the scheduler refactored";
        let audit = audit_summary_quality(&summary, &[], Some("please refactor the scheduler"));
        assert!(audit.ok);
    }

    #[test]
    fn audit_skips_ask_check_without_long_tokens() {
        let summary = summary_with_all_sections("-");
        let audit = audit_summary_quality(&summary, &[], Some("do it now"));
        assert!(audit.ok, "no token of length >= 5, check must be skipped");
    }
}

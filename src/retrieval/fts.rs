/// Rank assigned to a non-finite BM25 value before normalization.
const UNRANKED: f64 = 999.0;

/// Turn a raw natural-language query into an FTS5 match expression:
/// every alphanumeric/underscore run double-quoted and AND-joined.
/// Returns `None` when the query carries no usable terms.
pub fn build_fts_query(raw: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c);
        } else if !current.is_empty() {
            terms.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }

    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

/// Map a raw BM25 rank (lower is better) to a bounded score in (0, 1].
/// Negative ranks clamp to a perfect 1.0; non-finite ranks score as if
/// ranked 999.
pub fn bm25_rank_to_score(rank: f64) -> f64 {
    let rank = if rank.is_finite() { rank } else { UNRANKED };
    1.0 / (1.0 + rank.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_and_joins_terms() {
        assert_eq!(
            build_fts_query("reconnect retry_policy v2"),
            Some("\"reconnect\" AND \"retry_policy\" AND \"v2\"".to_string())
        );
    }

    #[test]
    fn splits_on_punctuation() {
        assert_eq!(
            build_fts_query("what's db.rs?"),
            Some("\"what\" AND \"s\" AND \"db\" AND \"rs\"".to_string())
        );
    }

    #[test]
    fn no_terms_returns_none() {
        assert_eq!(build_fts_query(""), None);
        assert_eq!(build_fts_query("¿¡…—"), None);
        assert_eq!(build_fts_query("   "), None);
    }

    #[test]
    fn rank_zero_scores_one() {
        assert!((bm25_rank_to_score(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn negative_ranks_clamp_to_one() {
        assert!((bm25_rank_to_score(-3.5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn larger_rank_scores_lower() {
        assert!(bm25_rank_to_score(1.0) > bm25_rank_to_score(2.0));
        assert!((bm25_rank_to_score(1.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn non_finite_rank_treated_as_999() {
        let expected = 1.0 / 1000.0;
        assert!((bm25_rank_to_score(f64::NAN) - expected).abs() < 1e-12);
        assert!((bm25_rank_to_score(f64::INFINITY) - expected).abs() < 1e-12);
        assert!((bm25_rank_to_score(f64::NEG_INFINITY) - expected).abs() < 1e-12);
    }
}

//! Score math shared by both search paths: cosine similarity, the
//! age-based recency penalty, and the BLOB layout for stored embeddings.

pub(crate) const MS_PER_DAY: f64 = 86_400_000.0;

/// Current wall clock in milliseconds, the unit `Chunk::updated_at` and
/// the recency penalty work in.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Recency penalty settings. `lambda` is the maximum penalty, reached
/// once a chunk is `window_days` old.
#[derive(Debug, Clone, Copy)]
pub struct RecencyConfig {
    pub enabled: bool,
    pub lambda: f64,
    pub window_days: u32,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lambda: 0.08,
            window_days: 14,
        }
    }
}

impl RecencyConfig {
    /// Copy with `lambda` forced into [0, 1] and `window_days` into
    /// [1, 365]. Search paths normalize before use so out-of-range host
    /// config can't produce negative penalties or a zero-width window.
    pub fn normalized(self) -> Self {
        Self {
            enabled: self.enabled,
            lambda: self.lambda.clamp(0.0, 1.0),
            window_days: self.window_days.clamp(1, 365),
        }
    }
}

/// Subtractive penalty growing linearly with document age, capped at
/// `lambda` once the age reaches the window. Missing or future
/// timestamps are never penalized.
pub fn recency_penalty(updated_at: Option<i64>, now_ms: i64, lambda: f64, window_days: u32) -> f64 {
    let Some(updated_at) = updated_at else {
        return 0.0;
    };
    if updated_at > now_ms {
        return 0.0;
    }
    let age_ms = (now_ms - updated_at) as f64;
    let ratio = (age_ms / (window_days as f64 * MS_PER_DAY)).min(1.0);
    lambda * ratio
}

/// Cosine similarity in f64. Zero for empty or mismatched vectors and
/// for near-zero norms.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

/// Embedding → little-endian BLOB for SQLite storage.
pub fn f32_vec_to_bytes(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// SQLite BLOB → embedding. Trailing partial floats are dropped.
pub fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Truncate to at most `max_units` UTF-16 code units without splitting a
/// surrogate pair (a char either fits with both units or is dropped).
pub fn truncate_utf16_safe(text: &str, max_units: usize) -> String {
    let mut units = 0usize;
    let mut end = 0usize;
    for (i, c) in text.char_indices() {
        let width = c.len_utf16();
        if units + width > max_units {
            break;
        }
        units += width;
        end = i + c.len_utf8();
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    #[test]
    fn penalty_zero_for_missing_or_future() {
        assert_eq!(recency_penalty(None, 1_000, 0.5, 14), 0.0);
        assert_eq!(recency_penalty(Some(2_000), 1_000, 0.5, 14), 0.0);
    }

    #[test]
    fn penalty_at_half_window() {
        let now = 100 * DAY_MS;
        let updated = now - 7 * DAY_MS;
        let penalty = recency_penalty(Some(updated), now, 0.08, 14);
        assert!((penalty - 0.04).abs() < 1e-5, "got {penalty}");
    }

    #[test]
    fn penalty_caps_at_lambda() {
        let now = 1_000 * DAY_MS;
        let penalty = recency_penalty(Some(0), now, 0.08, 14);
        assert!((penalty - 0.08).abs() < 1e-12);
    }

    #[test]
    fn penalty_monotonic_in_age() {
        let now = 400 * DAY_MS;
        let mut prev = -1.0;
        for days in 0..=30 {
            let penalty = recency_penalty(Some(now - days * DAY_MS), now, 0.3, 14);
            assert!(penalty >= prev, "penalty decreased at {days} days");
            assert!(penalty <= 0.3 + 1e-12);
            prev = penalty;
        }
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        let a = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs_are_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn blob_roundtrip() {
        let original = vec![1.0f32, -2.5, 3.14159, 0.0];
        assert_eq!(bytes_to_f32_vec(&f32_vec_to_bytes(&original)), original);
        assert!(bytes_to_f32_vec(&[]).is_empty());
    }

    #[test]
    fn utf16_truncation_counts_units() {
        assert_eq!(truncate_utf16_safe("hello", 3), "hel");
        assert_eq!(truncate_utf16_safe("hello", 10), "hello");
    }

    #[test]
    fn utf16_truncation_never_splits_surrogate_pairs() {
        // '🦀' is two UTF-16 code units; one unit of budget can't fit it.
        assert_eq!(truncate_utf16_safe("🦀abc", 1), "");
        assert_eq!(truncate_utf16_safe("🦀abc", 2), "🦀");
        assert_eq!(truncate_utf16_safe("a🦀bc", 2), "a");
        assert_eq!(truncate_utf16_safe("a🦀bc", 3), "a🦀");
    }

    #[test]
    fn config_normalization_clamps_ranges() {
        let config = RecencyConfig {
            enabled: true,
            lambda: 1.7,
            window_days: 0,
        }
        .normalized();
        assert_eq!(config.lambda, 1.0);
        assert_eq!(config.window_days, 1);

        let config = RecencyConfig {
            enabled: true,
            lambda: -0.2,
            window_days: 9_999,
        }
        .normalized();
        assert_eq!(config.lambda, 0.0);
        assert_eq!(config.window_days, 365);
    }
}

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};

/// Per-session compaction knobs. Every field is optional; the
/// orchestrator falls back to its defaults for anything unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeguardRuntime {
    #[serde(default, rename = "contextWindowTokens", skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
    #[serde(default, rename = "recentTurnsPreserve", skip_serializing_if = "Option::is_none")]
    pub recent_turns_preserve: Option<u32>,
    #[serde(default, rename = "qualityGuardEnabled", skip_serializing_if = "Option::is_none")]
    pub quality_guard_enabled: Option<bool>,
    #[serde(default, rename = "qualityGuardMaxRetries", skip_serializing_if = "Option::is_none")]
    pub quality_guard_max_retries: Option<u32>,
    #[serde(default, rename = "maxHistoryShare", skip_serializing_if = "Option::is_none")]
    pub max_history_share: Option<f64>,
}

/// Process-wide map from session-manager identity to its runtime knobs.
/// Writers synchronize through the lock so readers always see a
/// consistent snapshot. Entries are isolated per identity and live until
/// explicitly cleared.
#[derive(Debug, Default)]
pub struct RuntimeRegistry {
    inner: RwLock<HashMap<String, SafeguardRuntime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-wide registry. Tests and embedders that want
    /// isolation construct their own instance instead.
    pub fn global() -> &'static RuntimeRegistry {
        static GLOBAL: OnceLock<RuntimeRegistry> = OnceLock::new();
        GLOBAL.get_or_init(RuntimeRegistry::new)
    }

    /// Set or clear the knobs for one session identity. `None` clears.
    pub fn set(&self, session_id: &str, runtime: Option<SafeguardRuntime>) {
        let mut map = self.inner.write().expect("runtime registry poisoned");
        match runtime {
            Some(r) => {
                map.insert(session_id.to_string(), r);
            }
            None => {
                map.remove(session_id);
            }
        }
    }

    /// Snapshot of the knobs for one session identity, if any are set.
    pub fn get(&self, session_id: &str) -> Option<SafeguardRuntime> {
        self.inner
            .read()
            .expect("runtime registry poisoned")
            .get(session_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_returns_none() {
        let registry = RuntimeRegistry::new();
        assert!(registry.get("nobody").is_none());
    }

    #[test]
    fn set_then_get_roundtrip() {
        let registry = RuntimeRegistry::new();
        registry.set(
            "s1",
            Some(SafeguardRuntime {
                context_window_tokens: Some(100_000),
                ..Default::default()
            }),
        );
        let got = registry.get("s1").unwrap();
        assert_eq!(got.context_window_tokens, Some(100_000));
    }

    #[test]
    fn set_none_clears() {
        let registry = RuntimeRegistry::new();
        registry.set("s1", Some(SafeguardRuntime::default()));
        assert!(registry.get("s1").is_some());
        registry.set("s1", None);
        assert!(registry.get("s1").is_none());
    }

    #[test]
    fn entries_isolated_per_identity() {
        let registry = RuntimeRegistry::new();
        registry.set(
            "a",
            Some(SafeguardRuntime {
                recent_turns_preserve: Some(5),
                ..Default::default()
            }),
        );
        registry.set(
            "b",
            Some(SafeguardRuntime {
                recent_turns_preserve: Some(9),
                ..Default::default()
            }),
        );
        assert_eq!(registry.get("a").unwrap().recent_turns_preserve, Some(5));
        assert_eq!(registry.get("b").unwrap().recent_turns_preserve, Some(9));
        registry.set("a", None);
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_some());
    }

    #[test]
    fn runtime_deserializes_from_host_json() {
        let r: SafeguardRuntime = serde_json::from_str(
            r#"{"contextWindowTokens":200000,"qualityGuardEnabled":false,"maxHistoryShare":0.4}"#,
        )
        .unwrap();
        assert_eq!(r.context_window_tokens, Some(200_000));
        assert_eq!(r.quality_guard_enabled, Some(false));
        assert_eq!(r.max_history_share, Some(0.4));
        assert!(r.recent_turns_preserve.is_none());
    }
}

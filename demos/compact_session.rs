//! End-to-end walkthrough: compact an overflowing transcript, then run a
//! hybrid search over a small chunk corpus.
//!
//! Usage:
//!   ANTHROPIC_API_KEY=sk-... cargo run --example compact_session
//!
//! Without a key the compaction path demonstrates the fallback artifact
//! instead of a model-written summary.

use memento::retrieval::{
    now_ms, ChunkStore, KeywordSearchOptions, RecencyConfig, VectorSearchOptions,
};
use memento::{
    AnthropicClient, ApiKeyResolver, BeforeCompactEvent, Chunk, Compactor, CompactionRequest,
    CompactionSettings, MergeOptions, Message, ModelHandle, Role, RuntimeRegistry, SessionContext,
};

struct EnvKeys;

impl ApiKeyResolver for EnvKeys {
    fn api_key(&self, _model: &str) -> Option<String> {
        std::env::var("ANTHROPIC_API_KEY").ok()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    // --- Compaction -----------------------------------------------------

    let transcript = vec![
        Message::text(Role::User, "Add retry with backoff to the sync client"),
        Message::text(
            Role::Assistant,
            "Done — see /src/sync/client.rs, capped at 5 attempts with jitter.",
        ),
        Message::text(Role::User, "Now wire the config through the CLI"),
        Message::text(Role::Assistant, "Added --retry-max and --retry-base-ms flags."),
    ];

    let registry = RuntimeRegistry::new();
    let compactor = Compactor::new(AnthropicClient::new());
    let event = BeforeCompactEvent {
        preparation: CompactionRequest {
            messages_to_summarize: transcript,
            first_kept_entry_id: "entry-100".into(),
            tokens_before: Some(180_000),
            settings: CompactionSettings {
                reserve_tokens: 2_048,
            },
            ..Default::default()
        },
        custom_instructions: None,
    };
    let ctx = SessionContext {
        model: Some(ModelHandle::new("claude-sonnet-4-20250514", 200_000)),
        keys: &EnvKeys,
        session_id: "demo-session",
        registry: &registry,
    };

    let artifact = compactor.on_before_compact(event, &ctx).await;
    println!("--- compaction artifact ---\n{}\n", artifact.summary);

    // --- Hybrid retrieval ----------------------------------------------

    let store = ChunkStore::open_in_memory("demo:toy-embeddings").unwrap();
    let corpus = [
        ("backoff", "retry with exponential backoff and jitter", [1.0, 0.1]),
        ("cli", "command line flags for retry configuration", [0.6, 0.8]),
        ("panel", "settings panel rendering", [0.0, 1.0]),
    ];
    for (id, text, embedding) in corpus {
        store
            .upsert_chunk(&Chunk {
                id: id.into(),
                path: format!("/src/{id}.rs"),
                start_line: 1,
                end_line: 40,
                source: "repo".into(),
                text: text.into(),
                embedding: embedding.to_vec(),
                updated_at: Some(now_ms()),
                model: store.model().to_string(),
            })
            .unwrap();
    }

    let query_embedding = [1.0, 0.2];
    let vector = store
        .search_vector(
            &query_embedding,
            &VectorSearchOptions {
                limit: 5,
                source: None,
                recency: RecencyConfig {
                    enabled: true,
                    ..Default::default()
                },
                snippet_max_chars: 120,
                now_ms: now_ms(),
            },
        )
        .unwrap();
    let keyword = store
        .search_keyword(
            "retry backoff",
            &KeywordSearchOptions {
                limit: 5,
                source: None,
                snippet_max_chars: 120,
            },
        )
        .unwrap();

    let ranked = memento::merge_hybrid_results(
        vector,
        keyword,
        MergeOptions {
            vector_weight: 0.7,
            text_weight: 0.3,
            dynamic_threshold: true,
        },
    );

    println!("--- hybrid ranking ---");
    for hit in &ranked {
        println!(
            "{:.3}  {} (vector {:.3}, text {:.3})  {}",
            hit.score, hit.path, hit.vector_score, hit.text_score, hit.snippet
        );
    }
}

//! SQLite-backed chunk corpus: one `chunks` table, an external-content
//! FTS5 index kept in sync by triggers, and an optional `vec0` KNN index
//! when the host loaded the sqlite-vec extension into the connection.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection, ToSql};
use tracing::{debug, warn};

use super::error::RetrievalError;
use super::fts::{bm25_rank_to_score, build_fts_query};
use super::scoring::{
    bytes_to_f32_vec, cosine_similarity, f32_vec_to_bytes, recency_penalty, truncate_utf16_safe,
    RecencyConfig,
};
use super::types::{Chunk, KeywordHit, VectorHit};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        path TEXT NOT NULL,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        text TEXT NOT NULL,
        embedding BLOB,
        source TEXT NOT NULL DEFAULT '',
        updated_at INTEGER,
        model TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);
    CREATE INDEX IF NOT EXISTS idx_chunks_model_source ON chunks(model, source);

    CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
        id UNINDEXED,
        text,
        content=chunks,
        content_rowid=rowid,
        tokenize='porter unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks
    BEGIN
        INSERT INTO chunks_fts(rowid, id, text) VALUES (NEW.rowid, NEW.id, NEW.text);
    END;

    CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks
    BEGIN
        INSERT INTO chunks_fts(chunks_fts, rowid, id, text)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.text);
    END;

    CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE ON chunks
    BEGIN
        INSERT INTO chunks_fts(chunks_fts, rowid, id, text)
        VALUES ('delete', OLD.rowid, OLD.id, OLD.text);
        INSERT INTO chunks_fts(rowid, id, text) VALUES (NEW.rowid, NEW.id, NEW.text);
    END;
";

/// Options for a dense-vector search.
#[derive(Debug, Clone)]
pub struct VectorSearchOptions<'a> {
    pub limit: usize,
    pub source: Option<&'a str>,
    pub recency: RecencyConfig,
    pub snippet_max_chars: usize,
    /// Wall-clock milliseconds used for the recency penalty. Passed in
    /// so rankings are deterministic and testable.
    pub now_ms: i64,
}

/// Options for a lexical (BM25) search.
#[derive(Debug, Clone)]
pub struct KeywordSearchOptions<'a> {
    pub limit: usize,
    pub source: Option<&'a str>,
    pub snippet_max_chars: usize,
}

/// Chunk corpus handle. One store serves one embedding model; searches
/// are restricted to chunks carrying that label so vectors from
/// different providers never mix.
pub struct ChunkStore {
    conn: Mutex<Connection>,
    model: String,
}

impl ChunkStore {
    pub fn open(path: impl AsRef<Path>, model: impl Into<String>) -> Result<Self, RetrievalError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, model)
    }

    pub fn open_in_memory(model: impl Into<String>) -> Result<Self, RetrievalError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, model)
    }

    /// Wrap an existing connection, e.g. one the host pre-loaded with
    /// the sqlite-vec extension.
    pub fn with_connection(
        conn: Connection,
        model: impl Into<String>,
    ) -> Result<Self, RetrievalError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Insert or replace one chunk. The FTS index follows via triggers;
    /// the vector index row is refreshed when the KNN table exists.
    pub fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), RetrievalError> {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let embedding = if chunk.embedding.is_empty() {
            None
        } else {
            Some(f32_vec_to_bytes(&chunk.embedding))
        };
        conn.execute(
            "INSERT INTO chunks (id, path, start_line, end_line, text, embedding, source, updated_at, model)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 path = excluded.path,
                 start_line = excluded.start_line,
                 end_line = excluded.end_line,
                 text = excluded.text,
                 embedding = excluded.embedding,
                 source = excluded.source,
                 updated_at = excluded.updated_at,
                 model = excluded.model",
            params![
                chunk.id,
                chunk.path,
                chunk.start_line,
                chunk.end_line,
                chunk.text,
                embedding,
                chunk.source,
                chunk.updated_at,
                chunk.model,
            ],
        )?;

        if vector_index_exists(&conn) {
            let refresh = conn
                .execute(
                    "INSERT OR REPLACE INTO chunk_index (rowid, embedding)
                     SELECT rowid, embedding FROM chunks WHERE id = ?",
                    params![chunk.id],
                )
                .map(|_| ());
            if let Err(e) = refresh {
                warn!(error = %e, id = %chunk.id, "vector index refresh failed");
            }
        }
        Ok(())
    }

    /// Remove every chunk indexed under `path`. Returns how many went.
    pub fn delete_by_path(&self, path: &str) -> Result<usize, RetrievalError> {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let removed = conn.execute("DELETE FROM chunks WHERE path = ?", params![path])?;
        Ok(removed)
    }

    pub fn count(&self) -> Result<usize, RetrievalError> {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let n: i64 = conn.query_row("SELECT count(*) FROM chunks", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Probe for the sqlite-vec `vec0` module and, when present, create
    /// the KNN index table and backfill it from stored embeddings.
    /// Returns false when the extension is not loaded — searches then
    /// take the brute-force cosine path.
    pub fn ensure_vector_ready(&self, dimensions: usize) -> bool {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let has_module: bool = conn
            .query_row(
                "SELECT count(*) FROM pragma_module_list WHERE name = 'vec0'",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .unwrap_or(false);
        if !has_module {
            return false;
        }

        let setup = conn
            .execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_index USING vec0(embedding float[{dimensions}]);
                 INSERT OR REPLACE INTO chunk_index (rowid, embedding)
                     SELECT rowid, embedding FROM chunks
                     WHERE embedding IS NOT NULL AND length(embedding) = {byte_len};",
                byte_len = dimensions * 4,
            ))
            .map_err(|e| warn!(error = %e, "vector index setup failed"));
        setup.is_ok()
    }

    /// Dense search: accelerated KNN when the vector index is ready,
    /// otherwise brute-force cosine over stored embeddings. The recency
    /// penalty, when enabled, is subtracted with a floor of zero and the
    /// list re-sorted.
    pub fn search_vector(
        &self,
        query: &[f32],
        options: &VectorSearchOptions<'_>,
    ) -> Result<Vec<VectorHit>, RetrievalError> {
        if options.limit == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        let recency = options.recency.normalized();

        let mut rows = if self.ensure_vector_ready(query.len()) {
            self.knn_candidates(query, options)?
        } else {
            self.cosine_candidates(query, options)?
        };

        if recency.enabled {
            for row in &mut rows {
                let penalty =
                    recency_penalty(row.updated_at, options.now_ms, recency.lambda, recency.window_days);
                row.score = (row.score - penalty).max(0.0);
            }
            sort_candidates(&mut rows);
        }

        Ok(rows
            .into_iter()
            .map(|row| VectorHit {
                id: row.id,
                path: row.path,
                start_line: row.start_line,
                end_line: row.end_line,
                source: row.source,
                snippet: truncate_utf16_safe(&row.text, options.snippet_max_chars),
                score: row.score,
            })
            .collect())
    }

    /// Lexical search over the FTS index, ordered by BM25 rank and
    /// normalized into bounded scores.
    pub fn search_keyword(
        &self,
        query: &str,
        options: &KeywordSearchOptions<'_>,
    ) -> Result<Vec<KeywordHit>, RetrievalError> {
        if options.limit == 0 {
            return Ok(Vec::new());
        }
        let Some(fts_query) = build_fts_query(query) else {
            return Ok(Vec::new());
        };

        let conn = self.conn.lock().expect("chunk store poisoned");
        let mut sql = String::from(
            "SELECT c.id, c.path, c.start_line, c.end_line, c.text, c.source, bm25(chunks_fts) AS rank
             FROM chunks_fts
             JOIN chunks c ON c.rowid = chunks_fts.rowid
             WHERE chunks_fts MATCH ? AND c.model = ?",
        );
        let mut bindings: Vec<Box<dyn ToSql>> =
            vec![Box::new(fts_query), Box::new(self.model.clone())];
        push_source_filter(&mut sql, &mut bindings, options.source);
        sql.push_str(" ORDER BY rank ASC LIMIT ?");
        bindings.push(Box::new(options.limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(bindings.iter().map(|b| b.as_ref())), |row| {
                let text: String = row.get(4)?;
                let rank: f64 = row.get(6)?;
                let text_score = bm25_rank_to_score(rank);
                Ok(KeywordHit {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    start_line: row.get::<_, i64>(2)? as u32,
                    end_line: row.get::<_, i64>(3)? as u32,
                    source: row.get(5)?,
                    snippet: truncate_utf16_safe(&text, options.snippet_max_chars),
                    score: text_score,
                    text_score,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(query, hits = hits.len(), "keyword search complete");
        Ok(hits)
    }

    fn knn_candidates(
        &self,
        query: &[f32],
        options: &VectorSearchOptions<'_>,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let mut sql = String::from(
            "SELECT c.id, c.path, c.start_line, c.end_line, c.text, c.source, c.updated_at,
                    chunk_index.distance AS dist
             FROM chunk_index
             JOIN chunks c ON c.rowid = chunk_index.rowid
             WHERE chunk_index.embedding MATCH ? AND k = ? AND c.model = ?",
        );
        let mut bindings: Vec<Box<dyn ToSql>> = vec![
            Box::new(f32_vec_to_bytes(query)),
            Box::new(options.limit as i64),
            Box::new(self.model.clone()),
        ];
        push_source_filter(&mut sql, &mut bindings, options.source);
        sql.push_str(" ORDER BY dist ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(bindings.iter().map(|b| b.as_ref())), |row| {
                let dist: f64 = row.get(7)?;
                Ok(Candidate {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    start_line: row.get::<_, i64>(2)? as u32,
                    end_line: row.get::<_, i64>(3)? as u32,
                    text: row.get(4)?,
                    source: row.get(5)?,
                    updated_at: row.get(6)?,
                    score: 1.0 - dist,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn cosine_candidates(
        &self,
        query: &[f32],
        options: &VectorSearchOptions<'_>,
    ) -> Result<Vec<Candidate>, RetrievalError> {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let mut sql = String::from(
            "SELECT c.id, c.path, c.start_line, c.end_line, c.text, c.source, c.updated_at, c.embedding
             FROM chunks c WHERE c.embedding IS NOT NULL AND c.model = ?",
        );
        let mut bindings: Vec<Box<dyn ToSql>> = vec![Box::new(self.model.clone())];
        push_source_filter(&mut sql, &mut bindings, options.source);

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map(params_from_iter(bindings.iter().map(|b| b.as_ref())), |row| {
                let blob: Vec<u8> = row.get(7)?;
                Ok((
                    Candidate {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        start_line: row.get::<_, i64>(2)? as u32,
                        end_line: row.get::<_, i64>(3)? as u32,
                        text: row.get(4)?,
                        source: row.get(5)?,
                        updated_at: row.get(6)?,
                        score: 0.0,
                    },
                    blob,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|(mut candidate, blob)| {
                let score = cosine_similarity(query, &bytes_to_f32_vec(&blob));
                if !score.is_finite() {
                    return None;
                }
                candidate.score = score;
                Some(candidate)
            })
            .collect::<Vec<_>>();

        sort_candidates(&mut rows);
        rows.truncate(options.limit);
        Ok(rows)
    }
}

struct Candidate {
    id: String,
    path: String,
    start_line: u32,
    end_line: u32,
    text: String,
    source: String,
    updated_at: Option<i64>,
    score: f64,
}

/// Descending by score, id as the deterministic tie-break.
fn sort_candidates(rows: &mut [Candidate]) {
    rows.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
}

fn push_source_filter(sql: &mut String, bindings: &mut Vec<Box<dyn ToSql>>, source: Option<&str>) {
    if let Some(source) = source {
        sql.push_str(" AND c.source = ?");
        bindings.push(Box::new(source.to_string()));
    }
}

fn vector_index_exists(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'chunk_index'",
        [],
        |r| r.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .unwrap_or(false)
}

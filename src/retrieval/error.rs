#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("embedding error: {0}")]
    Embedding(String),
}

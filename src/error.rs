#[derive(Debug, thiserror::Error)]
pub enum CompactError {
    #[error("compaction cancelled")]
    Cancelled,
    #[error("no model or API key configured")]
    ModelUnavailable,
    #[error("model call failed: {0}")]
    Model(#[from] ModelError),
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("model returned an empty completion")]
    EmptyCompletion,
}

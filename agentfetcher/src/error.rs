use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentFetcherError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("inventory API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    ParseFailure(String),
}

pub type Result<T> = std::result::Result<T, AgentFetcherError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite operation failed: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("snapshot conversion failed: {0}")]
    Conversion(String),

    #[error("persistence failed for resource '{resource_id}': {source}")]
    Persistence {
        resource_id: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("history ledger inconsistent: {0}")]
    Consistency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Attaches the in-flight resource id to a store-level failure so a
    /// batch abort names the snapshot that caused it.
    pub(crate) fn for_resource(self, resource_id: &str) -> StorageError {
        match self {
            StorageError::SQLite(source) => StorageError::Persistence {
                resource_id: resource_id.to_string(),
                source,
            },
            StorageError::Conversion(message) => {
                StorageError::Conversion(format!("resource '{resource_id}': {message}"))
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

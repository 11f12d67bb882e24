pub mod batch;
pub mod config;
pub mod current;
pub mod diff;
pub mod errors;
pub mod fetch;
pub mod history;
pub mod kind;
pub mod models;
pub mod store;
pub mod sweep;
pub mod sync;

use crate::config::StorageConfig;
use crate::errors::Result;
use crate::fetch::SnapshotFetcher;
use crate::store::Ledger;
use crate::sync::Ingestor;
use std::sync::Arc;

/// The main entry point for the `hstorage` library.
///
/// `HStorage` wires together the components of the ingestion engine:
/// - A bitemporal ledger (`Ledger`) using SQLite for current-state rows,
///   append-only history, and run logs.
/// - An `Ingestor` running one ingestion pass per registered fetcher:
///   fetch, diff, minimal-write update, history append, retirement sweep.
///
/// # Example
///
/// ```rust,no_run
/// use hstorage::{HStorage, config::StorageConfig};
/// use tempfile::tempdir;
///
/// #[tokio::main]
/// async fn main() {
///     let dir = tempdir().unwrap();
///     let config = StorageConfig::new(dir.path());
///     let storage = HStorage::new(config).await.unwrap();
///
///     // Register fetchers on storage.ingestor, then run passes.
/// }
/// ```
pub struct HStorage {
    pub config: StorageConfig,
    pub ledger: Arc<Ledger>,
    pub ingestor: Ingestor,
}

impl HStorage {
    /// Creates a new instance and initializes the ledger schema.
    pub async fn new(config: StorageConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.base_path).await?;

        let ledger = Arc::new(Ledger::new(&config)?);
        ledger.initialize_schema()?;

        let ingestor = Ingestor::new(Arc::clone(&ledger));

        Ok(Self {
            config,
            ledger,
            ingestor,
        })
    }

    pub fn register_fetcher(&mut self, fetcher: Arc<dyn SnapshotFetcher>) {
        self.ingestor.register_fetcher(fetcher);
    }
}

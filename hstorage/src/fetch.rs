use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::kind::ResourceKindSpec;
use crate::models::Snapshot;

/// Callback invoked after every fetched page so an external supervisor
/// can distinguish a healthy long fetch from a hung one.
pub type Heartbeat = Arc<dyn Fn() + Send + Sync>;

/// A paged stream of snapshots for one resource kind, opened for one run.
///
/// The source may suspend on network I/O inside `next_page`; it never
/// touches persistence.
#[async_trait]
pub trait SnapshotSource: Send {
    fn has_more(&self) -> bool;
    async fn next_page(&mut self) -> Result<Vec<Snapshot>>;
}

impl std::fmt::Debug for dyn SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SnapshotSource")
    }
}

/// A registered collector for one resource kind.
///
/// Implementations own provider mechanics (clients, pagination, payload
/// conversion); the engine only consumes the typed snapshots they yield.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// The deploy-time descriptor of the resource kind this fetcher yields.
    fn kind(&self) -> &'static ResourceKindSpec;

    /// Opens a fresh paged source for one ingestion run.
    async fn open(&self, params: serde_json::Value) -> Result<Box<dyn SnapshotSource>>;
}

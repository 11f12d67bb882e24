use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scalar attributes of a resource or child row, keyed by field name.
/// Equality is exact (structural), never semantic.
pub type AttrMap = BTreeMap<String, Value>;

/// One externally-fetched observation of a resource at a point in time.
///
/// The collection timestamp is not carried here: every snapshot of a run
/// is stamped with the run watermark by the batch committer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Provider-assigned stable identifier, immutable for the resource's
    /// lifetime. Composite provider keys are pre-joined by the fetcher.
    pub resource_id: String,
    pub attrs: AttrMap,
    /// Child collections keyed by collection name. Order-irrelevant sets.
    #[serde(default)]
    pub children: BTreeMap<String, Vec<ChildSnapshot>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildSnapshot {
    pub attrs: AttrMap,
}

/// The persisted current-state row for one resource, with its child rows
/// eagerly loaded.
#[derive(Debug, Clone)]
pub struct CurrentRecord {
    pub resource_id: String,
    pub attrs: AttrMap,
    /// Set on first observation, never altered afterwards.
    pub first_collected_at: DateTime<Utc>,
    /// Bumped to the run watermark on every run that observes the resource.
    pub collected_at: DateTime<Utc>,
    pub children: BTreeMap<String, Vec<ChildRecord>>,
}

#[derive(Debug, Clone)]
pub struct ChildRecord {
    pub child_key: String,
    pub attrs: AttrMap,
}

/// Outcome of comparing a fetched snapshot against the persisted record.
#[derive(Debug, Clone, Default)]
pub struct Diff {
    pub is_new: bool,
    pub is_changed: bool,
    /// Per child collection name: whether the persisted set differs from
    /// the incoming one.
    pub child_changed: BTreeMap<String, bool>,
}

impl Diff {
    pub fn any_child_changed(&self) -> bool {
        self.child_changed.values().any(|changed| *changed)
    }

    /// True when the run observed the resource unchanged; only the
    /// collected-at stamp needs refreshing.
    pub fn is_noop(&self) -> bool {
        !self.is_new && !self.is_changed && !self.any_child_changed()
    }
}

/// Result of one committed ingestion batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub processed_count: usize,
    /// The run watermark shared by every snapshot in the batch.
    pub collected_at: DateTime<Utc>,
}

/// Orchestrator-facing result of one full ingestion pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub item_count: usize,
    pub collected_at: DateTime<Utc>,
    pub duration_millis: u64,
}

// --- Ledger (SQLite) models ---

#[derive(Debug)]
pub struct RunLog {
    pub run_id: i64,
    pub run_name: String,
    pub start_time: i64, // Unix timestamp
    pub end_time: Option<i64>,
    pub status: String,
    pub details: String,
}

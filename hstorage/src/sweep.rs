use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::history;
use crate::kind::ResourceKindSpec;
use crate::store::{self, Ledger};

/// Retires current-state rows not stamped by the latest successful run:
/// their open history is closed and the rows (with children) deleted.
///
/// Runs in its own transaction, after the ingestion batch has committed.
/// Callers treat a failure here as a warning; the stale condition
/// persists and the sweep retries naturally on the next run.
pub fn retire(
    ledger: &Ledger,
    kind: &ResourceKindSpec,
    watermark: DateTime<Utc>,
) -> Result<usize> {
    let mut conn = ledger.lock();
    let tx = conn.transaction()?;

    let stale = store::stale_resource_ids(&tx, kind.name, watermark)?;
    let closed_at = Utc::now();
    for resource_id in &stale {
        history::close_history(&tx, kind.name, resource_id, closed_at)?;
        store::delete_current(&tx, kind.name, resource_id)
            .map_err(|e| e.for_resource(resource_id))?;
    }

    tx.commit()?;
    if !stale.is_empty() {
        log::info!(
            "Retired {} stale resource(s) of kind '{}'",
            stale.len(),
            kind.name
        );
    }
    Ok(stale.len())
}

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::kind::ResourceKindSpec;
use crate::models::{BatchOutcome, Snapshot};
use crate::store::{self, Ledger};
use crate::{current, diff, history};

/// Runs one ingestion batch inside a single transaction.
///
/// Snapshots are processed in fetch order; every write of the run carries
/// the same watermark. Any error rolls back the whole batch (the
/// transaction handle rolls back on every early return) and names the
/// resource in flight. A committed batch is final.
pub fn run_batch(
    ledger: &Ledger,
    kind: &ResourceKindSpec,
    snapshots: &[Snapshot],
    watermark: DateTime<Utc>,
) -> Result<BatchOutcome> {
    let mut conn = ledger.lock();
    let tx = conn.transaction()?;
    let mut processed_count = 0usize;

    for snapshot in snapshots {
        let rid = snapshot.resource_id.as_str();
        let existing =
            store::load_current(&tx, kind.name, rid).map_err(|e| e.for_resource(rid))?;
        let d = diff::diff(kind, existing.as_ref(), snapshot).map_err(|e| e.for_resource(rid))?;
        current::apply(&tx, kind, &d, snapshot, watermark).map_err(|e| e.for_resource(rid))?;
        if !d.is_noop() {
            history::record(&tx, kind, &d, snapshot, watermark)
                .map_err(|e| e.for_resource(rid))?;
        }
        processed_count += 1;
    }

    tx.commit()?;
    log::debug!(
        "Committed batch of {} snapshot(s) for kind '{}'",
        processed_count,
        kind.name
    );

    Ok(BatchOutcome {
        processed_count,
        collected_at: watermark,
    })
}

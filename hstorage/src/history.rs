use chrono::{DateTime, Utc};
use rusqlite::Transaction;

use crate::errors::{Result, StorageError};
use crate::kind::ResourceKindSpec;
use crate::models::{Diff, Snapshot};
use crate::store;

/// Maintains the append-only bitemporal history in lockstep with the
/// current-state writer; called after `current::apply` succeeds, in the
/// same transaction, and only when the diff is not a no-op.
///
/// Child history rows are scoped to one parent version: a scalar change
/// closes and reopens every child row under the new version id, even for
/// collections that did not change. A child-only change keeps the open
/// parent version and cycles just that collection's rows.
pub fn record(
    tx: &Transaction<'_>,
    kind: &ResourceKindSpec,
    diff: &Diff,
    incoming: &Snapshot,
    watermark: DateTime<Utc>,
) -> Result<()> {
    let rid = incoming.resource_id.as_str();

    if diff.is_new {
        let history_id = store::insert_history(
            tx, kind.name, rid, &incoming.attrs, watermark, watermark, watermark,
        )
        .map_err(|e| e.for_resource(rid))?;
        open_child_rows(tx, kind, incoming, &history_id, None, watermark)?;
        return Ok(());
    }

    if diff.is_changed {
        let open = store::open_history_row(tx, kind.name, rid)
            .map_err(|e| e.for_resource(rid))?
            .ok_or_else(|| {
                StorageError::Consistency(format!(
                    "no open history record for changed resource '{rid}' of kind '{}'",
                    kind.name
                ))
            })?;

        store::close_history_row(tx, &open.history_id, watermark)
            .map_err(|e| e.for_resource(rid))?;
        store::close_child_history(tx, &open.history_id, None, watermark)
            .map_err(|e| e.for_resource(rid))?;

        let new_id = store::insert_history(
            tx,
            kind.name,
            rid,
            &incoming.attrs,
            open.first_collected_at,
            watermark,
            watermark,
        )
        .map_err(|e| e.for_resource(rid))?;
        open_child_rows(tx, kind, incoming, &new_id, None, watermark)?;
        return Ok(());
    }

    // Only child collections changed: reuse the open parent version.
    let open = store::open_history_row(tx, kind.name, rid)
        .map_err(|e| e.for_resource(rid))?
        .ok_or_else(|| {
            StorageError::Consistency(format!(
                "no open history record for resource '{rid}' of kind '{}' with changed children",
                kind.name
            ))
        })?;

    for child in kind.children {
        if diff.child_changed.get(child.name).copied().unwrap_or(false) {
            store::close_child_history(tx, &open.history_id, Some(child.name), watermark)
                .map_err(|e| e.for_resource(rid))?;
            open_child_rows(tx, kind, incoming, &open.history_id, Some(child.name), watermark)?;
        }
    }

    Ok(())
}

/// Retirement path: closes the open history version and all its open
/// child rows with one valid-to stamp. Idempotent when no version is open.
pub fn close_history(
    tx: &Transaction<'_>,
    kind: &str,
    resource_id: &str,
    valid_to: DateTime<Utc>,
) -> Result<()> {
    let Some(open) = store::open_history_row(tx, kind, resource_id)
        .map_err(|e| e.for_resource(resource_id))?
    else {
        return Ok(());
    };
    store::close_history_row(tx, &open.history_id, valid_to)
        .map_err(|e| e.for_resource(resource_id))?;
    store::close_child_history(tx, &open.history_id, None, valid_to)
        .map_err(|e| e.for_resource(resource_id))
}

fn open_child_rows(
    tx: &Transaction<'_>,
    kind: &ResourceKindSpec,
    incoming: &Snapshot,
    history_id: &str,
    only_collection: Option<&str>,
    valid_from: DateTime<Utc>,
) -> Result<()> {
    let rid = incoming.resource_id.as_str();
    for child in kind.children {
        if let Some(only) = only_collection {
            if child.name != only {
                continue;
            }
        }
        let Some(rows) = incoming.children.get(child.name) else {
            continue;
        };
        for row in rows {
            let key = child.natural_key(&row.attrs)?;
            store::insert_child_history(tx, history_id, child.name, &key, &row.attrs, valid_from)
                .map_err(|e| e.for_resource(rid))?;
        }
    }
    Ok(())
}

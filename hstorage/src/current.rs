use chrono::{DateTime, Utc};
use rusqlite::Transaction;

use crate::errors::Result;
use crate::kind::ResourceKindSpec;
use crate::models::{Diff, Snapshot};
use crate::store;

/// Applies the diffed snapshot to the current-state store with minimal
/// writes: untouched resources only get their collected-at stamp bumped,
/// changed child collections are wholesale replaced.
pub fn apply(
    tx: &Transaction<'_>,
    kind: &ResourceKindSpec,
    diff: &Diff,
    incoming: &Snapshot,
    watermark: DateTime<Utc>,
) -> Result<()> {
    let rid = incoming.resource_id.as_str();

    if diff.is_new {
        store::insert_current(tx, kind.name, rid, &incoming.attrs, watermark)
            .map_err(|e| e.for_resource(rid))?;
        for child in kind.children {
            insert_collection(tx, kind, incoming, child.name)?;
        }
        return Ok(());
    }

    if diff.is_changed {
        store::update_current_attrs(tx, kind.name, rid, &incoming.attrs, watermark)
            .map_err(|e| e.for_resource(rid))?;
    } else {
        store::touch_current(tx, kind.name, rid, watermark).map_err(|e| e.for_resource(rid))?;
    }

    for child in kind.children {
        if diff.child_changed.get(child.name).copied().unwrap_or(false) {
            store::delete_children(tx, kind.name, rid, child.name)
                .map_err(|e| e.for_resource(rid))?;
            insert_collection(tx, kind, incoming, child.name)?;
        }
    }

    Ok(())
}

fn insert_collection(
    tx: &Transaction<'_>,
    kind: &ResourceKindSpec,
    incoming: &Snapshot,
    collection: &str,
) -> Result<()> {
    let rid = incoming.resource_id.as_str();
    let Some(spec) = kind.child(collection) else {
        return Ok(());
    };
    let Some(rows) = incoming.children.get(collection) else {
        return Ok(());
    };
    for child in rows {
        let key = spec.natural_key(&child.attrs)?;
        store::insert_child(tx, kind.name, rid, collection, &key, &child.attrs)
            .map_err(|e| e.for_resource(rid))?;
    }
    Ok(())
}

use std::collections::{HashMap, HashSet};

use crate::errors::Result;
use crate::kind::ResourceKindSpec;
use crate::models::{CurrentRecord, Diff, Snapshot};

/// Compares a fetched snapshot against the persisted current-state record.
///
/// Pure; absence of an existing record is valid input, not an error.
/// Scalar comparison is exact, field by field; any mismatch (including an
/// added or removed field) marks the resource changed. Child collections
/// compare as order-insensitive sets keyed by their natural key.
pub fn diff(
    kind: &ResourceKindSpec,
    existing: Option<&CurrentRecord>,
    incoming: &Snapshot,
) -> Result<Diff> {
    let Some(existing) = existing else {
        let mut d = Diff {
            is_new: true,
            is_changed: false,
            child_changed: Default::default(),
        };
        for child in kind.children {
            d.child_changed.insert(child.name.to_string(), true);
        }
        return Ok(d);
    };

    let mut d = Diff {
        is_new: false,
        is_changed: existing.attrs != incoming.attrs,
        child_changed: Default::default(),
    };

    static NO_ROWS: Vec<crate::models::ChildRecord> = Vec::new();
    static NO_SNAPS: Vec<crate::models::ChildSnapshot> = Vec::new();

    for child in kind.children {
        let existing_rows = existing.children.get(child.name).unwrap_or(&NO_ROWS);
        let incoming_rows = incoming.children.get(child.name).unwrap_or(&NO_SNAPS);
        let changed = child_set_changed(child, existing_rows, incoming_rows)?;
        d.child_changed.insert(child.name.to_string(), changed);
    }

    Ok(d)
}

fn child_set_changed(
    spec: &crate::kind::ChildKindSpec,
    existing: &[crate::models::ChildRecord],
    incoming: &[crate::models::ChildSnapshot],
) -> Result<bool> {
    if existing.len() != incoming.len() {
        return Ok(true);
    }

    let by_key: HashMap<&str, &crate::models::AttrMap> = existing
        .iter()
        .map(|row| (row.child_key.as_str(), &row.attrs))
        .collect();

    let mut seen = HashSet::new();
    for child in incoming {
        let key = spec.natural_key(&child.attrs)?;
        if !seen.insert(key.clone()) {
            // Duplicate natural keys cannot match a keyed set.
            return Ok(true);
        }
        match by_key.get(key.as_str()) {
            Some(attrs) if **attrs == child.attrs => {}
            _ => return Ok(true),
        }
    }

    Ok(false)
}

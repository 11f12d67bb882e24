use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::models::{AttrMap, ChildRecord, CurrentRecord};

/// The bitemporal ledger: current-state rows, append-only history rows,
/// and run logs, all in one SQLite database.
///
/// Row-level helpers take a `&Transaction` so the writers compose inside
/// the batch committer's transaction or the sweeper's own one.
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let conn = Connection::open(&config.ledger_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS resource_current (
                kind TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                attrs TEXT NOT NULL,
                first_collected_at INTEGER NOT NULL,
                collected_at INTEGER NOT NULL,
                PRIMARY KEY (kind, resource_id)
            );
            CREATE TABLE IF NOT EXISTS child_current (
                kind TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                collection TEXT NOT NULL,
                child_key TEXT NOT NULL,
                attrs TEXT NOT NULL,
                PRIMARY KEY (kind, resource_id, collection, child_key)
            );
            CREATE INDEX IF NOT EXISTS idx_current_collected
                ON resource_current (kind, collected_at);
            CREATE TABLE IF NOT EXISTS resource_history (
                history_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                attrs TEXT NOT NULL,
                first_collected_at INTEGER NOT NULL,
                collected_at INTEGER NOT NULL,
                valid_from INTEGER NOT NULL,
                valid_to INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_history_open
                ON resource_history (kind, resource_id, valid_to);
            CREATE TABLE IF NOT EXISTS child_history (
                child_history_id TEXT PRIMARY KEY,
                history_id TEXT NOT NULL,
                collection TEXT NOT NULL,
                child_key TEXT NOT NULL,
                attrs TEXT NOT NULL,
                valid_from INTEGER NOT NULL,
                valid_to INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_child_history_open
                ON child_history (history_id, valid_to);
            CREATE TABLE IF NOT EXISTS run_logs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_name TEXT,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                status TEXT,
                details TEXT
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    pub fn create_run_log(&self, run_name: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let start_time = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO run_logs (run_name, start_time, status) VALUES (?1, ?2, 'RUNNING')",
            params![run_name, start_time],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_run_log_status(&self, run_id: i64, status: &str, details: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let end_time = Utc::now().timestamp();
        conn.execute(
            "UPDATE run_logs SET status = ?1, details = ?2, end_time = ?3 WHERE run_id = ?4",
            params![status, details, end_time, run_id],
        )?;
        Ok(())
    }
}

/// Ledger timestamps are microsecond Unix integers.
pub(crate) fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| {
        StorageError::Consistency(format!("ledger timestamp {value} is out of range"))
    })
}

fn attrs_to_json(attrs: &AttrMap) -> Result<String> {
    Ok(serde_json::to_string(attrs)?)
}

fn attrs_from_json(json: &str) -> Result<AttrMap> {
    Ok(serde_json::from_str(json)?)
}

// --- Current-state rows ---

/// Point lookup by resource id with the child rows eagerly loaded.
pub fn load_current(
    tx: &Transaction<'_>,
    kind: &str,
    resource_id: &str,
) -> Result<Option<CurrentRecord>> {
    let scalars = {
        let mut stmt = tx.prepare(
            "SELECT attrs, first_collected_at, collected_at
             FROM resource_current WHERE kind = ?1 AND resource_id = ?2",
        )?;
        let mut rows = stmt.query(params![kind, resource_id])?;
        match rows.next()? {
            Some(row) => {
                let attrs: String = row.get(0)?;
                let first: i64 = row.get(1)?;
                let collected: i64 = row.get(2)?;
                Some((attrs, first, collected))
            }
            None => None,
        }
    };
    let Some((attrs_json, first, collected)) = scalars else {
        return Ok(None);
    };

    let mut children: BTreeMap<String, Vec<ChildRecord>> = BTreeMap::new();
    let mut stmt = tx.prepare(
        "SELECT collection, child_key, attrs
         FROM child_current WHERE kind = ?1 AND resource_id = ?2",
    )?;
    let mut rows = stmt.query(params![kind, resource_id])?;
    while let Some(row) = rows.next()? {
        let collection: String = row.get(0)?;
        let child_key: String = row.get(1)?;
        let child_attrs: String = row.get(2)?;
        children.entry(collection).or_default().push(ChildRecord {
            child_key,
            attrs: attrs_from_json(&child_attrs)?,
        });
    }

    Ok(Some(CurrentRecord {
        resource_id: resource_id.to_string(),
        attrs: attrs_from_json(&attrs_json)?,
        first_collected_at: from_micros(first)?,
        collected_at: from_micros(collected)?,
        children,
    }))
}

pub fn insert_current(
    tx: &Transaction<'_>,
    kind: &str,
    resource_id: &str,
    attrs: &AttrMap,
    collected_at: DateTime<Utc>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO resource_current (kind, resource_id, attrs, first_collected_at, collected_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            kind,
            resource_id,
            attrs_to_json(attrs)?,
            micros(collected_at),
            micros(collected_at)
        ],
    )?;
    Ok(())
}

/// Scalar update; `first_collected_at` is deliberately left alone.
pub fn update_current_attrs(
    tx: &Transaction<'_>,
    kind: &str,
    resource_id: &str,
    attrs: &AttrMap,
    collected_at: DateTime<Utc>,
) -> Result<()> {
    tx.execute(
        "UPDATE resource_current SET attrs = ?1, collected_at = ?2
         WHERE kind = ?3 AND resource_id = ?4",
        params![
            attrs_to_json(attrs)?,
            micros(collected_at),
            kind,
            resource_id
        ],
    )?;
    Ok(())
}

/// The minimal-write fast path: only the collected-at stamp moves.
pub fn touch_current(
    tx: &Transaction<'_>,
    kind: &str,
    resource_id: &str,
    collected_at: DateTime<Utc>,
) -> Result<()> {
    tx.execute(
        "UPDATE resource_current SET collected_at = ?1
         WHERE kind = ?2 AND resource_id = ?3",
        params![micros(collected_at), kind, resource_id],
    )?;
    Ok(())
}

pub fn insert_child(
    tx: &Transaction<'_>,
    kind: &str,
    resource_id: &str,
    collection: &str,
    child_key: &str,
    attrs: &AttrMap,
) -> Result<()> {
    tx.execute(
        "INSERT INTO child_current (kind, resource_id, collection, child_key, attrs)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![kind, resource_id, collection, child_key, attrs_to_json(attrs)?],
    )?;
    Ok(())
}

pub fn delete_children(
    tx: &Transaction<'_>,
    kind: &str,
    resource_id: &str,
    collection: &str,
) -> Result<()> {
    tx.execute(
        "DELETE FROM child_current
         WHERE kind = ?1 AND resource_id = ?2 AND collection = ?3",
        params![kind, resource_id, collection],
    )?;
    Ok(())
}

/// Removes a current-state row and all its child rows.
pub fn delete_current(tx: &Transaction<'_>, kind: &str, resource_id: &str) -> Result<()> {
    tx.execute(
        "DELETE FROM child_current WHERE kind = ?1 AND resource_id = ?2",
        params![kind, resource_id],
    )?;
    tx.execute(
        "DELETE FROM resource_current WHERE kind = ?1 AND resource_id = ?2",
        params![kind, resource_id],
    )?;
    Ok(())
}

/// Resources of this kind not stamped by the latest run.
pub fn stale_resource_ids(
    tx: &Transaction<'_>,
    kind: &str,
    watermark: DateTime<Utc>,
) -> Result<Vec<String>> {
    let mut stmt = tx.prepare(
        "SELECT resource_id FROM resource_current
         WHERE kind = ?1 AND collected_at < ?2",
    )?;
    let mut rows = stmt.query(params![kind, micros(watermark)])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        ids.push(row.get(0)?);
    }
    Ok(ids)
}

// --- History rows ---

/// The single open history version of a resource, if any.
#[derive(Debug, Clone)]
pub struct OpenHistoryRow {
    pub history_id: String,
    pub first_collected_at: DateTime<Utc>,
}

pub fn open_history_row(
    tx: &Transaction<'_>,
    kind: &str,
    resource_id: &str,
) -> Result<Option<OpenHistoryRow>> {
    let mut stmt = tx.prepare(
        "SELECT history_id, first_collected_at FROM resource_history
         WHERE kind = ?1 AND resource_id = ?2 AND valid_to IS NULL",
    )?;
    let mut rows = stmt.query(params![kind, resource_id])?;
    if let Some(row) = rows.next()? {
        let first: i64 = row.get(1)?;
        Ok(Some(OpenHistoryRow {
            history_id: row.get(0)?,
            first_collected_at: from_micros(first)?,
        }))
    } else {
        Ok(None)
    }
}

/// Appends a new open history version and returns its id.
pub fn insert_history(
    tx: &Transaction<'_>,
    kind: &str,
    resource_id: &str,
    attrs: &AttrMap,
    first_collected_at: DateTime<Utc>,
    collected_at: DateTime<Utc>,
    valid_from: DateTime<Utc>,
) -> Result<String> {
    let history_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO resource_history
             (history_id, kind, resource_id, attrs, first_collected_at, collected_at, valid_from, valid_to)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
        params![
            history_id,
            kind,
            resource_id,
            attrs_to_json(attrs)?,
            micros(first_collected_at),
            micros(collected_at),
            micros(valid_from)
        ],
    )?;
    Ok(history_id)
}

pub fn close_history_row(
    tx: &Transaction<'_>,
    history_id: &str,
    valid_to: DateTime<Utc>,
) -> Result<()> {
    tx.execute(
        "UPDATE resource_history SET valid_to = ?1 WHERE history_id = ?2",
        params![micros(valid_to), history_id],
    )?;
    Ok(())
}

pub fn insert_child_history(
    tx: &Transaction<'_>,
    history_id: &str,
    collection: &str,
    child_key: &str,
    attrs: &AttrMap,
    valid_from: DateTime<Utc>,
) -> Result<()> {
    let child_history_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO child_history
             (child_history_id, history_id, collection, child_key, attrs, valid_from, valid_to)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
        params![
            child_history_id,
            history_id,
            collection,
            child_key,
            attrs_to_json(attrs)?,
            micros(valid_from)
        ],
    )?;
    Ok(())
}

/// Closes the open child history rows of one parent version; restricted to
/// a single collection when `collection` is given.
pub fn close_child_history(
    tx: &Transaction<'_>,
    history_id: &str,
    collection: Option<&str>,
    valid_to: DateTime<Utc>,
) -> Result<()> {
    match collection {
        Some(collection) => {
            tx.execute(
                "UPDATE child_history SET valid_to = ?1
                 WHERE history_id = ?2 AND collection = ?3 AND valid_to IS NULL",
                params![micros(valid_to), history_id, collection],
            )?;
        }
        None => {
            tx.execute(
                "UPDATE child_history SET valid_to = ?1
                 WHERE history_id = ?2 AND valid_to IS NULL",
                params![micros(valid_to), history_id],
            )?;
        }
    }
    Ok(())
}

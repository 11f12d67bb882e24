use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tempfile::TempDir;

use hstorage::batch::run_batch;
use hstorage::config::StorageConfig;
use hstorage::errors::StorageError;
use hstorage::kind::{ChildKindSpec, ResourceKindSpec};
use hstorage::models::{AttrMap, ChildSnapshot, Snapshot};
use hstorage::store::Ledger;
use hstorage::sweep::retire;

static DEVICE_KIND: ResourceKindSpec = ResourceKindSpec {
    name: "device",
    children: &[ChildKindSpec {
        name: "tags",
        key_fields: &["key"],
    }],
};

fn setup() -> (Ledger, Connection, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::new(dir.path());
    let ledger = Ledger::new(&config).unwrap();
    ledger.initialize_schema().unwrap();
    let inspect = Connection::open(&config.ledger_path).unwrap();
    (ledger, inspect, dir)
}

/// Deterministic run watermarks, one second apart.
fn wm(run: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(1_700_000_000_000_000 + run * 1_000_000).unwrap()
}

fn attrs(value: serde_json::Value) -> AttrMap {
    serde_json::from_value(value).unwrap()
}

fn snap(id: &str, name: &str, tags: &[(&str, &str)]) -> Snapshot {
    let children = tags
        .iter()
        .map(|(k, v)| ChildSnapshot {
            attrs: attrs(serde_json::json!({"key": k, "value": v})),
        })
        .collect();
    Snapshot {
        resource_id: id.to_string(),
        attrs: attrs(serde_json::json!({"name": name})),
        children: [("tags".to_string(), children)].into_iter().collect(),
    }
}

fn count(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> i64 {
    conn.query_row(sql, params, |row| row.get(0)).unwrap()
}

fn open_history_count(conn: &Connection, rid: &str) -> i64 {
    count(
        conn,
        "SELECT COUNT(*) FROM resource_history
         WHERE kind = 'device' AND resource_id = ?1 AND valid_to IS NULL",
        &[&rid],
    )
}

fn history_rows(conn: &Connection, rid: &str) -> Vec<(String, String, i64, i64, Option<i64>)> {
    let mut stmt = conn
        .prepare(
            "SELECT history_id, attrs, first_collected_at, valid_from, valid_to
             FROM resource_history
             WHERE kind = 'device' AND resource_id = ?1
             ORDER BY valid_from",
        )
        .unwrap();
    let rows = stmt
        .query_map([rid], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })
        .unwrap();
    rows.map(|r| r.unwrap()).collect()
}

fn child_history_rows(conn: &Connection, history_id: &str) -> Vec<(String, String, Option<i64>)> {
    let mut stmt = conn
        .prepare(
            "SELECT child_key, attrs, valid_to FROM child_history
             WHERE history_id = ?1 ORDER BY child_key",
        )
        .unwrap();
    let rows = stmt
        .query_map([history_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap();
    rows.map(|r| r.unwrap()).collect()
}

#[test]
fn scenario_a_first_observation_creates_record_and_history() {
    let (ledger, inspect, _dir) = setup();

    let outcome = run_batch(
        &ledger,
        &DEVICE_KIND,
        &[snap("r1", "alpha", &[("env", "prod")])],
        wm(1),
    )
    .unwrap();
    assert_eq!(outcome.processed_count, 1);
    assert_eq!(outcome.collected_at, wm(1));

    assert_eq!(
        count(
            &inspect,
            "SELECT COUNT(*) FROM resource_current WHERE kind = 'device' AND resource_id = 'r1'",
            &[],
        ),
        1
    );
    assert_eq!(open_history_count(&inspect, "r1"), 1);

    let history = history_rows(&inspect, "r1");
    assert_eq!(history.len(), 1);
    let (history_id, _, first, valid_from, valid_to) = &history[0];
    assert_eq!(*first, wm(1).timestamp_micros());
    assert_eq!(*valid_from, wm(1).timestamp_micros());
    assert_eq!(*valid_to, None);

    let children = child_history_rows(&inspect, history_id);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].0, "env");
    assert_eq!(children[0].2, None);
}

#[test]
fn scenario_b_unchanged_run_only_bumps_collected_at() {
    let (ledger, inspect, _dir) = setup();
    let observed = snap("r1", "alpha", &[("env", "prod")]);

    run_batch(&ledger, &DEVICE_KIND, std::slice::from_ref(&observed), wm(1)).unwrap();
    run_batch(&ledger, &DEVICE_KIND, std::slice::from_ref(&observed), wm(2)).unwrap();

    let collected: i64 = inspect
        .query_row(
            "SELECT collected_at FROM resource_current WHERE kind = 'device' AND resource_id = 'r1'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(collected, wm(2).timestamp_micros());

    assert_eq!(history_rows(&inspect, "r1").len(), 1);
    assert_eq!(
        count(&inspect, "SELECT COUNT(*) FROM child_history", &[]),
        1
    );
}

#[test]
fn scenario_b_reordered_children_are_still_a_noop() {
    let (ledger, inspect, _dir) = setup();

    run_batch(
        &ledger,
        &DEVICE_KIND,
        &[snap("r1", "alpha", &[("env", "prod"), ("team", "core")])],
        wm(1),
    )
    .unwrap();
    run_batch(
        &ledger,
        &DEVICE_KIND,
        &[snap("r1", "alpha", &[("team", "core"), ("env", "prod")])],
        wm(2),
    )
    .unwrap();

    assert_eq!(history_rows(&inspect, "r1").len(), 1);
    assert_eq!(
        count(&inspect, "SELECT COUNT(*) FROM child_history", &[]),
        2
    );
}

#[test]
fn scenario_c_scalar_change_rolls_the_history_version() {
    let (ledger, inspect, _dir) = setup();

    run_batch(
        &ledger,
        &DEVICE_KIND,
        &[snap("r1", "alpha", &[("env", "prod")])],
        wm(1),
    )
    .unwrap();
    run_batch(
        &ledger,
        &DEVICE_KIND,
        &[snap("r1", "beta", &[("env", "prod")])],
        wm(2),
    )
    .unwrap();

    let history = history_rows(&inspect, "r1");
    assert_eq!(history.len(), 2);

    let (old_id, old_attrs, old_first, old_from, old_to) = &history[0];
    let (new_id, new_attrs, new_first, new_from, new_to) = &history[1];

    assert!(old_attrs.contains("alpha"));
    assert_eq!(*old_to, Some(wm(2).timestamp_micros()));
    assert!(new_attrs.contains("beta"));
    assert_eq!(*new_from, wm(2).timestamp_micros());
    assert_eq!(*new_to, None);

    // FirstCollectedAt carries forward unchanged.
    assert_eq!(old_first, new_first);
    assert_eq!(*new_first, wm(1).timestamp_micros());
    assert_eq!(*old_from, wm(1).timestamp_micros());

    // Child rows re-home under the new version even though the tag set
    // did not change.
    let old_children = child_history_rows(&inspect, old_id);
    let new_children = child_history_rows(&inspect, new_id);
    assert_eq!(old_children.len(), 1);
    assert_eq!(old_children[0].2, Some(wm(2).timestamp_micros()));
    assert_eq!(new_children.len(), 1);
    assert_eq!(new_children[0].0, "env");
    assert_eq!(new_children[0].1, old_children[0].1);
    assert_eq!(new_children[0].2, None);
}

#[test]
fn child_only_change_reuses_the_open_version() {
    let (ledger, inspect, _dir) = setup();

    run_batch(
        &ledger,
        &DEVICE_KIND,
        &[snap("r1", "alpha", &[("env", "prod")])],
        wm(1),
    )
    .unwrap();
    run_batch(
        &ledger,
        &DEVICE_KIND,
        &[snap("r1", "alpha", &[("env", "staging")])],
        wm(2),
    )
    .unwrap();

    let history = history_rows(&inspect, "r1");
    assert_eq!(history.len(), 1);
    let history_id = &history[0].0;

    let children = child_history_rows(&inspect, history_id);
    assert_eq!(children.len(), 2);
    let closed: Vec<_> = children.iter().filter(|c| c.2.is_some()).collect();
    let open: Vec<_> = children.iter().filter(|c| c.2.is_none()).collect();
    assert_eq!(closed.len(), 1);
    assert!(closed[0].1.contains("prod"));
    assert_eq!(open.len(), 1);
    assert!(open[0].1.contains("staging"));
}

#[test]
fn scenario_d_omitted_resource_is_retired() {
    let (ledger, inspect, _dir) = setup();

    run_batch(
        &ledger,
        &DEVICE_KIND,
        &[
            snap("r1", "alpha", &[("env", "prod")]),
            snap("r2", "gamma", &[]),
        ],
        wm(1),
    )
    .unwrap();

    // Second run only observes r2.
    run_batch(&ledger, &DEVICE_KIND, &[snap("r2", "gamma", &[])], wm(2)).unwrap();
    let retired = retire(&ledger, &DEVICE_KIND, wm(2)).unwrap();
    assert_eq!(retired, 1);

    assert_eq!(
        count(
            &inspect,
            "SELECT COUNT(*) FROM resource_current WHERE resource_id = 'r1'",
            &[],
        ),
        0
    );
    assert_eq!(
        count(
            &inspect,
            "SELECT COUNT(*) FROM child_current WHERE resource_id = 'r1'",
            &[],
        ),
        0
    );
    assert_eq!(open_history_count(&inspect, "r1"), 0);

    // The retained record is untouched by the sweep.
    assert_eq!(open_history_count(&inspect, "r2"), 1);
    assert_eq!(
        count(
            &inspect,
            "SELECT COUNT(*) FROM resource_current WHERE resource_id = 'r2'",
            &[],
        ),
        1
    );

    // History rows survive retirement, closed together with their children.
    let history = history_rows(&inspect, "r1");
    assert_eq!(history.len(), 1);
    assert!(history[0].4.is_some());
    let children = child_history_rows(&inspect, &history[0].0);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].2, history[0].4);

    // Nothing left to retire on a replay.
    assert_eq!(retire(&ledger, &DEVICE_KIND, wm(2)).unwrap(), 0);
}

#[test]
fn scenario_e_failed_batch_rolls_back_every_write() {
    let (ledger, inspect, _dir) = setup();

    // The second snapshot carries a tag without its natural key field.
    let mut bad = snap("r2", "gamma", &[]);
    bad.children.insert(
        "tags".to_string(),
        vec![ChildSnapshot {
            attrs: attrs(serde_json::json!({"value": "orphan"})),
        }],
    );

    let err = run_batch(
        &ledger,
        &DEVICE_KIND,
        &[snap("r1", "alpha", &[("env", "prod")]), bad],
        wm(1),
    )
    .unwrap_err();
    match &err {
        StorageError::Conversion(message) => {
            assert!(message.contains("r2"), "abort must name the resource: {message}");
        }
        other => panic!("expected conversion error, got {other}"),
    }

    assert_eq!(
        count(&inspect, "SELECT COUNT(*) FROM resource_current", &[]),
        0
    );
    assert_eq!(
        count(&inspect, "SELECT COUNT(*) FROM resource_history", &[]),
        0
    );
    assert_eq!(
        count(&inspect, "SELECT COUNT(*) FROM child_history", &[]),
        0
    );
}

#[test]
fn missing_open_history_row_is_a_fatal_consistency_error() {
    let (ledger, inspect, _dir) = setup();

    run_batch(&ledger, &DEVICE_KIND, &[snap("r1", "alpha", &[])], wm(1)).unwrap();

    // Simulate a ledger that lost the open version of r1.
    inspect
        .execute("DELETE FROM resource_history WHERE resource_id = 'r1'", [])
        .unwrap();

    let err = run_batch(&ledger, &DEVICE_KIND, &[snap("r1", "beta", &[])], wm(2)).unwrap_err();
    match &err {
        StorageError::Consistency(message) => {
            assert!(message.contains("r1"), "error must name the resource: {message}");
        }
        other => panic!("expected consistency error, got {other}"),
    }

    // The failed batch rolled back; the current row is untouched.
    let (attrs, collected): (String, i64) = inspect
        .query_row(
            "SELECT attrs, collected_at FROM resource_current WHERE resource_id = 'r1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert!(attrs.contains("alpha"));
    assert_eq!(collected, wm(1).timestamp_micros());
}

#[test]
fn persistence_error_names_the_resource_in_flight() {
    let (ledger, _inspect, _dir) = setup();

    // Duplicate natural keys collide on the child primary key.
    let duplicated = snap("r9", "alpha", &[("env", "prod"), ("env", "prod")]);
    let err = run_batch(&ledger, &DEVICE_KIND, &[duplicated], wm(1)).unwrap_err();
    match err {
        StorageError::Persistence { resource_id, .. } => assert_eq!(resource_id, "r9"),
        other => panic!("expected persistence error, got {other}"),
    }
}

#[test]
fn history_intervals_never_overlap() {
    let (ledger, inspect, _dir) = setup();

    run_batch(&ledger, &DEVICE_KIND, &[snap("r1", "v1", &[])], wm(1)).unwrap();
    run_batch(&ledger, &DEVICE_KIND, &[snap("r1", "v2", &[])], wm(2)).unwrap();
    run_batch(&ledger, &DEVICE_KIND, &[snap("r1", "v2", &[])], wm(3)).unwrap();
    run_batch(&ledger, &DEVICE_KIND, &[snap("r1", "v3", &[])], wm(4)).unwrap();

    let history = history_rows(&inspect, "r1");
    assert_eq!(history.len(), 3);
    assert!(history.iter().filter(|h| h.4.is_none()).count() <= 1);

    for pair in history.windows(2) {
        let closed_at = pair[0].4.expect("only the last version may be open");
        assert!(closed_at <= pair[1].3);
        assert!(pair[0].2 == pair[1].2, "first_collected_at must not drift");
    }
}

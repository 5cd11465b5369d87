use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use preference_axioms::cache::{CachedAxiom, PreferenceKey, PreferenceStore, SqlitePreferenceStore};
use preference_axioms::{Axiom, AxiomError, Preference, Query, RankedDocument, Symmetry};
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct ExportRow {
    key_hash: String,
    namespace: String,
    output_a_id: String,
    preference: f64,
    hit_count: i64,
}

fn read_export(path: &std::path::Path) -> Vec<ExportRow> {
    let raw = std::fs::read_to_string(path).unwrap();
    raw.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn sqlite_store_put_get_and_export_increments_hit_count() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let store = SqlitePreferenceStore::new(&db_path).unwrap();

    let key = PreferenceKey::new("PROX1", "q1", "a", "b");
    assert_eq!(store.get(&key).unwrap(), None);

    store.put(&key, 0.75).unwrap();
    assert_eq!(store.get(&key).unwrap(), Some(0.75));
    assert_eq!(store.get(&key).unwrap(), Some(0.75));

    let export_path = dir.path().join("export.jsonl");
    let written = store.export_jsonl(&export_path).unwrap();
    assert_eq!(written, 1);

    let row = read_export(&export_path)
        .into_iter()
        .find(|r| r.key_hash == key.key_hash)
        .unwrap();
    assert_eq!(row.hit_count, 2);
    assert_eq!(row.namespace, "PROX1");
    assert_eq!(row.output_a_id, "a");
    assert_eq!(row.preference, 0.75);
}

#[test]
fn sqlite_store_upsert_overwrites_value() {
    let dir = tempdir().unwrap();
    let store = SqlitePreferenceStore::new(dir.path().join("cache.sqlite")).unwrap();
    let key = PreferenceKey::new("PROX1", "q1", "a", "b");
    store.put(&key, 1.0).unwrap();
    store.put(&key, -2.0).unwrap();
    assert_eq!(store.get(&key).unwrap(), Some(-2.0));
}

#[test]
fn sqlite_store_prune_max_rows_keeps_most_recent() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let store = SqlitePreferenceStore::new(&db_path).unwrap();

    let old_key = PreferenceKey::new("PROX1", "q1", "a", "b");
    let new_key = PreferenceKey::new("PROX1", "q1", "c", "d");
    store.put(&old_key, 1.0).unwrap();
    store.put(&new_key, -1.0).unwrap();

    // Make the "old" row deterministically older so prune ordering is stable.
    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE preference_cache SET updated_at = 0 WHERE key_hash = ?1",
        rusqlite::params![old_key.key_hash],
    )
    .unwrap();

    let stats = store.prune(None, Some(1)).unwrap();
    assert_eq!(stats.remaining, 1);
    assert_eq!(stats.deleted, 1);

    let export_path = dir.path().join("export.jsonl");
    store.export_jsonl(&export_path).unwrap();
    let rows = read_export(&export_path);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key_hash, new_key.key_hash);
}

#[test]
fn sqlite_store_prune_by_age() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let store = SqlitePreferenceStore::new(&db_path).unwrap();
    let stale = PreferenceKey::new("PROX1", "q1", "a", "b");
    let fresh = PreferenceKey::new("PROX1", "q1", "b", "c");
    store.put(&stale, 1.0).unwrap();
    store.put(&fresh, 1.0).unwrap();

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    conn.execute(
        "UPDATE preference_cache SET updated_at = 0 WHERE key_hash = ?1",
        rusqlite::params![stale.key_hash],
    )
    .unwrap();

    let stats = store.prune(Some(30), None).unwrap();
    assert_eq!(stats.deleted, 1);
    assert_eq!(store.get(&stale).unwrap(), None);
    assert_eq!(store.get(&fresh).unwrap(), Some(1.0));
}

#[test]
fn sqlite_store_lock_does_not_truncate_lockfile() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let store = SqlitePreferenceStore::new(&db_path).unwrap();

    let mut lock_path = db_path.clone();
    lock_path.set_extension("lock");
    std::fs::write(&lock_path, "keep").unwrap();

    let lock = store.lock_exclusive().unwrap();
    drop(lock);

    let contents = std::fs::read_to_string(&lock_path).unwrap();
    assert_eq!(contents, "keep");
}

struct CountingScore {
    calls: Arc<AtomicUsize>,
}

impl Axiom<Query, RankedDocument> for CountingScore {
    fn preference(
        &self,
        _input: &Query,
        a: &RankedDocument,
        b: &RankedDocument,
    ) -> Result<Preference, AxiomError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(a.score - b.score)
    }

    fn name(&self) -> String {
        "SCORE_DIFF".to_string()
    }

    fn symmetry(&self) -> Symmetry {
        Symmetry::Antisymmetric
    }
}

#[test]
fn cached_axiom_reuses_preferences_across_store_instances() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("cache.sqlite");
    let calls = Arc::new(AtomicUsize::new(0));
    let query = Query::new("q1", "rust borrow checker");
    let a = RankedDocument::new("a", 1, 0.9);
    let b = RankedDocument::new("b", 2, 0.4);

    {
        let store = Arc::new(SqlitePreferenceStore::new(&db_path).unwrap());
        let cached: CachedAxiom<Query, RankedDocument> = CachedAxiom::new(
            Arc::new(CountingScore {
                calls: Arc::clone(&calls),
            }),
            store,
        );
        let value = cached.preference(&query, &a, &b).unwrap();
        assert!((value - 0.5).abs() < 1e-12);
    }

    let store = Arc::new(SqlitePreferenceStore::new(&db_path).unwrap());
    let cached: CachedAxiom<Query, RankedDocument> = CachedAxiom::new(
        Arc::new(CountingScore {
            calls: Arc::clone(&calls),
        }),
        store,
    );
    let reversed = cached.preference(&query, &b, &a).unwrap();
    assert!((reversed + 0.5).abs() < 1e-12);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cached.stats().derived, 1);
}

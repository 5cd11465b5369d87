//! Memoization of pairwise preferences.
//!
//! [`CachedAxiom`] sits between the reranker and an expensive axiom. Entries
//! live in a [`PreferenceStore`]: an in-process concurrent map, or a SQLite
//! file that survives across runs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use fs2::FileExt;
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use crate::axiom::{Axiom, AxiomError, AxiomRef, Preference, Symmetry};
use crate::types::{CacheInput, Identified};

/// Key of one cached preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceKey {
    /// Axiom description; separates axioms sharing a store.
    pub namespace: String,
    pub input_key: String,
    pub output_a_id: String,
    pub output_b_id: String,
    pub key_hash: String,
}

impl PreferenceKey {
    pub fn new(namespace: &str, input_key: &str, output_a_id: &str, output_b_id: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            input_key: input_key.to_string(),
            output_a_id: output_a_id.to_string(),
            output_b_id: output_b_id.to_string(),
            key_hash: hash_fields(&[namespace, input_key, output_a_id, output_b_id]),
        }
    }

    /// Key of the same comparison with the outputs swapped.
    pub fn reversed(&self) -> Self {
        Self::new(
            &self.namespace,
            &self.input_key,
            &self.output_b_id,
            &self.output_a_id,
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("serialization error: {0}")]
    Serde(String),
}

/// Storage backend for cached preferences.
///
/// Implementations must tolerate concurrent `get`/`put` from several threads;
/// readers must never observe a partially written value.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &PreferenceKey) -> Result<Option<Preference>, CacheError>;
    fn put(&self, key: &PreferenceKey, value: Preference) -> Result<(), CacheError>;
}

// =============================================================================
// In-memory store
// =============================================================================

/// Process-scoped store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    entries: DashMap<String, Preference>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &PreferenceKey) -> Result<Option<Preference>, CacheError> {
        Ok(self.entries.get(&key.key_hash).map(|entry| *entry.value()))
    }

    fn put(&self, key: &PreferenceKey, value: Preference) -> Result<(), CacheError> {
        self.entries.insert(key.key_hash.clone(), value);
        Ok(())
    }
}

// =============================================================================
// SQLite store
// =============================================================================

/// Persistent store keyed by a hash of (axiom, query, document ids).
#[derive(Clone)]
pub struct SqlitePreferenceStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for SqlitePreferenceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlitePreferenceStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqlitePreferenceStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA synchronous=NORMAL; \
             CREATE TABLE IF NOT EXISTS preference_cache ( \
               key_hash TEXT PRIMARY KEY, \
               namespace TEXT NOT NULL, \
               input_key TEXT NOT NULL, \
               output_a_id TEXT NOT NULL, \
               output_b_id TEXT NOT NULL, \
               preference REAL NOT NULL, \
               created_at INTEGER NOT NULL, \
               updated_at INTEGER NOT NULL, \
               hit_count INTEGER NOT NULL DEFAULT 0 \
             );",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("AXIOM_CACHE_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".axiom_preference_cache.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_exclusive(&self) -> Result<CacheLock, CacheError> {
        CacheLock::new(&self.path)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&Connection) -> Result<R, CacheError>,
    {
        let guard = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        f(&guard)
    }
}

impl PreferenceStore for SqlitePreferenceStore {
    fn get(&self, key: &PreferenceKey) -> Result<Option<Preference>, CacheError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT preference FROM preference_cache WHERE key_hash = ?1")?;
            let mut rows = stmt.query(params![key.key_hash])?;
            if let Some(row) = rows.next()? {
                let value: f64 = row.get(0)?;
                conn.execute(
                    "UPDATE preference_cache \
                     SET hit_count = hit_count + 1, updated_at = ?1 \
                     WHERE key_hash = ?2",
                    params![now_epoch(), key.key_hash],
                )?;
                Ok(Some(value))
            } else {
                Ok(None)
            }
        })
    }

    fn put(&self, key: &PreferenceKey, value: Preference) -> Result<(), CacheError> {
        self.with_conn(|conn| {
            let now = now_epoch();
            conn.execute(
                "INSERT INTO preference_cache ( \
                    key_hash, namespace, input_key, output_a_id, output_b_id, \
                    preference, created_at, updated_at \
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(key_hash) DO UPDATE SET \
                    preference = excluded.preference, \
                    updated_at = excluded.updated_at",
                params![
                    key.key_hash,
                    key.namespace,
                    key.input_key,
                    key.output_a_id,
                    key.output_b_id,
                    value,
                    now,
                    now,
                ],
            )?;
            Ok(())
        })
    }
}

#[derive(Debug)]
pub struct CacheLock {
    _file: std::fs::File,
}

impl CacheLock {
    fn new(db_path: &Path) -> Result<Self, CacheError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

#[derive(Debug, Serialize)]
pub struct CacheExportRow {
    pub key_hash: String,
    pub namespace: String,
    pub input_key: String,
    pub output_a_id: String,
    pub output_b_id: String,
    pub preference: f64,
    pub created_at: i64,
    pub updated_at: i64,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePruneStats {
    pub deleted: usize,
    pub remaining: usize,
}

impl SqlitePreferenceStore {
    pub fn export_jsonl(&self, path: impl AsRef<Path>) -> Result<usize, CacheError> {
        let path = path.as_ref().to_path_buf();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key_hash, namespace, input_key, output_a_id, output_b_id, \
                        preference, created_at, updated_at, hit_count \
                 FROM preference_cache ORDER BY updated_at DESC",
            )?;
            let mut rows = stmt.query([])?;
            let mut file = std::fs::File::create(path)?;
            let mut written = 0usize;
            while let Some(row) = rows.next()? {
                let record = CacheExportRow {
                    key_hash: row.get(0)?,
                    namespace: row.get(1)?,
                    input_key: row.get(2)?,
                    output_a_id: row.get(3)?,
                    output_b_id: row.get(4)?,
                    preference: row.get(5)?,
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                    hit_count: row.get(8)?,
                };
                let line =
                    serde_json::to_string(&record).map_err(|e| CacheError::Serde(e.to_string()))?;
                use std::io::Write;
                writeln!(file, "{line}")?;
                written += 1;
            }
            Ok(written)
        })
    }

    pub fn prune(
        &self,
        max_age_days: Option<u64>,
        max_rows: Option<usize>,
    ) -> Result<CachePruneStats, CacheError> {
        self.with_conn(|conn| {
            let mut deleted: usize = 0;
            if let Some(days) = max_age_days {
                let cutoff = now_epoch().saturating_sub((days as i64).saturating_mul(86_400));
                let removed = conn.execute(
                    "DELETE FROM preference_cache WHERE updated_at < ?1",
                    params![cutoff],
                )?;
                deleted = deleted.saturating_add(removed);
            }

            if let Some(max_rows) = max_rows {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM preference_cache", [], |row| {
                        row.get(0)
                    })?;
                let keep = max_rows as i64;
                if count > keep {
                    let removed = conn.execute(
                        "DELETE FROM preference_cache WHERE key_hash IN ( \
                            SELECT key_hash FROM preference_cache \
                            ORDER BY updated_at DESC LIMIT -1 OFFSET ?1 \
                         )",
                        params![keep],
                    )?;
                    deleted = deleted.saturating_add(removed);
                }
            }

            let remaining: i64 =
                conn.query_row("SELECT COUNT(*) FROM preference_cache", [], |row| row.get(0))?;
            Ok(CachePruneStats {
                deleted,
                remaining: remaining.max(0) as usize,
            })
        })
    }
}

// =============================================================================
// Caching axiom wrapper
// =============================================================================

/// Counters for a [`CachedAxiom`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Served directly from the store.
    pub hits: usize,
    /// Served by negating the swapped comparison.
    pub derived: usize,
    /// Computed by the wrapped axiom.
    pub misses: usize,
}

/// Memoizing wrapper around an axiom.
///
/// Lookups for `(input, a, b)` fall back to `-(input, b, a)` only when the
/// wrapped axiom declares itself [`Symmetry::Antisymmetric`]; the derived
/// value is written through under `(input, a, b)`.
pub struct CachedAxiom<I: Sync, O: Sync> {
    inner: AxiomRef<I, O>,
    store: Arc<dyn PreferenceStore>,
    namespace: String,
    hits: AtomicUsize,
    derived: AtomicUsize,
    misses: AtomicUsize,
}

impl<I, O> CachedAxiom<I, O>
where
    I: CacheInput + Sync + 'static,
    O: Identified + Sync + 'static,
{
    /// Cache under the wrapped axiom's name.
    pub fn new(inner: AxiomRef<I, O>, store: Arc<dyn PreferenceStore>) -> Self {
        let namespace = inner.name();
        Self::with_namespace(inner, store, namespace)
    }

    /// Cache under an explicit namespace, for axioms whose names are not unique
    /// within the store.
    pub fn with_namespace(
        inner: AxiomRef<I, O>,
        store: Arc<dyn PreferenceStore>,
        namespace: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        Self {
            inner,
            store,
            namespace,
            hits: AtomicUsize::new(0),
            derived: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Wrap `axiom` unless it already memoizes its preferences.
    pub fn wrap(axiom: AxiomRef<I, O>, store: Arc<dyn PreferenceStore>) -> AxiomRef<I, O> {
        if axiom.is_cached() {
            return axiom;
        }
        debug!(axiom = %axiom.name(), "wrapping axiom with preference cache");
        Arc::new(Self::new(axiom, store))
    }
}

impl<I: Sync, O: Sync> CachedAxiom<I, O> {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            derived: self.derived.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, key: &PreferenceKey) -> Option<Preference> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, key = %key.key_hash, "Cache read failed; recomputing");
                None
            }
        }
    }

    fn remember(&self, key: &PreferenceKey, value: Preference) {
        if let Err(err) = self.store.put(key, value) {
            warn!(error = %err, key = %key.key_hash, "Cache write failed");
        }
    }
}

impl<I: Sync, O: Sync> fmt::Debug for CachedAxiom<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedAxiom")
            .field("namespace", &self.namespace)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<I, O> Axiom<I, O> for CachedAxiom<I, O>
where
    I: CacheInput + Sync,
    O: Identified + Sync,
{
    fn preference(&self, input: &I, a: &O, b: &O) -> Result<Preference, AxiomError> {
        let key = PreferenceKey::new(&self.namespace, &input.cache_key(), a.id(), b.id());
        if let Some(value) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        if self.inner.symmetry().is_antisymmetric() {
            if let Some(value) = self.lookup(&key.reversed()) {
                self.derived.fetch_add(1, Ordering::Relaxed);
                let value = -value;
                self.remember(&key, value);
                return Ok(value);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = self.inner.preference(input, a, b)?;
        self.remember(&key, value);
        Ok(value)
    }

    fn name(&self) -> String {
        self.inner.name()
    }

    fn symmetry(&self) -> Symmetry {
        self.inner.symmetry()
    }

    fn is_cached(&self) -> bool {
        true
    }
}

fn hash_fields(fields: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in fields {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axiom::{compare_ids, AxiomExpr, StrictlyGreater};
    use crate::types::RankedDocument;

    struct CountingAxiom {
        calls: Arc<AtomicUsize>,
        symmetry: Symmetry,
    }

    impl Axiom<String, RankedDocument> for CountingAxiom {
        fn preference(
            &self,
            _input: &String,
            a: &RankedDocument,
            b: &RankedDocument,
        ) -> Result<Preference, AxiomError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(b.rank as f64 - a.rank as f64)
        }

        fn name(&self) -> String {
            "RANK_GAP".to_string()
        }

        fn symmetry(&self) -> Symmetry {
            self.symmetry
        }
    }

    fn counting(symmetry: Symmetry) -> (Arc<AtomicUsize>, AxiomRef<String, RankedDocument>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let axiom = Arc::new(CountingAxiom {
            calls: Arc::clone(&calls),
            symmetry,
        });
        (calls, axiom)
    }

    #[test]
    fn preference_key_depends_on_order_and_namespace() {
        let ab = PreferenceKey::new("TFC1", "q1", "a", "b");
        let ba = PreferenceKey::new("TFC1", "q1", "b", "a");
        let other = PreferenceKey::new("LNC1", "q1", "a", "b");
        assert_ne!(ab.key_hash, ba.key_hash);
        assert_ne!(ab.key_hash, other.key_hash);
        assert_eq!(ab.reversed(), ba);
        assert_eq!(ab, PreferenceKey::new("TFC1", "q1", "a", "b"));
    }

    #[test]
    fn cached_axiom_reuses_and_negates_antisymmetric_entries() {
        let (calls, axiom) = counting(Symmetry::Antisymmetric);
        let store = Arc::new(MemoryPreferenceStore::new());
        let cached = CachedAxiom::new(axiom, store.clone());
        let q = "q".to_string();
        let a = RankedDocument::new("a", 1, 0.0);
        let b = RankedDocument::new("b", 3, 0.0);

        assert_eq!(cached.preference(&q, &a, &b).unwrap(), 2.0);
        assert_eq!(cached.preference(&q, &a, &b).unwrap(), 2.0);
        assert_eq!(cached.preference(&q, &b, &a).unwrap(), -2.0);
        assert_eq!(cached.preference(&q, &b, &a).unwrap(), -2.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cached.stats(),
            CacheStats {
                hits: 2,
                derived: 1,
                misses: 1
            }
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn cached_axiom_does_not_derive_for_unknown_symmetry() {
        let (calls, axiom) = counting(Symmetry::Unknown);
        let cached = CachedAxiom::new(axiom, Arc::new(MemoryPreferenceStore::new()));
        let q = "q".to_string();
        let a = RankedDocument::new("a", 1, 0.0);
        let b = RankedDocument::new("b", 3, 0.0);

        cached.preference(&q, &a, &b).unwrap();
        cached.preference(&q, &b, &a).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cached.stats().derived, 0);
    }

    #[test]
    fn wrap_is_idempotent() {
        let store: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::new());
        let expr: AxiomExpr<String, RankedDocument> =
            AxiomExpr::leaf(StrictlyGreater::new("ID", compare_ids::<RankedDocument>));
        let once = expr.cached(Arc::clone(&store));
        let once_ref = once.clone().into_ref();
        let twice_ref = once.cached(Arc::clone(&store)).into_ref();
        assert!(once_ref.is_cached());
        assert!(Arc::ptr_eq(&once_ref, &twice_ref));
        assert_eq!(once_ref.name(), "ID");
    }

    #[test]
    fn namespaces_separate_axioms_with_the_same_name() {
        let store: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::new());
        let by_score: AxiomRef<String, RankedDocument> = Arc::new(StrictlyGreater::new(
            "SCORE",
            |a: &RankedDocument, b: &RankedDocument| a.score.partial_cmp(&b.score),
        ));
        let by_rank: AxiomRef<String, RankedDocument> = Arc::new(StrictlyGreater::new(
            "SCORE",
            |a: &RankedDocument, b: &RankedDocument| b.rank.partial_cmp(&a.rank),
        ));
        let q = "q".to_string();
        let a = RankedDocument::new("a", 1, 0.1);
        let b = RankedDocument::new("b", 2, 0.9);

        let score = CachedAxiom::with_namespace(by_score.clone(), Arc::clone(&store), "SCORE/retrieval");
        let rank = CachedAxiom::with_namespace(by_rank.clone(), Arc::clone(&store), "SCORE/rank");
        assert_eq!(score.preference(&q, &a, &b).unwrap(), -1.0);
        assert_eq!(rank.preference(&q, &a, &b).unwrap(), 1.0);
        assert_eq!(rank.name(), "SCORE");
        assert_eq!(rank.namespace(), "SCORE/rank");

        // Under the shared display name the second axiom reads the first one's entry.
        let shared_store: Arc<dyn PreferenceStore> = Arc::new(MemoryPreferenceStore::new());
        let first = CachedAxiom::new(by_score, Arc::clone(&shared_store));
        let second = CachedAxiom::new(by_rank, shared_store);
        assert_eq!(first.preference(&q, &a, &b).unwrap(), -1.0);
        assert_eq!(second.preference(&q, &a, &b).unwrap(), -1.0);
    }

    #[test]
    fn errors_from_wrapped_axiom_are_not_cached() {
        struct Failing;
        impl Axiom<String, RankedDocument> for Failing {
            fn preference(
                &self,
                _input: &String,
                _a: &RankedDocument,
                _b: &RankedDocument,
            ) -> Result<Preference, AxiomError> {
                Err(AxiomError::Collaborator {
                    axiom: "FAIL".to_string(),
                    message: "similarity model unavailable".to_string(),
                })
            }

            fn name(&self) -> String {
                "FAIL".to_string()
            }
        }

        let store = Arc::new(MemoryPreferenceStore::new());
        let cached = CachedAxiom::new(Arc::new(Failing), store.clone());
        let a = RankedDocument::new("a", 1, 0.0);
        let b = RankedDocument::new("b", 2, 0.0);
        assert!(cached.preference(&"q".to_string(), &a, &b).is_err());
        assert!(store.is_empty());
    }
}

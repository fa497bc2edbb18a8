//! SQLite-backed implementation of the embedded state store.
//!
//! Each `Record` collection gets two tables: `{collection}` holding the
//! canonical JSON blob per id, and `{collection}__index` mirroring the
//! record's `indexed_fields()` as (id, field, value) rows so equality
//! filters don't require a full table scan + deserialize. The index table
//! is fully derived from the blob table and can always be rebuilt with
//! `rebuild_indexes`.
//!
//! Opened in WAL journal mode with a busy timeout so concurrent readers
//! never block behind a writer, matching the concurrency discipline the
//! rest of the system assumes.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{StoreError, StoreResult};
use crate::filter::{Filter, FilterOp, IndexValue};
use crate::{Record, now_ms};

const BUSY_TIMEOUT_MS: u64 = 5_000;
const LOCK_DEADLINE: Duration = Duration::from_secs(5);

/// A handle to one workspace's (or the global index's) embedded database.
///
/// Holds the connection behind a `Mutex` rather than requiring `&mut self`
/// on every call: callers that want exclusive ownership (e.g. the state
/// actor) can still wrap a `Store` in a single task, but the type itself
/// stays `Send + Sync` so it can also back read-mostly query paths.
pub struct Store {
    conn: Mutex<Connection>,
    mirror_path: PathBuf,
}

impl Store {
    /// Open (creating if necessary) the database at `db_path`. `db_path`'s
    /// parent directory is used to locate the legacy JSON mirror file
    /// (`<same-stem>.json`).
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;

        let mirror_path = db_path.with_extension("json");
        Ok(Self {
            conn: Mutex::new(conn),
            mirror_path,
        })
    }

    /// Like [`Store::open`], but with an explicit mirror path instead of the
    /// `<same-stem>.json` default. Callers whose legacy mirror filename is
    /// fixed by an external contract (the workspace `GLOBAL_REGISTRY.json`,
    /// a per-task `AGENT_REGISTRY.json`) use this instead.
    pub fn open_with_mirror(db_path: &Path, mirror_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = mirror_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;

        Ok(Self {
            conn: Mutex::new(conn),
            mirror_path: mirror_path.to_path_buf(),
        })
    }

    /// In-memory store, useful for tests that don't need a durable mirror.
    /// The mirror still lands on disk (under the OS temp directory, one
    /// file per process) since the mirror-write path always goes through
    /// the advisory-lock machinery.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        let mirror_path = std::env::temp_dir().join(format!("store-inmem-{}.json", std::process::id()));
        Ok(Self {
            conn: Mutex::new(conn),
            mirror_path,
        })
    }

    fn ensure_tables(conn: &Connection, collection: &'static str) -> StoreResult<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{collection}\" (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS \"{collection}__index\" (
                id TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (id, field)
            );
            CREATE INDEX IF NOT EXISTS \"{collection}__index_field_value\"
                ON \"{collection}__index\" (field, value);"
        ))?;
        Ok(())
    }

    fn write_index(conn: &Connection, collection: &'static str, record: &impl Record) -> StoreResult<()> {
        conn.execute(&format!("DELETE FROM \"{collection}__index\" WHERE id = ?1"), params![record.id()])?;
        for (field, value) in record.indexed_fields() {
            conn.execute(
                &format!("INSERT INTO \"{collection}__index\" (id, field, value) VALUES (?1, ?2, ?3)"),
                params![record.id(), field, value.as_sql_text()],
            )?;
        }
        Ok(())
    }

    /// Insert a new record. Fails loudly (via the underlying PRIMARY KEY
    /// constraint) if the id already exists; callers that want upsert
    /// semantics should use `update`.
    pub fn create<R: Record>(&self, record: &R) -> StoreResult<()> {
        let collection = R::collection_name();
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::ensure_tables(&conn, collection)?;

        let data = serde_json::to_string(record)?;
        conn.execute(
            &format!("INSERT INTO \"{collection}\" (id, data, updated_at) VALUES (?1, ?2, ?3)"),
            params![record.id(), data, record.updated_at()],
        )?;
        Self::write_index(&conn, collection, record)?;
        drop(conn);
        self.mirror_upsert(collection, record.id(), record)?;
        Ok(())
    }

    pub fn get<R: Record>(&self, id: &str) -> StoreResult<Option<R>> {
        let collection = R::collection_name();
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::ensure_tables(&conn, collection)?;

        let data: Option<String> = conn
            .query_row(&format!("SELECT data FROM \"{collection}\" WHERE id = ?1"), params![id], |row| {
                row.get(0)
            })
            .optional()?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Upsert. Used for both "update an existing record" and "create or
    /// replace" call sites; the actor layer distinguishes intent, the store
    /// does not need to.
    pub fn update<R: Record>(&self, record: &R) -> StoreResult<()> {
        let collection = R::collection_name();
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::ensure_tables(&conn, collection)?;

        let data = serde_json::to_string(record)?;
        conn.execute(
            &format!(
                "INSERT INTO \"{collection}\" (id, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at"
            ),
            params![record.id(), data, record.updated_at()],
        )?;
        Self::write_index(&conn, collection, record)?;
        drop(conn);
        self.mirror_upsert(collection, record.id(), record)?;
        Ok(())
    }

    pub fn delete<R: Record>(&self, id: &str) -> StoreResult<()> {
        let collection = R::collection_name();
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::ensure_tables(&conn, collection)?;
        conn.execute(&format!("DELETE FROM \"{collection}\" WHERE id = ?1"), params![id])?;
        conn.execute(&format!("DELETE FROM \"{collection}__index\" WHERE id = ?1"), params![id])?;
        drop(conn);
        self.mirror_remove(collection, id)?;
        Ok(())
    }

    /// Delete every record in `R`'s collection whose indexed `field` equals
    /// `value`. Used for cascade deletes (e.g. removing a loop execution's
    /// iteration logs). Returns the number of rows removed.
    pub fn delete_by_index<R: Record>(&self, field: &str, value: &IndexValue) -> StoreResult<usize> {
        let matches = self.list::<R>(&[Filter::eq(field, value.clone())])?;
        for record in &matches {
            self.delete::<R>(record.id())?;
        }
        Ok(matches.len())
    }

    /// List all records matching every filter (conjunction). An empty
    /// filter list returns the whole collection.
    pub fn list<R: Record>(&self, filters: &[Filter]) -> StoreResult<Vec<R>> {
        let collection = R::collection_name();
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::ensure_tables(&conn, collection)?;

        let ids = if filters.is_empty() {
            let mut stmt = conn.prepare(&format!("SELECT id FROM \"{collection}\""))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        } else {
            let mut candidate: Option<std::collections::HashSet<String>> = None;
            for filter in filters {
                if filter.op != FilterOp::Eq {
                    return Err(StoreError::Unimplemented("only equality filters are supported"));
                }
                let mut stmt = conn.prepare(&format!(
                    "SELECT id FROM \"{collection}__index\" WHERE field = ?1 AND value = ?2"
                ))?;
                let rows = stmt.query_map(params![filter.field, filter.value.as_sql_text()], |row| {
                    row.get::<_, String>(0)
                })?;
                let matched: std::collections::HashSet<String> = rows.collect::<Result<_, _>>()?;

                candidate = Some(match candidate {
                    None => matched,
                    Some(existing) => existing.intersection(&matched).cloned().collect(),
                });
            }
            candidate.unwrap_or_default().into_iter().collect()
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let data: String = conn.query_row(&format!("SELECT data FROM \"{collection}\" WHERE id = ?1"), params![id], |row| {
                row.get(0)
            })?;
            records.push(serde_json::from_str(&data)?);
        }
        Ok(records)
    }

    /// Rebuild the index table for `R`'s collection from its blob table.
    /// Idempotent; safe to call after a crash or a bulk `reconcile`.
    pub fn rebuild_indexes<R: Record>(&self) -> StoreResult<()> {
        let collection = R::collection_name();
        let conn = self.conn.lock().expect("store mutex poisoned");
        Self::ensure_tables(&conn, collection)?;

        conn.execute(&format!("DELETE FROM \"{collection}__index\""), [])?;
        let mut stmt = conn.prepare(&format!("SELECT data FROM \"{collection}\""))?;
        let blobs: Vec<String> = stmt.query_map([], |row| row.get(0))?.collect::<Result<_, _>>()?;
        drop(stmt);

        for blob in blobs {
            let record: R = serde_json::from_str(&blob)?;
            Self::write_index(&conn, collection, &record)?;
        }
        Ok(())
    }

    /// Flush WAL contents into the main database file. Called at shutdown
    /// and can be invoked periodically by a long-lived actor.
    pub fn sync(&self) -> StoreResult<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
        Ok(())
    }

    fn mirror_upsert<R: Record>(&self, collection: &'static str, id: &str, record: &R) -> StoreResult<()> {
        crate::lock::with_file_lock(&self.mirror_path, crate::lock::LockMode::Exclusive, LOCK_DEADLINE, |file| {
            let mut mirror = read_mirror(file)?;
            let entry = mirror.entry(collection.to_string()).or_insert_with(serde_json::Map::new);
            entry.insert(id.to_string(), serde_json::to_value(record)?);
            write_mirror(file, &mirror)
        })
    }

    fn mirror_remove(&self, collection: &'static str, id: &str) -> StoreResult<()> {
        crate::lock::with_file_lock(&self.mirror_path, crate::lock::LockMode::Exclusive, LOCK_DEADLINE, |file| {
            let mut mirror = read_mirror(file)?;
            if let Some(entry) = mirror.get_mut(collection) {
                entry.remove(id);
            }
            write_mirror(file, &mirror)
        })
    }

    /// Rebuild every known collection's index, then touch `updated_at` on
    /// the mirror. `reconcile` is the crash-recovery path: rebuild the
    /// sqlite state from the JSON mirror plus JSONL audit files when the
    /// database file itself is missing or corrupt.
    pub fn reconcile_from_mirror<R: Record>(&self) -> StoreResult<usize> {
        let mirror = crate::lock::with_file_lock(&self.mirror_path, crate::lock::LockMode::Shared, LOCK_DEADLINE, |file| {
            read_mirror(file)
        })?;

        let collection = R::collection_name();
        let Some(entries) = mirror.get(collection) else {
            return Ok(0);
        };

        let mut restored = 0;
        for value in entries.values() {
            let record: R = serde_json::from_value(value.clone())?;
            self.update(&record)?;
            restored += 1;
        }
        Ok(restored)
    }
}

type Mirror = serde_json::Map<String, serde_json::Value>;

fn read_mirror(file: &mut std::fs::File) -> StoreResult<Mirror> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(0))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    if content.trim().is_empty() {
        return Ok(Mirror::new());
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_mirror(file: &mut std::fs::File, mirror: &Mirror) -> StoreResult<()> {
    use std::io::{Seek, SeekFrom, Write};
    let content = serde_json::to_string_pretty(mirror)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Stamp `updated_at` to the current time; a small helper so record
/// constructors across the crate don't each re-implement the same call.
pub fn touch() -> i64 {
    now_ms()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
    struct Widget {
        id: String,
        color: String,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut m = HashMap::new();
            m.insert("color".to_string(), IndexValue::String(self.color.clone()));
            m
        }
    }

    fn widget(id: &str, color: &str) -> Widget {
        Widget {
            id: id.to_string(),
            color: color.to_string(),
            updated_at: now_ms(),
        }
    }

    #[test]
    fn create_and_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let w = widget("w1", "red");
        store.create(&w).unwrap();
        let fetched: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(fetched, w);
    }

    #[test]
    fn get_missing_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get::<Widget>("nope").unwrap().is_none());
    }

    #[test]
    fn list_filters_by_index() {
        let store = Store::open_in_memory().unwrap();
        store.create(&widget("w1", "red")).unwrap();
        store.create(&widget("w2", "blue")).unwrap();
        store.create(&widget("w3", "red")).unwrap();

        let reds = store.list::<Widget>(&[Filter::eq("color", IndexValue::String("red".into()))]).unwrap();
        assert_eq!(reds.len(), 2);
    }

    #[test]
    fn update_changes_index() {
        let store = Store::open_in_memory().unwrap();
        store.create(&widget("w1", "red")).unwrap();
        store.update(&widget("w1", "blue")).unwrap();

        let reds = store.list::<Widget>(&[Filter::eq("color", IndexValue::String("red".into()))]).unwrap();
        assert!(reds.is_empty());
        let blues = store.list::<Widget>(&[Filter::eq("color", IndexValue::String("blue".into()))]).unwrap();
        assert_eq!(blues.len(), 1);
    }

    #[test]
    fn delete_removes_record_and_index() {
        let store = Store::open_in_memory().unwrap();
        store.create(&widget("w1", "red")).unwrap();
        store.delete::<Widget>("w1").unwrap();
        assert!(store.get::<Widget>("w1").unwrap().is_none());
        assert!(store.list::<Widget>(&[Filter::eq("color", IndexValue::String("red".into()))]).unwrap().is_empty());
    }

    #[test]
    fn delete_by_index_cascades() {
        let store = Store::open_in_memory().unwrap();
        store.create(&widget("w1", "red")).unwrap();
        store.create(&widget("w2", "red")).unwrap();
        store.create(&widget("w3", "blue")).unwrap();

        let removed = store.delete_by_index::<Widget>("color", &IndexValue::String("red".into())).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list::<Widget>(&[]).unwrap().len(), 1);
    }

    #[test]
    fn rebuild_indexes_restores_filterability() {
        let store = Store::open_in_memory().unwrap();
        store.create(&widget("w1", "red")).unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute("DELETE FROM \"widgets__index\"", []).unwrap();
        }
        assert!(store.list::<Widget>(&[Filter::eq("color", IndexValue::String("red".into()))]).unwrap().is_empty());

        store.rebuild_indexes::<Widget>().unwrap();
        assert_eq!(store.list::<Widget>(&[Filter::eq("color", IndexValue::String("red".into()))]).unwrap().len(), 1);
    }
}

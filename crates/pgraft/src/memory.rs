//! An in-memory [`GraphStore`] with real transaction semantics.
//!
//! Backs the test suite and works for prototyping without a database. Writes
//! stage inside the transaction and only land on commit; keys are burned
//! eagerly like a database sequence, so a rolled-back transaction leaves a
//! gap. Unique constraints can be declared per column to provoke mid-flight
//! insert failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{GraftError, GraftResult};
use crate::store::{GraphStore, GraphTransaction};
use crate::value::Value;

/// A row as the memory store keeps it.
pub type MemRow = BTreeMap<String, Value>;

#[derive(Debug)]
struct MemTable {
    rows: Vec<MemRow>,
    next_key: i64,
}

impl Default for MemTable {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            next_key: 1,
        }
    }
}

impl MemTable {
    fn assign_key(&mut self) -> i64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    fn advance_past(&mut self, key: i64) {
        if key >= self.next_key {
            self.next_key = key + 1;
        }
    }
}

#[derive(Debug, Default)]
struct MemInner {
    tables: HashMap<String, MemTable>,
    unique: Vec<(String, String)>,
    log: Vec<(String, Value)>,
}

/// Shareable in-memory database. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare a unique constraint, enforced on insert.
    pub fn add_unique(&self, table: impl Into<String>, column: impl Into<String>) {
        self.lock().unique.push((table.into(), column.into()));
    }

    /// Insert a committed row directly, outside any transaction. The key
    /// goes into the `id` column and is returned.
    pub fn seed<'a>(
        &self,
        table: &str,
        row: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Value {
        let mut inner = self.lock();
        let slot = inner.tables.entry(table.to_string()).or_default();
        let key = slot.assign_key();
        let mut committed: MemRow = row.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        committed.insert("id".to_string(), Value::Int(key));
        slot.rows.push(committed);
        Value::Int(key)
    }

    /// Number of committed rows in `table`.
    pub fn count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// All committed rows of `table`, in commit order.
    pub fn rows(&self, table: &str) -> Vec<MemRow> {
        self.lock()
            .tables
            .get(table)
            .map_or_else(Vec::new, |t| t.rows.clone())
    }

    /// The committed row of `table` whose `id` equals `key`.
    pub fn find(&self, table: &str, key: &Value) -> Option<MemRow> {
        self.lock()
            .tables
            .get(table)
            .and_then(|t| t.rows.iter().find(|r| r.get("id") == Some(key)).cloned())
    }

    /// One entry per committed insert, in execution order. Rows inserted
    /// without a key column (join rows) log a null key.
    pub fn insert_log(&self) -> Vec<(String, Value)> {
        self.lock().log.clone()
    }
}

#[derive(Debug)]
struct StagedUpdate {
    table: String,
    key_column: String,
    key: Value,
    changes: MemRow,
}

/// Writes staged by one transaction, applied on commit.
#[derive(Debug)]
pub struct MemTransaction {
    store: MemoryStore,
    staged: Vec<(String, MemRow)>,
    updates: Vec<StagedUpdate>,
    log: Vec<(String, Value)>,
}

impl MemTransaction {
    fn check_unique(&self, table: &str, row: &MemRow) -> GraftResult<()> {
        let inner = self.store.lock();
        for (t, column) in &inner.unique {
            if t != table {
                continue;
            }
            let Some(value) = row.get(column) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let committed = inner
                .tables
                .get(table)
                .is_some_and(|mt| mt.rows.iter().any(|r| r.get(column) == Some(value)));
            let staged = self
                .staged
                .iter()
                .any(|(st, sr)| st == table && sr.get(column) == Some(value));
            if committed || staged {
                return Err(GraftError::UniqueViolation(format!(
                    "duplicate value for {table}.{column}"
                )));
            }
        }
        Ok(())
    }
}

impl GraphStore for MemoryStore {
    type Tx<'a> = MemTransaction;

    async fn begin(&mut self) -> GraftResult<MemTransaction> {
        Ok(MemTransaction {
            store: self.clone(),
            staged: Vec::new(),
            updates: Vec::new(),
            log: Vec::new(),
        })
    }
}

impl GraphTransaction for MemTransaction {
    async fn insert_returning(
        &mut self,
        table: &str,
        key_column: Option<&str>,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> GraftResult<Vec<Value>> {
        tracing::trace!(table, rows = rows.len(), "staging insert");
        let mut keys = Vec::new();
        for values in rows {
            let mut row: MemRow = columns.iter().cloned().zip(values).collect();
            let key = {
                let mut inner = self.store.lock();
                let slot = inner.tables.entry(table.to_string()).or_default();
                match key_column {
                    Some(kc) => match row.get(kc) {
                        Some(Value::Int(provided)) => {
                            let provided = *provided;
                            slot.advance_past(provided);
                            Some(Value::Int(provided))
                        }
                        Some(v) if !v.is_null() => Some(v.clone()),
                        _ => Some(Value::Int(slot.assign_key())),
                    },
                    None => None,
                }
            };
            if let (Some(kc), Some(k)) = (key_column, &key) {
                row.insert(kc.to_string(), k.clone());
            }
            self.check_unique(table, &row)?;
            self.log
                .push((table.to_string(), key.clone().unwrap_or(Value::Null)));
            self.staged.push((table.to_string(), row));
            if let Some(k) = key {
                keys.push(k);
            }
        }
        Ok(keys)
    }

    async fn update_by_key(
        &mut self,
        table: &str,
        key_column: &str,
        key: &Value,
        columns: &[String],
        values: Vec<Value>,
    ) -> GraftResult<()> {
        tracing::trace!(table, "staging update");
        let changes: MemRow = columns.iter().cloned().zip(values).collect();

        if let Some((_, row)) = self
            .staged
            .iter_mut()
            .find(|(t, r)| t.as_str() == table && r.get(key_column) == Some(key))
        {
            row.extend(changes);
            return Ok(());
        }

        let exists = {
            let inner = self.store.lock();
            inner
                .tables
                .get(table)
                .is_some_and(|mt| mt.rows.iter().any(|r| r.get(key_column) == Some(key)))
        };
        if !exists {
            return Err(GraftError::storage(format!(
                "no row in '{table}' with {key_column} = {key}"
            )));
        }
        self.updates.push(StagedUpdate {
            table: table.to_string(),
            key_column: key_column.to_string(),
            key: key.clone(),
            changes,
        });
        Ok(())
    }

    async fn commit(self) -> GraftResult<()> {
        let mut inner = self.store.lock();
        for (table, row) in self.staged {
            inner.tables.entry(table).or_default().rows.push(row);
        }
        for update in self.updates {
            let found = inner.tables.get_mut(&update.table).and_then(|mt| {
                mt.rows
                    .iter_mut()
                    .find(|r| r.get(&update.key_column) == Some(&update.key))
            });
            match found {
                Some(row) => row.extend(update.changes),
                None => {
                    return Err(GraftError::storage(format!(
                        "no row in '{}' with {} = {}",
                        update.table, update.key_column, update.key
                    )));
                }
            }
        }
        inner.log.extend(self.log);
        Ok(())
    }

    async fn rollback(self) -> GraftResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn writes_land_only_on_commit() {
        let mut store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let keys = tx
            .insert_returning(
                "person",
                Some("id"),
                &cols(&["name"]),
                vec![vec![Value::Text("Anna".into())]],
            )
            .await
            .unwrap();
        assert_eq!(keys, vec![Value::Int(1)]);
        assert_eq!(store.count("person"), 0);

        tx.commit().await.unwrap();
        assert_eq!(store.count("person"), 1);
        let row = store.find("person", &Value::Int(1)).unwrap();
        assert_eq!(row.get("name"), Some(&Value::Text("Anna".into())));
    }

    #[tokio::test]
    async fn rollback_discards_rows_but_burns_keys() {
        let mut store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_returning(
            "person",
            Some("id"),
            &cols(&["name"]),
            vec![vec![Value::Text("ghost".into())]],
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.count("person"), 0);

        let mut tx = store.begin().await.unwrap();
        let keys = tx
            .insert_returning(
                "person",
                Some("id"),
                &cols(&["name"]),
                vec![vec![Value::Text("real".into())]],
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(keys, vec![Value::Int(2)]);
    }

    #[tokio::test]
    async fn unique_constraints_hit_committed_and_staged_rows() {
        let mut store = MemoryStore::new();
        store.add_unique("person", "name");
        store.seed("person", [("name", Value::Text("Anna".into()))]);

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_returning(
                "person",
                Some("id"),
                &cols(&["name"]),
                vec![vec![Value::Text("Anna".into())]],
            )
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        tx.insert_returning(
            "person",
            Some("id"),
            &cols(&["name"]),
            vec![vec![Value::Text("Ben".into())]],
        )
        .await
        .unwrap();
        let err = tx
            .insert_returning(
                "person",
                Some("id"),
                &cols(&["name"]),
                vec![vec![Value::Text("Ben".into())]],
            )
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn updates_reach_staged_and_committed_rows() {
        let mut store = MemoryStore::new();
        let key = store.seed("animal", [("name", Value::Text("Rex".into()))]);

        let mut tx = store.begin().await.unwrap();
        tx.update_by_key(
            "animal",
            "id",
            &key,
            &cols(&["owner_id"]),
            vec![Value::Int(9)],
        )
        .await
        .unwrap();
        // Still unchanged before commit.
        assert_eq!(
            store.find("animal", &key).unwrap().get("owner_id"),
            None
        );
        tx.commit().await.unwrap();
        assert_eq!(
            store.find("animal", &key).unwrap().get("owner_id"),
            Some(&Value::Int(9))
        );

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .update_by_key(
                "animal",
                "id",
                &Value::Int(99),
                &cols(&["owner_id"]),
                vec![Value::Int(1)],
            )
            .await
            .unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn join_rows_log_without_keys() {
        let mut store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let keys = tx
            .insert_returning(
                "person_movie",
                None,
                &cols(&["person_id", "movie_id"]),
                vec![vec![Value::Int(1), Value::Int(2)]],
            )
            .await
            .unwrap();
        assert!(keys.is_empty());
        tx.commit().await.unwrap();
        assert_eq!(
            store.insert_log(),
            vec![("person_movie".to_string(), Value::Null)]
        );
    }
}

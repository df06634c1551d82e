//! In-memory reference implementation of the state index.
//!
//! A real deployment backs this with a relational store reached over
//! the network; this implementation is what `phobos-tests` and the
//! core's own unit tests run against, with no external service
//! required.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{PhoError, PhoResult};
use crate::index::filter::Filter;
use crate::model::Lock;

/// A row type the index can store: must be able to describe itself as a
/// flat JSON attribute map for [`Filter`] evaluation.
pub trait IndexRow: Clone + Send + Sync {
    fn attrs(&self) -> Value;
}

struct Entry<T> {
    row: T,
    lock: Option<Lock>,
}

/// An in-memory, mutex-guarded table of rows of one type, keyed by a
/// caller-chosen string id (the row's natural key — `oid`, `MediumId`
/// display form, `DeviceId` display form, …).
pub struct StateIndex<T> {
    rows: Mutex<HashMap<String, Entry<T>>>,
}

impl<T> Default for StateIndex<T> {
    fn default() -> Self {
        StateIndex {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: IndexRow> StateIndex<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, row: T) -> PhoResult<()> {
        let id = id.into();
        let mut rows = self.rows.lock();
        if rows.contains_key(&id) {
            return Err(PhoError::AlreadyExists(id));
        }
        rows.insert(id, Entry { row, lock: None });
        Ok(())
    }

    /// Applies `f` to the row at `id` in place. `f` is expected to only
    /// touch the fields it means to change, standing in for the
    /// `fields_mask` the real store's `update` takes.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut T)) -> PhoResult<()> {
        let mut rows = self.rows.lock();
        let entry = rows
            .get_mut(id)
            .ok_or_else(|| PhoError::NotFound(id.to_string()))?;
        f(&mut entry.row);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> PhoResult<()> {
        let mut rows = self.rows.lock();
        rows.remove(id)
            .map(|_| ())
            .ok_or_else(|| PhoError::NotFound(id.to_string()))
    }

    pub fn get(&self, filter: &Filter) -> Vec<T> {
        self.rows
            .lock()
            .values()
            .filter(|e| filter.eval(&e.row.attrs()))
            .map(|e| e.row.clone())
            .collect()
    }

    pub fn get_one(&self, id: &str) -> Option<T> {
        self.rows.lock().get(id).map(|e| e.row.clone())
    }

    /// Acquires `hostname`/`owner_pid`'s lock on every row in `ids`, or
    /// none of them: the set is checked against the current lock state
    /// first, and only committed once every row is confirmed free or
    /// already held by the same owner, an all-or-nothing guarantee.
    pub fn lock(&self, ids: &[String], hostname: &str, owner_pid: u32) -> PhoResult<()> {
        let mut rows = self.rows.lock();
        for id in ids {
            let entry = rows
                .get(id.as_str())
                .ok_or_else(|| PhoError::NotFound(id.clone()))?;
            if let Some(existing) = &entry.lock {
                if existing.hostname != hostname || existing.owner_pid != owner_pid {
                    return Err(PhoError::Busy(format!("row '{id}' locked by another owner")));
                }
            }
        }
        let lock = Lock::new(hostname, owner_pid, std::time::SystemTime::now());
        for id in ids {
            rows.get_mut(id.as_str()).unwrap().lock = Some(lock.clone());
        }
        Ok(())
    }

    pub fn unlock(&self, ids: &[String], hostname: &str) -> PhoResult<()> {
        let mut rows = self.rows.lock();
        for id in ids {
            let entry = rows
                .get_mut(id.as_str())
                .ok_or_else(|| PhoError::NotFound(id.clone()))?;
            match &entry.lock {
                Some(l) if l.hostname == hostname => entry.lock = None,
                Some(_) => return Err(PhoError::Busy(format!("row '{id}' locked by another host"))),
                None => {}
            }
        }
        Ok(())
    }

    pub fn lock_status(&self, id: &str) -> PhoResult<Option<Lock>> {
        self.rows
            .lock()
            .get(id)
            .map(|e| e.lock.clone())
            .ok_or_else(|| PhoError::NotFound(id.to_string()))
    }
}

/// The fixed classification of raw storage-backend failures into the
/// core taxonomy: integrity violation, malformed query, full
/// disk, and connectivity loss each map to exactly one [`PhoError`]
/// variant regardless of which backend is behind the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    IntegrityViolation,
    Syntax,
    OutOfSpace,
    Connectivity,
}

pub fn classify_storage_error(kind: StorageErrorKind, detail: impl Into<String>) -> PhoError {
    let detail = detail.into();
    match kind {
        StorageErrorKind::IntegrityViolation => PhoError::AlreadyExists(detail),
        StorageErrorKind::Syntax => PhoError::Invalid(detail),
        StorageErrorKind::OutOfSpace => PhoError::NoSpace(detail),
        StorageErrorKind::Connectivity => PhoError::Comm(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone)]
    struct Row {
        name: String,
        size: u64,
    }

    impl IndexRow for Row {
        fn attrs(&self) -> Value {
            json!({"name": self.name, "size": self.size})
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let idx: StateIndex<Row> = StateIndex::new();
        idx.insert(
            "a",
            Row {
                name: "a".into(),
                size: 10,
            },
        )
        .unwrap();
        let found = idx.get(&Filter::Eq("name".into(), json!("a")));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].size, 10);
    }

    #[test]
    fn duplicate_insert_is_already_exists() {
        let idx: StateIndex<Row> = StateIndex::new();
        idx.insert(
            "a",
            Row {
                name: "a".into(),
                size: 1,
            },
        )
        .unwrap();
        let err = idx
            .insert(
                "a",
                Row {
                    name: "a".into(),
                    size: 2,
                },
            )
            .unwrap_err();
        assert!(matches!(err, PhoError::AlreadyExists(_)));
    }

    #[test]
    fn lock_is_all_or_nothing_across_rows() {
        let idx: StateIndex<Row> = StateIndex::new();
        idx.insert(
            "a",
            Row {
                name: "a".into(),
                size: 1,
            },
        )
        .unwrap();
        idx.insert(
            "b",
            Row {
                name: "b".into(),
                size: 1,
            },
        )
        .unwrap();

        idx.lock(&["a".to_string()], "host1", 100).unwrap();

        let ids = vec!["a".to_string(), "b".to_string()];
        let err = idx.lock(&ids, "host2", 200).unwrap_err();
        assert!(matches!(err, PhoError::Busy(_)));
        // "b" must still be unlocked since the whole batch failed.
        assert!(idx.lock_status("b").unwrap().is_none());
    }
}

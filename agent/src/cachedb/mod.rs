// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! In-memory index database for cached responses.
//!
//! [`CacheDb`] is a single table of [`Index`] records with seven lookups:
//!
//! | Index | Unique | Key |
//! |-------|--------|-----|
//! | `id` | yes | request fingerprint |
//! | `request_path` | no | (namespace, path) |
//! | `token` | yes | cached auth token |
//! | `token_accessor` | yes | accessor of the cached token |
//! | `token_parent` | no | token that created the cached token |
//! | `lease` | yes | cached lease ID |
//! | `lease_token` | no | token that created the cached lease |
//!
//! Empty field values are never indexed, so a lookup for `""` finds nothing.
//! Every index supports prefix lookup.
//!
//! The table sits behind a tokio [`RwLock`]. Readers share the lock and never
//! wait on each other, and always observe a whole write or none of it. Reads
//! are not lock-free: a reader waits while a write holds the lock or is queued
//! ahead of it. Writers never await while holding the lock, so that wait is
//! bounded by one in-memory index update. Handles are cheap to clone and all
//! clones see the same table.

mod context;
mod index;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

pub use context::ContextInfo;
pub use index::{Index, IndexName};

use index::join_key;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CacheDbError {
    #[error("invalid index: {0}")]
    InvalidIndex(String),
    #[error("index {index} takes {expected} key part(s), got {got}")]
    InvalidKey {
        index: IndexName,
        expected: usize,
        got: usize,
    },
    #[error("nil index provided")]
    NilInput,
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("unique constraint violated on index {0}")]
    UniqueConstraint(IndexName),
}

#[derive(Default)]
struct Table {
    records: HashMap<String, Index>,
    /// Per index: key -> IDs of the records holding that key.
    indexes: [BTreeMap<String, BTreeSet<String>>; 7],
}

impl Table {
    fn first(&self, name: IndexName, key: &str) -> Option<&Index> {
        self.indexes[name.position()]
            .get(key)
            .and_then(|ids| ids.iter().next())
            .and_then(|id| self.records.get(id))
    }

    fn by_prefix(&self, name: IndexName, prefix: &str) -> Vec<Index> {
        self.indexes[name.position()]
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.records.get(id))
            .cloned()
            .collect()
    }

    fn insert(&mut self, index: Index) -> Result<(), CacheDbError> {
        index.validate()?;

        for name in IndexName::ALL.into_iter().filter(|n| n.is_unique()) {
            if let Some(key) = index.key(name)
                && let Some(ids) = self.indexes[name.position()].get(&key)
                && ids.iter().any(|id| *id != index.id)
            {
                return Err(CacheDbError::UniqueConstraint(name));
            }
        }

        self.remove(&index.id);

        for name in IndexName::ALL {
            if let Some(key) = index.key(name) {
                self.indexes[name.position()]
                    .entry(key)
                    .or_default()
                    .insert(index.id.clone());
            }
        }
        self.records.insert(index.id.clone(), index);

        Ok(())
    }

    fn remove(&mut self, id: &str) -> Option<Index> {
        let index = self.records.remove(id)?;

        for name in IndexName::ALL {
            let Some(key) = index.key(name) else {
                continue;
            };
            let entries = &mut self.indexes[name.position()];
            if let Some(ids) = entries.get_mut(&key) {
                ids.remove(id);
                if ids.is_empty() {
                    entries.remove(&key);
                }
            }
        }

        Some(index)
    }
}

#[derive(Clone, Default)]
pub struct CacheDb {
    table: Arc<RwLock<Table>>,
}

impl CacheDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first record matching the key on the given index. Runs
    /// alongside other readers and waits only behind writers.
    pub async fn get(&self, name: IndexName, parts: &[&str]) -> Result<Option<Index>, CacheDbError> {
        let Some(key) = exact_key(name, parts)? else {
            return Ok(None);
        };

        let table = self.table.read().await;
        Ok(table.first(name, &key).cloned())
    }

    /// Returns every record whose key on the given index starts with the
    /// supplied parts. For `request_path` the namespace must match exactly
    /// when a path prefix is also given.
    pub async fn get_by_prefix(
        &self,
        name: IndexName,
        parts: &[&str],
    ) -> Result<Vec<Index>, CacheDbError> {
        if parts.is_empty() || parts.len() > name.key_parts() {
            return Err(CacheDbError::InvalidKey {
                index: name,
                expected: name.key_parts(),
                got: parts.len(),
            });
        }

        let prefix = join_key(parts);
        let table = self.table.read().await;
        Ok(table.by_prefix(name, &prefix))
    }

    /// Inserts the record, replacing any record with the same ID.
    pub async fn set(&self, index: Index) -> Result<(), CacheDbError> {
        let mut table = self.table.write().await;
        table.insert(index)
    }

    /// Read-modify-write of the record with the given ID under the writer
    /// lock. `f` returns whether the modified record should be stored.
    /// Returns false when the record is gone or `f` declined.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<bool, CacheDbError>
    where
        F: FnOnce(&mut Index) -> bool,
    {
        let mut table = self.table.write().await;
        let Some(mut index) = table.records.get(id).cloned() else {
            return Ok(false);
        };

        if !f(&mut index) {
            return Ok(false);
        }
        if index.id != id {
            return Err(CacheDbError::InvalidRecord(
                "record ID cannot change on update".to_string(),
            ));
        }

        table.insert(index)?;
        Ok(true)
    }

    /// Deletes the record found by the lookup. A miss is not an error.
    pub async fn evict(&self, name: IndexName, parts: &[&str]) -> Result<(), CacheDbError> {
        let Some(key) = exact_key(name, parts)? else {
            return Ok(());
        };

        let mut table = self.table.write().await;
        let id = table.first(name, &key).map(|index| index.id.clone());
        if let Some(id) = id {
            table.remove(&id);
        }

        Ok(())
    }

    /// Deletes the record with the given ID only while it is still governed
    /// by `ctx`. Returns whether a record was removed.
    pub async fn evict_with_context(&self, id: &str, ctx: &ContextInfo) -> bool {
        let mut table = self.table.write().await;
        let owned = table
            .records
            .get(id)
            .is_some_and(|index| index.renew_ctx.same_context(ctx));

        owned && table.remove(id).is_some()
    }

    /// Replaces the table with an empty one.
    pub async fn flush(&self) {
        let mut table = self.table.write().await;
        *table = Table::default();
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Takes the writer lock without waiting and holds it until the returned
    /// guard is dropped.
    #[cfg(test)]
    pub(crate) fn try_lock_table(&self) -> Option<Box<dyn std::any::Any + Send>> {
        let guard = self.table.clone().try_write_owned().ok()?;
        Some(Box::new(guard))
    }
}

fn exact_key(name: IndexName, parts: &[&str]) -> Result<Option<String>, CacheDbError> {
    if parts.len() != name.key_parts() {
        return Err(CacheDbError::InvalidKey {
            index: name,
            expected: name.key_parts(),
            got: parts.len(),
        });
    }
    if parts.iter().any(|part| part.is_empty()) {
        return Ok(None);
    }

    Ok(Some(join_key(parts)))
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-kind record store with per-identity serialized merges.
//!
//! Records are held in a [`DashMap`] keyed by identity. Every mutation goes
//! through the map's entry API, which holds the shard write lock for the
//! duration of the merge. Two peers merging the same identity concurrently
//! are therefore applied one after the other: the second sees the first's
//! result, so they cannot both pass the "remote is newer" rule and clobber
//! each other.
//!
//! Explicit removals leave a marker holding the removal time. A later merge
//! of the same identity is ignored unless the incoming record is strictly
//! newer than the marker, so a peer still holding the old copy cannot bring
//! the record back.

use crate::error::{BrokerError, Result};
use crate::merge::{merge, MergeOutcome, UnchangedReason};
use crate::metrics;
use crate::record::{Record, Timestamp};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error};

/// Concurrent store for one record kind.
pub struct RecordStore<R: Record> {
    records: DashMap<R::Key, R>,
    /// Removal time per explicitly removed identity
    removed: DashMap<R::Key, Timestamp>,
}

impl<R: Record> Default for RecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> RecordStore<R> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            removed: DashMap::new(),
        }
    }

    /// Merge a record into the store.
    ///
    /// If no record with the same identity exists, `record` is inserted.
    /// Otherwise the stored record is merged against it.
    ///
    /// An identity removed at time `t` only comes back through a record
    /// stamped strictly after `t`.
    pub fn merge(&self, record: R) -> Result<MergeOutcome> {
        let key = record.key();
        let result = match self.records.entry(key.clone()) {
            Entry::Occupied(mut entry) => merge(entry.get_mut(), Some(&record)),
            Entry::Vacant(entry) => {
                let removed_at = self.removed.get(&key).map(|r| *r.value());
                match removed_at {
                    Some(at) if record.last_change().map_or(true, |ts| ts <= at) => {
                        debug!(kind = %R::KIND, identity = %key, removed_at = at, "Ignoring record removed locally");
                        Ok(MergeOutcome::Unchanged(UnchangedReason::Removed))
                    }
                    _ => {
                        self.removed.remove(&key);
                        entry.insert(record);
                        Ok(MergeOutcome::Inserted)
                    }
                }
            }
        };

        match &result {
            Ok(outcome) => {
                metrics::record_merge(&R::KIND.to_string(), outcome.label());
            }
            Err(e) => {
                error!(kind = %R::KIND, error = %e, "Merge failed");
                metrics::record_merge_failure(&R::KIND.to_string(), e.label());
            }
        }
        result
    }

    /// Apply a local update under the identity lock.
    ///
    /// `apply` receives the stored record and may mutate it. Returns a copy
    /// of the record after the update.
    pub fn update<F>(&self, key: &R::Key, apply: F) -> Result<R>
    where
        F: FnOnce(&mut R) -> Result<()>,
    {
        let mut entry = self
            .records
            .get_mut(key)
            .ok_or_else(|| BrokerError::NotFound {
                kind: R::KIND,
                identity: key.to_string(),
            })?;
        apply(entry.value_mut())?;
        debug!(kind = %R::KIND, identity = %key, "Record updated locally");
        Ok(entry.value().clone())
    }

    pub fn get(&self, key: &R::Key) -> Option<R> {
        self.records.get(key).map(|r| r.value().clone())
    }

    pub fn contains(&self, key: &R::Key) -> bool {
        self.records.contains_key(key)
    }

    /// Remove a record and remember the removal at `at`.
    ///
    /// The marker is stamped no earlier than the removed record's own
    /// timestamp, so replaying that exact record never resurrects it.
    pub fn remove_at(&self, key: &R::Key, at: Timestamp) -> Option<R> {
        let Entry::Occupied(entry) = self.records.entry(key.clone()) else {
            return None;
        };
        let marker = entry.get().last_change().map_or(at, |ts| ts.max(at));
        self.removed.insert(key.clone(), marker);
        Some(entry.remove())
    }

    /// Drop the removal marker for `key`, if any.
    ///
    /// Used before a local re-create, which always wins over a removal.
    pub fn forget_removal(&self, key: &R::Key) {
        self.removed.remove(key);
    }

    /// Insert `record`, or apply `refresh` to the stored record with the
    /// same identity, as one step under the identity lock.
    ///
    /// Returns whether the record was inserted and a copy of what is stored.
    pub fn upsert<F>(&self, record: R, refresh: F) -> Result<(bool, R)>
    where
        F: FnOnce(&mut R, &R) -> Result<()>,
    {
        match self.records.entry(record.key()) {
            Entry::Occupied(mut entry) => {
                refresh(entry.get_mut(), &record)?;
                Ok((false, entry.get().clone()))
            }
            Entry::Vacant(entry) => {
                let stored = entry.insert(record);
                Ok((true, stored.value().clone()))
            }
        }
    }

    /// Remove the record only if `predicate` still holds under the lock.
    pub fn remove_if<F>(&self, key: &R::Key, predicate: F) -> Option<R>
    where
        F: FnOnce(&R) -> bool,
    {
        self.records.remove_if(key, |_, r| predicate(r)).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Point-in-time copy of every record.
    pub fn snapshot(&self) -> Vec<R> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    /// Copy of every record matching `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Vec<R>
    where
        F: Fn(&R) -> bool,
    {
        self.records
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.value().clone())
            .collect()
    }
}

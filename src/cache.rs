// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory cache of fetched entities
//!
//! Entities are partitioned by `(cluster url, entity type)` and keyed by uid
//! inside a partition. A successful fetch replaces its whole partition: the
//! server may have added or removed objects since the last poll, and merging
//! would keep entries that no longer exist.
//!
//! Each fetch takes a [`FetchTicket`] before it goes to the network. Starting
//! a newer fetch for the same partition or replacing the partition directly
//! invalidates older tickets, so a slow response that arrives late is dropped
//! instead of overwriting newer data. Removing a cluster forgets its
//! generations entirely; tickets issued before that can never commit.
//!
//! Partitions are stored behind `Arc` so readers get a cheap snapshot
//! ([`EntityView`]) that stays consistent while the cache keeps changing.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::model::{EntityRecord, EntityType, NamespaceFilter};

type PartitionKey = (String, EntityType);
type Partition = Arc<HashMap<String, EntityRecord>>;

/// Proof that a fetch was started; needed to commit its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    cluster_url: String,
    entity_type: EntityType,
    generation: u64,
}

impl FetchTicket {
    pub fn cluster_url(&self) -> &str {
        &self.cluster_url
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }
}

#[derive(Debug, Default)]
struct CacheState {
    partitions: HashMap<PartitionKey, Partition>,
    /// Newest generation issued per partition; only its ticket may commit
    latest: HashMap<PartitionKey, u64>,
    next_generation: u64,
}

impl CacheState {
    fn bump(&mut self, key: PartitionKey) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.latest.insert(key, generation);
        generation
    }
}

fn index_by_uid(records: Vec<EntityRecord>) -> HashMap<String, EntityRecord> {
    records
        .into_iter()
        .map(|record| (record.uid.clone(), record))
        .collect()
}

#[derive(Debug, Default)]
pub struct EntityCache {
    state: RwLock<CacheState>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a fetch for a partition, superseding any fetch already in flight
    pub fn begin_fetch(&self, cluster_url: &str, entity_type: EntityType) -> FetchTicket {
        let generation = self
            .write()
            .bump((cluster_url.to_string(), entity_type));
        FetchTicket {
            cluster_url: cluster_url.to_string(),
            entity_type,
            generation,
        }
    }

    /// Replace a partition with the result of the fetch that issued `ticket`.
    ///
    /// Nothing is written if a newer ticket exists for the partition or if
    /// `still_registered` says the cluster is gone. The check runs under the
    /// cache write lock, so a cluster removal either happens before it (and
    /// the result is dropped) or after the commit (and purges it).
    /// Returns whether the records were stored.
    pub fn commit<F>(&self, ticket: &FetchTicket, records: Vec<EntityRecord>, still_registered: F) -> bool
    where
        F: FnOnce(&str) -> bool,
    {
        let key = (ticket.cluster_url.clone(), ticket.entity_type);
        let mut state = self.write();

        if state.latest.get(&key) != Some(&ticket.generation) {
            warn!(
                cluster = %ticket.cluster_url,
                entity_type = %ticket.entity_type,
                generation = ticket.generation,
                "Discarding superseded fetch result"
            );
            return false;
        }
        if !still_registered(&ticket.cluster_url) {
            warn!(
                cluster = %ticket.cluster_url,
                entity_type = %ticket.entity_type,
                "Discarding fetch result for removed cluster"
            );
            return false;
        }

        let count = records.len();
        state.partitions.insert(key, Arc::new(index_by_uid(records)));
        debug!(
            cluster = %ticket.cluster_url,
            entity_type = %ticket.entity_type,
            count,
            "Partition replaced"
        );
        true
    }

    /// Replace a partition unconditionally. In-flight fetches for the same
    /// partition can no longer commit.
    pub fn replace_all(&self, cluster_url: &str, entity_type: EntityType, records: Vec<EntityRecord>) {
        let key = (cluster_url.to_string(), entity_type);
        let mut state = self.write();
        state.bump(key.clone());
        state.partitions.insert(key, Arc::new(index_by_uid(records)));
    }

    /// Delete one record. Returns whether it was present.
    pub fn remove(&self, cluster_url: &str, entity_type: EntityType, uid: &str) -> bool {
        let key = (cluster_url.to_string(), entity_type);
        let mut state = self.write();
        match state.partitions.get_mut(&key) {
            Some(partition) if partition.contains_key(uid) => {
                Arc::make_mut(partition).remove(uid);
                true
            }
            _ => false,
        }
    }

    /// Drop every partition of a cluster and forget its fetch generations, so
    /// tickets issued before the removal can no longer commit.
    /// Returns the number of partitions removed.
    pub fn remove_partitions_for_cluster(&self, cluster_url: &str) -> usize {
        let mut state = self.write();
        let before = state.partitions.len();
        state.partitions.retain(|(url, _), _| url != cluster_url);
        let removed = before - state.partitions.len();
        // Outstanding tickets no longer match any generation
        state.latest.retain(|(url, _), _| url != cluster_url);
        debug!(cluster = %cluster_url, removed, "Cluster partitions removed");
        removed
    }

    /// Snapshot of a partition restricted to a namespace filter
    pub fn list_filtered(
        &self,
        cluster_url: &str,
        entity_type: EntityType,
        filter: NamespaceFilter,
    ) -> EntityView {
        let records = self
            .read()
            .partitions
            .get(&(cluster_url.to_string(), entity_type))
            .cloned();
        EntityView { records, filter }
    }

    pub fn get(&self, cluster_url: &str, entity_type: EntityType, uid: &str) -> Option<EntityRecord> {
        self.read()
            .partitions
            .get(&(cluster_url.to_string(), entity_type))
            .and_then(|partition| partition.get(uid).cloned())
    }

    /// Whether a partition has been populated by at least one fetch
    pub fn has_partition(&self, cluster_url: &str, entity_type: EntityType) -> bool {
        self.read()
            .partitions
            .contains_key(&(cluster_url.to_string(), entity_type))
    }

    #[cfg(test)]
    pub(crate) fn generation_count(&self) -> usize {
        self.read().latest.len()
    }
}

/// Read-only, restartable view over one cached partition.
///
/// Iteration order is unspecified. Call [`EntityView::iter`] again to restart.
#[derive(Debug, Clone)]
pub struct EntityView {
    records: Option<Partition>,
    filter: NamespaceFilter,
}

impl EntityView {
    pub fn empty(filter: NamespaceFilter) -> Self {
        Self {
            records: None,
            filter,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> + '_ {
        self.records
            .iter()
            .flat_map(|partition| partition.values())
            .filter(|record| self.filter.matches(record.namespace()))
    }

    pub fn filter(&self) -> &NamespaceFilter {
        &self.filter
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<EntityRecord> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a EntityView {
    type Item = &'a EntityRecord;
    type IntoIter = Box<dyn Iterator<Item = &'a EntityRecord> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

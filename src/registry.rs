// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Registry of known clusters and their session state
//!
//! Clusters are keyed by API server url. Every mutation takes the write lock
//! for its whole duration and never awaits, so concurrent tasks observe either
//! the state before or after a mutation, never a partial one.
//!
//! The registry also holds the process-wide [`CurrentSelection`], which is
//! deliberately left out of [`ClusterRegistry::snapshot`].

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::model::{CloudProvider, Cluster, ClusterStatus, EntityType, NamespaceFilter};

/// What the user is currently looking at. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentSelection {
    pub cluster_url: Option<String>,
    pub provider_filter: Option<CloudProvider>,
    pub entity_type: EntityType,
    /// uid of the selected entity
    pub entity: Option<String>,
}

impl Default for CurrentSelection {
    fn default() -> Self {
        Self {
            cluster_url: None,
            provider_filter: None,
            entity_type: EntityType::Pods,
            entity: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ClusterRegistry {
    clusters: RwLock<HashMap<String, Cluster>>,
    selection: RwLock<CurrentSelection>,
}

impl ClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Cluster>> {
        self.clusters.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Cluster>> {
        self.clusters.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn selection_mut(&self) -> RwLockWriteGuard<'_, CurrentSelection> {
        self.selection.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite a cluster by url. Returns true if an entry was replaced.
    pub fn add(&self, cluster: Cluster) -> bool {
        let url = cluster.url.clone();
        let replaced = self.write().insert(url.clone(), cluster).is_some();
        debug!(cluster = %url, replaced, "Cluster registered");
        replaced
    }

    /// Remove a cluster. No-op if absent.
    pub fn remove(&self, url: &str) -> Option<Cluster> {
        let removed = self.write().remove(url);
        if removed.is_some() {
            let mut selection = self.selection_mut();
            if selection.cluster_url.as_deref() == Some(url) {
                selection.cluster_url = None;
                selection.entity = None;
            }
        }
        removed
    }

    pub fn get(&self, url: &str) -> Option<Cluster> {
        self.read().get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.read().contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All clusters, ordered by name then url
    pub fn list(&self) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = self.read().values().cloned().collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.url.cmp(&b.url)));
        clusters
    }

    pub fn list_for_provider(&self, provider: CloudProvider) -> Vec<Cluster> {
        self.list()
            .into_iter()
            .filter(|c| c.cloud_provider == provider)
            .collect()
    }

    /// Record the active cluster. Existence is not checked; callers select
    /// from clusters they listed. Clears the selected entity.
    pub fn set_current(&self, url: &str) {
        let mut selection = self.selection_mut();
        if selection.cluster_url.as_deref() != Some(url) {
            selection.entity = None;
        }
        selection.cluster_url = Some(url.to_string());
    }

    pub fn current(&self) -> Option<Cluster> {
        let url = self.selection().cluster_url?;
        self.get(&url)
    }

    pub fn set_namespace(&self, url: &str, namespace: NamespaceFilter) -> bool {
        match self.write().get_mut(url) {
            Some(cluster) => {
                cluster.current_namespace = namespace;
                true
            }
            None => false,
        }
    }

    /// Set the health status. Ignored if the cluster was removed while a
    /// check was in flight.
    pub fn set_status(&self, url: &str, status: ClusterStatus) -> bool {
        match self.write().get_mut(url) {
            Some(cluster) => {
                cluster.status = status;
                true
            }
            None => {
                debug!(cluster = %url, status = %status, "Status for removed cluster dropped");
                false
            }
        }
    }

    /// Store a token. The previous expiration is kept when `expiration` is None.
    /// Returns the updated cluster.
    pub fn set_token(
        &self,
        url: &str,
        token: String,
        expiration: Option<DateTime<Utc>>,
    ) -> Option<Cluster> {
        let mut clusters = self.write();
        let cluster = clusters.get_mut(url)?;
        cluster.token = Some(token);
        if let Some(expiration) = expiration {
            cluster.token_expiration = Some(expiration);
        }
        Some(cluster.clone())
    }

    /// Replace the namespace list wholesale
    pub fn set_namespaces(&self, url: &str, namespaces: Vec<String>) -> bool {
        match self.write().get_mut(url) {
            Some(cluster) => {
                cluster.namespaces = namespaces;
                true
            }
            None => false,
        }
    }

    pub fn selection(&self) -> CurrentSelection {
        self.selection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_provider_filter(&self, provider: Option<CloudProvider>) {
        self.selection_mut().provider_filter = provider;
    }

    pub fn set_entity_type(&self, entity_type: EntityType) {
        let mut selection = self.selection_mut();
        if selection.entity_type != entity_type {
            selection.entity = None;
        }
        selection.entity_type = entity_type;
    }

    pub fn set_entity(&self, uid: Option<String>) {
        self.selection_mut().entity = uid;
    }

    /// Clusters as they should be persisted
    pub fn snapshot(&self) -> Vec<Cluster> {
        self.list()
    }

    /// Load persisted clusters, replacing current contents. A status of
    /// CHECKING cannot survive a restart and comes back as UNKNOWN.
    pub fn restore(&self, clusters: Vec<Cluster>) {
        let mut map = self.write();
        map.clear();
        for mut cluster in clusters {
            if cluster.status == ClusterStatus::Checking {
                cluster.status = ClusterStatus::Unknown;
            }
            map.insert(cluster.url.clone(), cluster);
        }
    }
}

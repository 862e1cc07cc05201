// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! The entry point front ends call into.
//!
//! [`KubeDeck`] composes the registry, the entity cache and the session
//! coordinator. Every operation that reaches a cluster first passes through
//! [`SessionCoordinator::ensure_token`] and is bounded by the request
//! timeout. Results are written to the shared [`Store`] and handed back as
//! plain values.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::EntityView;
use crate::config::Config;
use crate::credentials::ProviderCredentials;
use crate::error::SessionError;
use crate::kubernetes::{KubeApi, KubeApiSettings};
use crate::model::{
    CloudProvider, Cluster, ClusterStatus, EntityRecord, EntityType, NamespaceFilter,
};
use crate::progress::ProgressHandle;
use crate::provider::{AwsCliAuth, GcpOAuthAuth, K8sApi};
use crate::session::SessionCoordinator;
use crate::store::Store;

/// Result of one cluster's health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCheck {
    pub url: String,
    pub status: ClusterStatus,
    /// Why the cluster is not RUNNING, when known
    pub error: Option<SessionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The partition now holds exactly the fetched records
    Updated {
        count: usize,
        /// Items dropped for lacking a uid
        skipped: usize,
    },
    /// A newer fetch was started or the cluster was removed; nothing written
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The server no longer had the object
    AlreadyGone,
}

pub struct KubeDeck {
    store: Arc<Store>,
    sessions: SessionCoordinator,
    api: Arc<dyn K8sApi>,
    progress: ProgressHandle,
}

impl KubeDeck {
    pub fn new(
        store: Arc<Store>,
        sessions: SessionCoordinator,
        api: Arc<dyn K8sApi>,
        progress: ProgressHandle,
    ) -> Self {
        Self {
            store,
            sessions,
            api,
            progress,
        }
    }

    /// Wire up the real collaborators from configuration
    pub fn from_config(
        config: &Config,
        store: Arc<Store>,
        progress: ProgressHandle,
    ) -> Result<Self, SessionError> {
        let gcp = GcpOAuthAuth::new(config.gcp_token_endpoint.clone(), config.request_timeout())?;
        let aws = AwsCliAuth::new(config.aws_cli.clone());
        let sessions = SessionCoordinator::new(store.clone(), config.session_settings(), progress.clone())
            .with_auth_client(Arc::new(aws))
            .with_auth_client(Arc::new(gcp));
        let api = KubeApi::new(KubeApiSettings {
            connect_timeout: config.connect_timeout(),
            read_timeout: config.request_timeout(),
            accept_invalid_certs: config.accept_invalid_certs,
        });
        Ok(Self::new(store, sessions, Arc::new(api), progress))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionCoordinator {
        &self.sessions
    }

    pub fn progress(&self) -> &ProgressHandle {
        &self.progress
    }

    // === Clusters ===

    /// Register or overwrite a cluster. Returns true if it replaced one.
    pub fn add_cluster(&self, cluster: Cluster) -> bool {
        info!(cluster = %cluster.url, name = %cluster.name, provider = %cluster.cloud_provider, "Adding cluster");
        self.store.registry.add(cluster)
    }

    /// Remove a cluster together with everything cached for it
    pub fn remove_cluster(&self, url: &str) -> Option<Cluster> {
        let removed = self.store.registry.remove(url)?;
        let partitions = self.store.cache.remove_partitions_for_cluster(url);
        self.sessions.forget(url);
        info!(cluster = %url, partitions, "Removed cluster");
        Some(removed)
    }

    pub fn list_clusters(&self) -> Vec<Cluster> {
        self.store.registry.list()
    }

    pub fn select_provider(&self, provider: Option<CloudProvider>) {
        self.store.registry.set_provider_filter(provider);
    }

    /// Clusters matching the provider filter, or all of them without one
    pub fn clusters_for_current_provider(&self) -> Vec<Cluster> {
        match self.store.registry.selection().provider_filter {
            Some(provider) => self.store.registry.list_for_provider(provider),
            None => self.store.registry.list(),
        }
    }

    pub fn select_cluster(&self, url: &str) -> Result<Cluster, SessionError> {
        let cluster = self
            .store
            .registry
            .get(url)
            .ok_or_else(|| SessionError::UnknownCluster(url.to_string()))?;
        self.store.registry.set_current(url);
        Ok(cluster)
    }

    pub fn current_cluster(&self) -> Option<Cluster> {
        self.store.registry.current()
    }

    pub fn select_entity_type(&self, entity_type: EntityType) {
        self.store.registry.set_entity_type(entity_type);
    }

    pub fn select_entity(&self, uid: Option<String>) {
        self.store.registry.set_entity(uid);
    }

    /// The selected entity, if it is still cached
    pub fn current_entity(&self) -> Option<EntityRecord> {
        let selection = self.store.registry.selection();
        let url = selection.cluster_url?;
        let uid = selection.entity?;
        self.store.cache.get(&url, selection.entity_type, &uid)
    }

    pub fn set_credentials(&self, credentials: ProviderCredentials) {
        info!(provider = %credentials.provider(), "Credentials updated");
        self.store.credentials.set(credentials);
    }

    /// Forget a provider's credentials. Tokens already issued stay usable
    /// until they expire. Returns whether any were stored.
    pub fn remove_credentials(&self, provider: CloudProvider) -> bool {
        let removed = self.store.credentials.remove(provider).is_some();
        if removed {
            info!(provider = %provider, "Credentials removed");
        }
        removed
    }

    // === Health ===

    /// Probe every registered cluster concurrently. Never fails as a whole;
    /// each cluster gets its own result.
    pub async fn check_all_clusters(&self) -> Vec<ClusterCheck> {
        let clusters = self.store.registry.list();
        self.progress.checking_clusters(clusters.len());
        info!(count = clusters.len(), "Checking clusters");

        let checks = clusters.iter().map(|cluster| self.check_cluster(&cluster.url));
        futures::future::join_all(checks).await
    }

    pub async fn check_cluster(&self, url: &str) -> ClusterCheck {
        let start = Instant::now();
        self.store.registry.set_status(url, ClusterStatus::Checking);

        let probe = async {
            let cluster = self.sessions.ensure_token(url).await?;
            self.sessions
                .bounded("health check", self.api.check_cluster(&cluster))
                .await
        }
        .await;

        let (status, error) = match probe {
            Ok(probe) => {
                let status = probe.status();
                let error = match status {
                    ClusterStatus::Running => None,
                    ClusterStatus::Unauthorized => Some(SessionError::Auth(
                        probe.response.unwrap_or_default(),
                    )),
                    _ => Some(SessionError::Connectivity(
                        probe.response.unwrap_or_else(|| "cluster is down".to_string()),
                    )),
                };
                (status, error)
            }
            Err(err @ SessionError::UnknownCluster(_)) => (ClusterStatus::Unknown, Some(err)),
            Err(err) if err.requires_reauth() => (ClusterStatus::Unauthorized, Some(err)),
            Err(err) => (ClusterStatus::Down, Some(err)),
        };

        self.store.registry.set_status(url, status);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.progress.cluster_checked(url, status, elapsed_ms);
        match &error {
            Some(err) => debug!(cluster = %url, status = %status, error = %err, elapsed_ms, "Cluster checked"),
            None => debug!(cluster = %url, status = %status, elapsed_ms, "Cluster checked"),
        }

        ClusterCheck {
            url: url.to_string(),
            status,
            error,
        }
    }

    // === Namespaces ===

    /// Refresh the namespace list. A selected namespace that disappeared
    /// falls back to all namespaces.
    pub async fn fetch_namespaces(&self, url: &str) -> Result<Vec<String>, SessionError> {
        let cluster = self.sessions.ensure_token(url).await?;
        let namespaces = self
            .sessions
            .bounded("namespace list", self.api.fetch_namespaces(&cluster))
            .await?;

        self.store.registry.set_namespaces(url, namespaces.clone());
        if let Some(cluster) = self.store.registry.get(url)
            && let NamespaceFilter::Named(selected) = &cluster.current_namespace
            && !namespaces.contains(selected)
        {
            info!(cluster = %url, namespace = %selected, "Selected namespace is gone, showing all");
            self.store.registry.set_namespace(url, NamespaceFilter::All);
        }

        debug!(cluster = %url, count = namespaces.len(), "Namespaces fetched");
        Ok(namespaces)
    }

    pub fn select_namespace(&self, url: &str, namespace: NamespaceFilter) -> Result<(), SessionError> {
        if self.store.registry.set_namespace(url, namespace) {
            Ok(())
        } else {
            Err(SessionError::UnknownCluster(url.to_string()))
        }
    }

    // === Entities ===

    /// Fetch every object of `entity_type` and replace the cached partition.
    ///
    /// Items without a uid are skipped. If another fetch for the same
    /// partition starts before this one completes, this result is dropped.
    pub async fn list_entities(
        &self,
        url: &str,
        entity_type: EntityType,
    ) -> Result<FetchOutcome, SessionError> {
        let cluster = self.sessions.ensure_token(url).await?;
        let ticket = self.store.cache.begin_fetch(url, entity_type);

        self.progress.fetching_entities(url, entity_type);
        let start = Instant::now();
        let items = self
            .sessions
            .bounded("entity list", self.api.fetch_entities(&cluster, entity_type))
            .await?;

        let total = items.len();
        let records: Vec<EntityRecord> = items
            .into_iter()
            .filter_map(|item| EntityRecord::from_object(item, entity_type))
            .collect();
        let skipped = total - records.len();
        if skipped > 0 {
            warn!(cluster = %url, entity_type = %entity_type, skipped, "Skipping items without metadata.uid");
        }

        let count = records.len();
        let registry = &self.store.registry;
        if !self
            .store
            .cache
            .commit(&ticket, records, |url| registry.contains(url))
        {
            self.progress.fetch_discarded(url, entity_type);
            return Ok(FetchOutcome::Superseded);
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.progress
            .entities_fetched(url, entity_type, count, elapsed_ms);
        debug!(cluster = %url, entity_type = %entity_type, count, elapsed_ms, "Entities cached");
        Ok(FetchOutcome::Updated { count, skipped })
    }

    /// Cached entities filtered by the cluster's selected namespace
    pub fn entities(&self, url: &str, entity_type: EntityType) -> EntityView {
        let filter = self
            .store
            .registry
            .get(url)
            .map(|cluster| cluster.current_namespace)
            .unwrap_or_default();
        self.entities_in(url, entity_type, filter)
    }

    /// Cached entities with an explicit namespace filter. Empty for clusters
    /// that are not registered.
    pub fn entities_in(
        &self,
        url: &str,
        entity_type: EntityType,
        filter: NamespaceFilter,
    ) -> EntityView {
        if !self.store.registry.contains(url) {
            return EntityView::empty(filter);
        }
        self.store.cache.list_filtered(url, entity_type, filter)
    }

    /// Entities of the current cluster and entity type
    pub fn current_entities(&self) -> Option<EntityView> {
        let selection = self.store.registry.selection();
        let url = selection.cluster_url?;
        Some(self.entities(&url, selection.entity_type))
    }

    /// Delete one entity. The cache is only touched once the server confirms
    /// the delete with the expected kind, or reports the object already gone.
    pub async fn delete_entity(
        &self,
        url: &str,
        entity: &EntityRecord,
        entity_type: EntityType,
    ) -> Result<DeleteOutcome, SessionError> {
        let cluster = self.sessions.ensure_token(url).await?;

        let outcome = match self
            .sessions
            .bounded("delete", self.api.delete_entity(&cluster, entity, entity_type))
            .await
        {
            Ok(response) if response.confirms(entity_type) => DeleteOutcome::Deleted,
            Ok(response) => {
                warn!(
                    cluster = %url,
                    uid = %entity.uid,
                    expected = %entity_type.kind(),
                    returned = ?response.kind,
                    "Delete not confirmed, cache left as is"
                );
                return Err(SessionError::Provider(format!(
                    "delete returned kind {}, expected {}",
                    response.kind.as_deref().unwrap_or("<none>"),
                    entity_type.kind()
                )));
            }
            Err(SessionError::NotFound(_)) => DeleteOutcome::AlreadyGone,
            Err(err) => return Err(err),
        };

        self.store.cache.remove(url, entity_type, &entity.uid);
        let selection = self.store.registry.selection();
        if selection.entity.as_deref() == Some(entity.uid.as_str()) {
            self.store.registry.set_entity(None);
        }
        info!(cluster = %url, uid = %entity.uid, outcome = ?outcome, "Entity deleted");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::create_progress_handle;
    use crate::provider::{DeleteResponse, ProbeResult, UNAUTHORIZED_RESPONSE};
    use crate::session::SessionSettings;
    use crate::testing::{FakeApi, FakeFetch, FakeIssuer, aws_credentials, gcp_credentials, item};
    use chrono::{TimeDelta, Utc};
    use std::collections::HashSet;
    use std::time::Duration;

    const C1: &str = "https://c1.gke.example";
    const C2: &str = "https://c2.gke.example";
    const E1: &str = "https://e1.eks.example";

    struct Harness {
        deck: KubeDeck,
        api: Arc<FakeApi>,
        gcp: Arc<FakeIssuer>,
        aws: Arc<FakeIssuer>,
    }

    fn harness_with(gcp: FakeIssuer, settings: SessionSettings) -> Harness {
        let store = Arc::new(Store::new());
        store.credentials.set(gcp_credentials());
        store.credentials.set(aws_credentials());

        let progress = create_progress_handle();
        let gcp = Arc::new(gcp);
        let aws = Arc::new(FakeIssuer::new(CloudProvider::Aws));
        let sessions = SessionCoordinator::new(store.clone(), settings, progress.clone())
            .with_auth_client(gcp.clone())
            .with_auth_client(aws.clone());
        let api = Arc::new(FakeApi::new());
        let deck = KubeDeck::new(store, sessions, api.clone(), progress);
        Harness { deck, api, gcp, aws }
    }

    fn harness() -> Harness {
        harness_with(FakeIssuer::new(CloudProvider::Gcp), SessionSettings::default())
    }

    fn uids(view: &EntityView) -> HashSet<String> {
        view.iter().map(|r| r.uid.clone()).collect()
    }

    fn set(uids: &[&str]) -> HashSet<String> {
        uids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_first_listing_refreshes_then_fetches() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![
            item("p1", "default", "web"),
            item("p2", "kube-system", "dns"),
        ]));

        let outcome = h.deck.list_entities(C1, EntityType::Pods).await.unwrap();

        assert_eq!(outcome, FetchOutcome::Updated { count: 2, skipped: 0 });
        assert_eq!(h.gcp.calls(), 1);
        assert_eq!(h.api.fetch_calls(), 1);
        assert_eq!(h.api.tokens_seen(), vec![Some("gcp-token-1".to_string())]);

        let view = h.deck.entities(C1, EntityType::Pods);
        assert_eq!(uids(&view), set(&["p1", "p2"]));
        let record = h.deck.store().cache.get(C1, EntityType::Pods, "p1").unwrap();
        assert_eq!(record.kind, EntityType::Pods);
    }

    #[tokio::test]
    async fn test_listing_replaces_partition() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![item("A", "ns", "a"), item("B", "ns", "b")]));
        h.api.script_fetch(FakeFetch::items(vec![item("B", "ns", "b"), item("C", "ns", "c")]));

        h.deck.list_entities(C1, EntityType::Services).await.unwrap();
        h.deck.list_entities(C1, EntityType::Services).await.unwrap();

        assert_eq!(uids(&h.deck.entities(C1, EntityType::Services)), set(&["B", "C"]));
        // Token reused for the second call
        assert_eq!(h.gcp.calls(), 1);
    }

    #[tokio::test]
    async fn test_items_without_uid_are_skipped() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![
            item("p1", "default", "web"),
            serde_json::json!({"metadata": {"name": "ghost", "namespace": "default"}}),
        ]));

        let outcome = h.deck.list_entities(C1, EntityType::Pods).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Updated { count: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn test_stale_fetch_is_discarded() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        // Warm the token so both fetches start right away
        h.deck.sessions().ensure_token(C1).await.unwrap();

        h.api.script_fetch(FakeFetch::delayed(
            Duration::from_millis(100),
            vec![item("old", "ns", "old")],
        ));
        h.api.script_fetch(FakeFetch::items(vec![item("new", "ns", "new")]));

        let slow = h.deck.list_entities(C1, EntityType::Pods);
        let fast = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.deck.list_entities(C1, EntityType::Pods).await
        };
        let (slow, fast) = tokio::join!(slow, fast);

        assert_eq!(slow.unwrap(), FetchOutcome::Superseded);
        assert_eq!(fast.unwrap(), FetchOutcome::Updated { count: 1, skipped: 0 });
        assert_eq!(uids(&h.deck.entities(C1, EntityType::Pods)), set(&["new"]));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cache() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![item("p1", "ns", "web")]));
        h.deck.list_entities(C1, EntityType::Pods).await.unwrap();

        h.api.script_fetch(FakeFetch {
            delay: Duration::ZERO,
            result: Err(SessionError::Connectivity("reset".to_string())),
        });
        let err = h.deck.list_entities(C1, EntityType::Pods).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(uids(&h.deck.entities(C1, EntityType::Pods)), set(&["p1"]));
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let settings = SessionSettings {
            request_timeout: Duration::from_millis(50),
            ..SessionSettings::default()
        };
        let h = harness_with(FakeIssuer::new(CloudProvider::Gcp), settings);
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::delayed(Duration::from_secs(5), vec![]));

        let err = h.deck.list_entities(C1, EntityType::Pods).await.unwrap_err();
        assert!(matches!(err, SessionError::Connectivity(_)));
        assert!(!h.deck.store().cache.has_partition(C1, EntityType::Pods));
    }

    #[tokio::test]
    async fn test_namespace_filter() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![
            item("a", "ns1", "a"),
            item("b", "ns2", "b"),
        ]));
        h.deck.list_entities(C1, EntityType::Pods).await.unwrap();

        h.deck.select_namespace(C1, NamespaceFilter::from("ns1")).unwrap();
        assert_eq!(uids(&h.deck.entities(C1, EntityType::Pods)), set(&["a"]));

        h.deck
            .select_namespace(C1, NamespaceFilter::from(crate::model::ALL_NAMESPACES))
            .unwrap();
        assert_eq!(uids(&h.deck.entities(C1, EntityType::Pods)), set(&["a", "b"]));

        assert!(h.deck.select_namespace("https://nope", NamespaceFilter::All).is_err());
    }

    #[tokio::test]
    async fn test_fetch_namespaces_resets_missing_selection() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.deck.select_namespace(C1, NamespaceFilter::from("gone")).unwrap();
        h.api.script_namespaces(&["default", "web"]);

        let namespaces = h.deck.fetch_namespaces(C1).await.unwrap();

        assert_eq!(namespaces, vec!["default", "web"]);
        let cluster = h.deck.store().registry.get(C1).unwrap();
        assert_eq!(cluster.namespaces, vec!["default", "web"]);
        assert_eq!(cluster.current_namespace, NamespaceFilter::All);
    }

    #[tokio::test]
    async fn test_fetch_namespaces_keeps_existing_selection() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.deck.select_namespace(C1, NamespaceFilter::from("web")).unwrap();
        h.api.script_namespaces(&["default", "web"]);

        h.deck.fetch_namespaces(C1).await.unwrap();
        let cluster = h.deck.store().registry.get(C1).unwrap();
        assert_eq!(cluster.current_namespace, NamespaceFilter::from("web"));
    }

    #[tokio::test]
    async fn test_fetch_namespaces_failure_keeps_list() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.deck.select_namespace(C1, NamespaceFilter::from("web")).unwrap();
        h.api.script_namespaces(&["default", "web"]);
        h.deck.fetch_namespaces(C1).await.unwrap();

        h.api.fail_namespaces(SessionError::Connectivity("connection reset".to_string()));
        let err = h.deck.fetch_namespaces(C1).await.unwrap_err();

        assert!(matches!(err, SessionError::Connectivity(_)));
        assert_eq!(h.api.namespace_calls(), 2);
        let cluster = h.deck.store().registry.get(C1).unwrap();
        assert_eq!(cluster.namespaces, vec!["default", "web"]);
        assert_eq!(cluster.current_namespace, NamespaceFilter::from("web"));
    }

    #[tokio::test]
    async fn test_delete_confirmed() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![item("p1", "ns", "a"), item("p2", "ns", "b")]));
        h.deck.list_entities(C1, EntityType::Pods).await.unwrap();
        h.deck.select_cluster(C1).unwrap();
        h.deck.select_entity(Some("p1".to_string()));

        let record = h.deck.store().cache.get(C1, EntityType::Pods, "p1").unwrap();
        let outcome = h.deck.delete_entity(C1, &record, EntityType::Pods).await.unwrap();

        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert_eq!(h.api.delete_calls(), 1);
        assert_eq!(uids(&h.deck.entities(C1, EntityType::Pods)), set(&["p2"]));
        assert!(h.deck.current_entity().is_none());
    }

    #[tokio::test]
    async fn test_delete_kind_mismatch_keeps_cache() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![item("p1", "ns", "a")]));
        h.deck.list_entities(C1, EntityType::Pods).await.unwrap();
        h.api.script_delete(Ok(DeleteResponse {
            kind: Some("Service".to_string()),
            uid: Some("p1".to_string()),
        }));

        let record = h.deck.store().cache.get(C1, EntityType::Pods, "p1").unwrap();
        let err = h.deck.delete_entity(C1, &record, EntityType::Pods).await.unwrap_err();

        assert!(matches!(err, SessionError::Provider(_)));
        assert_eq!(h.api.delete_calls(), 1);
        assert_eq!(uids(&h.deck.entities(C1, EntityType::Pods)), set(&["p1"]));
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_cache() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![item("p1", "ns", "a")]));
        h.deck.list_entities(C1, EntityType::Pods).await.unwrap();
        h.api.script_delete(Err(SessionError::Auth("forbidden".to_string())));

        let record = h.deck.store().cache.get(C1, EntityType::Pods, "p1").unwrap();
        let err = h.deck.delete_entity(C1, &record, EntityType::Pods).await.unwrap_err();

        assert!(err.requires_reauth());
        assert_eq!(uids(&h.deck.entities(C1, EntityType::Pods)), set(&["p1"]));
    }

    #[tokio::test]
    async fn test_delete_already_gone_counts_as_success() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![item("p1", "ns", "a")]));
        h.deck.list_entities(C1, EntityType::Pods).await.unwrap();
        h.api.script_delete(Err(SessionError::NotFound("pods \"a\" not found".to_string())));

        let record = h.deck.store().cache.get(C1, EntityType::Pods, "p1").unwrap();
        let outcome = h.deck.delete_entity(C1, &record, EntityType::Pods).await.unwrap();

        assert_eq!(outcome, DeleteOutcome::AlreadyGone);
        assert!(h.deck.entities(C1, EntityType::Pods).is_empty());
    }

    #[tokio::test]
    async fn test_remove_cluster_purges_cache() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_fetch(FakeFetch::items(vec![item("p1", "ns", "a")]));
        h.api.script_fetch(FakeFetch::items(vec![item("s1", "ns", "svc")]));
        h.deck.list_entities(C1, EntityType::Pods).await.unwrap();
        h.deck.list_entities(C1, EntityType::Services).await.unwrap();

        assert!(h.deck.remove_cluster(C1).is_some());

        for entity_type in EntityType::ALL {
            assert!(h.deck.entities_in(C1, entity_type, NamespaceFilter::All).is_empty());
            assert!(!h.deck.store().cache.has_partition(C1, entity_type));
        }
        assert!(h.deck.remove_cluster(C1).is_none());
    }

    #[tokio::test]
    async fn test_removed_cluster_fetch_not_committed() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.deck.sessions().ensure_token(C1).await.unwrap();
        h.api.script_fetch(FakeFetch::delayed(
            Duration::from_millis(80),
            vec![item("p1", "ns", "a")],
        ));

        let fetch = h.deck.list_entities(C1, EntityType::Pods);
        let remove = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.deck.remove_cluster(C1)
        };
        let (fetched, removed) = tokio::join!(fetch, remove);

        assert!(removed.is_some());
        assert_eq!(fetched.unwrap(), FetchOutcome::Superseded);
        assert!(!h.deck.store().cache.has_partition(C1, EntityType::Pods));
    }

    #[tokio::test]
    async fn test_check_all_isolates_failures() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.deck.add_cluster(Cluster::new(C2, "c2", CloudProvider::Gcp));
        h.deck.add_cluster(Cluster::new(E1, "e1", CloudProvider::Aws));
        h.api.script_probe(C1, Ok(ProbeResult::up()));
        h.api.script_probe(C2, Ok(ProbeResult::down("connection refused")));
        h.api.script_probe(E1, Err(SessionError::Provider("probe exploded".to_string())));

        let checks = h.deck.check_all_clusters().await;

        assert_eq!(checks.len(), 3);
        let status = |url: &str| h.deck.store().registry.get(url).unwrap().status;
        assert_eq!(status(C1), ClusterStatus::Running);
        assert_eq!(status(C2), ClusterStatus::Down);
        assert_eq!(status(E1), ClusterStatus::Down);
        assert_eq!(h.api.probe_calls(), 3);
        assert_eq!(h.aws.calls(), 1);
        assert_eq!(h.deck.progress().progress(), (3, 3));

        let c1 = checks.iter().find(|c| c.url == C1).unwrap();
        assert!(c1.error.is_none());
    }

    #[tokio::test]
    async fn test_check_marks_unauthorized() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.api.script_probe(C1, Ok(ProbeResult::down(UNAUTHORIZED_RESPONSE)));

        let check = h.deck.check_cluster(C1).await;
        assert_eq!(check.status, ClusterStatus::Unauthorized);
        assert!(check.error.unwrap().requires_reauth());
    }

    #[tokio::test]
    async fn test_check_token_failure_statuses() {
        let mut gcp = FakeIssuer::new(CloudProvider::Gcp);
        gcp.fail_with = Some(SessionError::Auth("invalid_grant".to_string()));
        let h = harness_with(gcp, SessionSettings::default());
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.deck.add_cluster(Cluster::new(E1, "e1", CloudProvider::Aws));
        h.deck.store().credentials.remove(CloudProvider::Aws);

        let checks = h.deck.check_all_clusters().await;

        assert!(checks.iter().all(|c| c.status == ClusterStatus::Unauthorized));
        assert_eq!(h.api.probe_calls(), 0);
    }

    #[tokio::test]
    async fn test_check_unregistered_url_is_unknown() {
        let h = harness();

        let check = h.deck.check_cluster("https://nope.example").await;

        assert_eq!(check.status, ClusterStatus::Unknown);
        assert!(matches!(check.error, Some(SessionError::UnknownCluster(_))));
        assert_eq!(h.api.probe_calls(), 0);
        assert!(h.deck.store().registry.get("https://nope.example").is_none());
    }

    #[tokio::test]
    async fn test_listing_unregistered_url_takes_no_ticket() {
        let h = harness();

        let err = h
            .deck
            .list_entities("https://nope.example", EntityType::Pods)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::UnknownCluster(_)));
        assert_eq!(h.deck.store().cache.generation_count(), 0);
        assert_eq!(h.api.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_check_connectivity_token_failure_is_down() {
        let mut gcp = FakeIssuer::new(CloudProvider::Gcp);
        gcp.fail_with = Some(SessionError::Connectivity("dns".to_string()));
        let h = harness_with(gcp, SessionSettings::default());
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));

        let check = h.deck.check_cluster(C1).await;
        assert_eq!(check.status, ClusterStatus::Down);
        assert!(h.deck.store().registry.get(C1).unwrap().token.is_none());
    }

    #[tokio::test]
    async fn test_valid_token_not_refreshed_for_check() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.deck.store().registry.set_token(
            C1,
            "still-good".to_string(),
            Some(Utc::now() + TimeDelta::seconds(600)),
        );

        h.deck.check_cluster(C1).await;
        assert_eq!(h.gcp.calls(), 0);
        assert_eq!(h.api.tokens_seen(), vec![Some("still-good".to_string())]);
    }

    #[tokio::test]
    async fn test_provider_filter_and_selection() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(C1, "c1", CloudProvider::Gcp));
        h.deck.add_cluster(Cluster::new(E1, "e1", CloudProvider::Aws));

        assert_eq!(h.deck.clusters_for_current_provider().len(), 2);
        h.deck.select_provider(Some(CloudProvider::Aws));
        let names: Vec<String> = h
            .deck
            .clusters_for_current_provider()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["e1"]);

        assert!(h.deck.select_cluster("https://nope").is_err());
        h.deck.select_cluster(E1).unwrap();
        assert_eq!(h.deck.current_cluster().unwrap().url, E1);
        assert!(h.deck.current_entities().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_current_entities_follow_selection() {
        let h = harness();
        h.deck.add_cluster(Cluster::new(E1, "e1", CloudProvider::Aws));
        h.api.script_fetch(FakeFetch::items(vec![item("s1", "web", "frontend")]));
        h.deck.list_entities(E1, EntityType::Services).await.unwrap();

        h.deck.select_cluster(E1).unwrap();
        assert!(h.deck.current_entities().unwrap().is_empty());

        h.deck.select_entity_type(EntityType::Services);
        h.deck.select_entity(Some("s1".to_string()));
        assert_eq!(uids(&h.deck.current_entities().unwrap()), set(&["s1"]));
        assert_eq!(h.deck.current_entity().unwrap().name(), Some("frontend"));
    }

    #[tokio::test]
    async fn test_add_cluster_is_upsert() {
        let h = harness();
        assert!(!h.deck.add_cluster(Cluster::new(C1, "first", CloudProvider::Gcp)));
        assert!(h.deck.add_cluster(Cluster::new(C1, "second", CloudProvider::Gcp)));
        let clusters = h.deck.list_clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name, "second");
    }
}

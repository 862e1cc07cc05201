// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::api::{ApiResource, DeleteParams, DynamicObject, ListParams};
use kube::{Api, Client, Config};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::model::{Cluster, EntityRecord, EntityType};
use crate::provider::{DeleteResponse, K8sApi, ProbeResult, UNAUTHORIZED_RESPONSE};

/// Maximum retry attempts for transient list failures
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (doubles each retry)
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Page size for paginated list requests
const PAGE_SIZE: u32 = 500;

/// Client settings shared by every cluster connection
#[derive(Debug, Clone)]
pub struct KubeApiSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for KubeApiSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            accept_invalid_certs: false,
        }
    }
}

struct CachedClient {
    token: String,
    client: Client,
}

/// Cluster API access with bearer-token authentication.
///
/// Clients are cached per cluster url and rebuilt whenever the cluster's
/// token changes.
pub struct KubeApi {
    settings: KubeApiSettings,
    clients: RwLock<HashMap<String, CachedClient>>,
}

impl KubeApi {
    pub fn new(settings: KubeApiSettings) -> Self {
        Self {
            settings,
            clients: RwLock::new(HashMap::new()),
        }
    }

    async fn client_for(&self, cluster: &Cluster) -> Result<Client, SessionError> {
        let token = cluster
            .token
            .as_deref()
            .ok_or_else(|| SessionError::Auth(format!("no token for cluster '{}'", cluster.name)))?;

        {
            let clients = self.clients.read().await;
            if let Some(cached) = clients.get(&cluster.url)
                && cached.token == token
            {
                return Ok(cached.client.clone());
            }
        }

        let uri: http::Uri = cluster.url.parse().map_err(|e| {
            SessionError::Provider(format!("invalid cluster url '{}': {}", cluster.url, e))
        })?;
        let mut config = Config::new(uri);
        config.auth_info.token = Some(token.to_string().into());
        config.connect_timeout = Some(self.settings.connect_timeout);
        config.read_timeout = Some(self.settings.read_timeout);
        config.accept_invalid_certs = self.settings.accept_invalid_certs;

        let client = Client::try_from(config).map_err(SessionError::from)?;
        debug!(cluster = %cluster.url, "Created API client");

        self.clients.write().await.insert(
            cluster.url.clone(),
            CachedClient {
                token: token.to_string(),
                client: client.clone(),
            },
        );
        Ok(client)
    }

    fn api_resource(entity_type: EntityType) -> ApiResource {
        match entity_type {
            EntityType::Pods => ApiResource::erase::<Pod>(&()),
            EntityType::Services => ApiResource::erase::<Service>(&()),
        }
    }

    /// List all objects with pagination and retry logic
    async fn list_with_retry<K>(
        &self,
        api: &Api<K>,
        what: &str,
        cluster: &str,
    ) -> Result<Vec<K>, SessionError>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        let mut all_items: Vec<K> = Vec::new();
        let mut continue_token: Option<String> = None;
        let mut page_count = 0u32;

        loop {
            let mut params = ListParams::default().limit(PAGE_SIZE);
            if let Some(ref token) = continue_token {
                params = params.continue_token(token);
            }

            let list = self
                .list_page_with_retry(api, &params, what, cluster)
                .await?;

            all_items.extend(list.items);
            page_count += 1;

            match list.metadata.continue_ {
                Some(token) if !token.is_empty() => {
                    debug!(
                        resource = %what,
                        cluster = %cluster,
                        page = page_count,
                        total_so_far = all_items.len(),
                        "Fetched page, continuing"
                    );
                    continue_token = Some(token);
                }
                _ => break,
            }
        }

        Ok(all_items)
    }

    async fn list_page_with_retry<K>(
        &self,
        api: &Api<K>,
        params: &ListParams,
        what: &str,
        cluster: &str,
    ) -> Result<kube::api::ObjectList<K>, SessionError>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match api.list(params).await {
                Ok(list) => return Ok(list),
                Err(e) if Self::is_retryable_error(&e) => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        resource = %what,
                        cluster = %cluster,
                        attempt = attempt + 1,
                        max_attempts = MAX_RETRIES,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => {
                    debug!(resource = %what, cluster = %cluster, error = %e, "Non-retryable error");
                    return Err(e.into());
                }
            }
        }

        Err(last_error.map(SessionError::from).unwrap_or_else(|| {
            SessionError::Connectivity(format!("failed after {} retries", MAX_RETRIES))
        }))
    }

    /// Transient failures worth another attempt
    fn is_retryable_error(err: &kube::Error) -> bool {
        match err {
            kube::Error::HyperError(_) => true,
            kube::Error::Api(api_err) => matches!(api_err.code, 429 | 503 | 504),
            _ => false,
        }
    }
}

impl Default for KubeApi {
    fn default() -> Self {
        Self::new(KubeApiSettings::default())
    }
}

#[async_trait]
impl K8sApi for KubeApi {
    async fn check_cluster(&self, cluster: &Cluster) -> Result<ProbeResult, SessionError> {
        let client = self.client_for(cluster).await?;
        let start = Instant::now();

        match client.apiserver_version().await {
            Ok(info) => {
                debug!(
                    cluster = %cluster.url,
                    version = %info.git_version,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Cluster reachable"
                );
                Ok(ProbeResult::up())
            }
            Err(kube::Error::Api(api_err)) if matches!(api_err.code, 401 | 403) => {
                debug!(cluster = %cluster.url, code = api_err.code, "Probe rejected credentials");
                Ok(ProbeResult::down(UNAUTHORIZED_RESPONSE))
            }
            Err(e) => {
                debug!(cluster = %cluster.url, error = %e, "Probe failed");
                Ok(ProbeResult::down(e.to_string()))
            }
        }
    }

    async fn fetch_namespaces(&self, cluster: &Cluster) -> Result<Vec<String>, SessionError> {
        let client = self.client_for(cluster).await?;
        let api: Api<Namespace> = Api::all(client);

        let namespaces = self
            .list_with_retry(&api, "namespaces", &cluster.url)
            .await?;

        let mut names: Vec<String> = namespaces
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn fetch_entities(
        &self,
        cluster: &Cluster,
        entity_type: EntityType,
    ) -> Result<Vec<serde_json::Value>, SessionError> {
        let client = self.client_for(cluster).await?;
        let ar = Self::api_resource(entity_type);
        let api: Api<DynamicObject> = Api::all_with(client, &ar);

        debug!(
            cluster = %cluster.url,
            resource = %entity_type,
            kind = %ar.kind,
            "Fetching entities across all namespaces"
        );

        let items = self
            .list_with_retry(&api, entity_type.as_str(), &cluster.url)
            .await?;

        let mut values = Vec::with_capacity(items.len());
        for item in items {
            let mut value = serde_json::to_value(item)
                .map_err(|e| SessionError::Provider(format!("unserializable object: {}", e)))?;
            // List responses omit apiVersion and kind on each item
            if let serde_json::Value::Object(ref mut map) = value {
                map.insert(
                    "apiVersion".to_string(),
                    serde_json::Value::String(ar.api_version.clone()),
                );
                map.insert(
                    "kind".to_string(),
                    serde_json::Value::String(ar.kind.clone()),
                );
            }
            values.push(value);
        }

        Ok(values)
    }

    async fn delete_entity(
        &self,
        cluster: &Cluster,
        entity: &EntityRecord,
        entity_type: EntityType,
    ) -> Result<DeleteResponse, SessionError> {
        let name = entity
            .name()
            .ok_or_else(|| SessionError::Provider(format!("entity {} has no name", entity.uid)))?;
        let namespace = entity.namespace().ok_or_else(|| {
            SessionError::Provider(format!("entity {} has no namespace", entity.uid))
        })?;

        let client = self.client_for(cluster).await?;
        let ar = Self::api_resource(entity_type);
        let api: Api<DynamicObject> = Api::namespaced_with(client, namespace, &ar);

        debug!(cluster = %cluster.url, resource = %entity_type, namespace = %namespace, name = %name, "Deleting entity");

        let body = api
            .delete(name, &DeleteParams::default())
            .await?
            .either(serde_json::to_value, serde_json::to_value)
            .map_err(|e| SessionError::Provider(format!("unreadable delete response: {}", e)))?;

        Ok(DeleteResponse::from_value(&body))
    }
}

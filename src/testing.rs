// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Scripted collaborators for unit tests

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::credentials::{AwsCredentials, GcpCredentials, ProviderCredentials};
use crate::error::SessionError;
use crate::model::{CloudProvider, Cluster, EntityRecord, EntityType};
use crate::provider::{DeleteResponse, IssuedToken, K8sApi, ProbeResult, ProviderAuthClient};

pub fn gcp_credentials() -> ProviderCredentials {
    ProviderCredentials::Gcp(GcpCredentials {
        refresh_token: "1//refresh".to_string(),
        client_id: "client".to_string(),
        client_secret: None,
    })
}

pub fn aws_credentials() -> ProviderCredentials {
    ProviderCredentials::Aws(AwsCredentials {
        access_key_id: "AKIAEXAMPLE".to_string(),
        secret_access_key: "secret".to_string(),
        session_token: None,
        region: "us-east-1".to_string(),
    })
}

/// A raw list item as the API server returns it
pub fn item(uid: &str, namespace: &str, name: &str) -> Value {
    json!({"metadata": {"uid": uid, "namespace": namespace, "name": name}})
}

pub struct FakeIssuer {
    provider: CloudProvider,
    calls: AtomicUsize,
    pub delay: Duration,
    pub fail_with: Option<SessionError>,
}

impl FakeIssuer {
    pub fn new(provider: CloudProvider) -> Self {
        Self {
            provider,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_with: None,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAuthClient for FakeIssuer {
    fn provider(&self) -> CloudProvider {
        self.provider
    }

    async fn issue_token(
        &self,
        _cluster: &Cluster,
        _credentials: &ProviderCredentials,
    ) -> Result<IssuedToken, SessionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(IssuedToken {
                token: format!("{}-token-{}", self.provider, n),
                expires_in: Some(Duration::from_secs(3599)),
            }),
        }
    }
}

pub struct FakeFetch {
    pub delay: Duration,
    pub result: Result<Vec<Value>, SessionError>,
}

impl FakeFetch {
    pub fn items(items: Vec<Value>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(items),
        }
    }

    pub fn delayed(delay: Duration, items: Vec<Value>) -> Self {
        Self {
            delay,
            result: Ok(items),
        }
    }
}

/// K8s API fake. Unscripted probes answer up, unscripted fetches return
/// nothing and unscripted deletes confirm the expected kind.
#[derive(Default)]
pub struct FakeApi {
    probes: Mutex<HashMap<String, Result<ProbeResult, SessionError>>>,
    namespaces: Mutex<Vec<String>>,
    namespace_failure: Mutex<Option<SessionError>>,
    namespace_calls: AtomicUsize,
    fetches: Mutex<VecDeque<FakeFetch>>,
    delete_response: Mutex<Option<Result<DeleteResponse, SessionError>>>,
    probe_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    tokens_seen: Mutex<Vec<Option<String>>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_probe(&self, url: &str, result: Result<ProbeResult, SessionError>) {
        self.probes
            .lock()
            .unwrap()
            .insert(url.to_string(), result);
    }

    pub fn script_namespaces(&self, namespaces: &[&str]) {
        *self.namespaces.lock().unwrap() = namespaces.iter().map(|s| s.to_string()).collect();
        *self.namespace_failure.lock().unwrap() = None;
    }

    pub fn fail_namespaces(&self, err: SessionError) {
        *self.namespace_failure.lock().unwrap() = Some(err);
    }

    pub fn script_fetch(&self, fetch: FakeFetch) {
        self.fetches.lock().unwrap().push_back(fetch);
    }

    pub fn script_delete(&self, result: Result<DeleteResponse, SessionError>) {
        *self.delete_response.lock().unwrap() = Some(result);
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn namespace_calls(&self) -> usize {
        self.namespace_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Bearer tokens the calls were made with, in call order
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.tokens_seen.lock().unwrap().clone()
    }

    fn saw(&self, cluster: &Cluster) {
        self.tokens_seen.lock().unwrap().push(cluster.token.clone());
    }
}

#[async_trait]
impl K8sApi for FakeApi {
    async fn check_cluster(&self, cluster: &Cluster) -> Result<ProbeResult, SessionError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.saw(cluster);
        let scripted = self.probes.lock().unwrap().get(&cluster.url).cloned();
        scripted.unwrap_or_else(|| Ok(ProbeResult::up()))
    }

    async fn fetch_namespaces(&self, cluster: &Cluster) -> Result<Vec<String>, SessionError> {
        self.namespace_calls.fetch_add(1, Ordering::SeqCst);
        self.saw(cluster);
        if let Some(err) = self.namespace_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.namespaces.lock().unwrap().clone())
    }

    async fn fetch_entities(
        &self,
        cluster: &Cluster,
        _entity_type: EntityType,
    ) -> Result<Vec<Value>, SessionError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.saw(cluster);
        let next = self.fetches.lock().unwrap().pop_front();
        match next {
            Some(fetch) => {
                if !fetch.delay.is_zero() {
                    tokio::time::sleep(fetch.delay).await;
                }
                fetch.result
            }
            None => Ok(Vec::new()),
        }
    }

    async fn delete_entity(
        &self,
        cluster: &Cluster,
        entity: &EntityRecord,
        entity_type: EntityType,
    ) -> Result<DeleteResponse, SessionError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.saw(cluster);
        let scripted = self.delete_response.lock().unwrap().clone();
        scripted.unwrap_or_else(|| {
            Ok(DeleteResponse {
                kind: Some(entity_type.kind().to_string()),
                uid: Some(entity.uid.clone()),
            })
        })
    }
}

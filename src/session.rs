// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Session coordinator: keeps a usable bearer token for each cluster.
//!
//! Token state per cluster:
//!
//! ```text
//! NoToken ──ensure_token──▶ Refreshing ──ok──▶ Valid ──time──▶ Expiring
//!                               │  ▲                              │
//!                               err└──────────ensure_token────────┘
//!                               ▼
//!                             Failed ──ensure_token──▶ Refreshing
//! ```
//!
//! At most one refresh runs per cluster url. Callers arriving while a refresh
//! is in flight wait for it and receive the same outcome, success or failure.
//! A failed refresh leaves the previously stored token in place.

use chrono::{TimeDelta, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::model::{CloudProvider, Cluster};
use crate::progress::ProgressHandle;
use crate::provider::ProviderAuthClient;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Refresh when fewer than this remains before expiry
    pub safety_margin: Duration,
    /// Lifetime recorded for freshly issued GCP tokens
    pub gcp_token_lifetime: Duration,
    /// Upper bound for every remote call
    pub request_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(60),
            gcp_token_lifetime: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Valid,
    /// Token present but inside the safety margin or past expiry
    Expiring,
    Refreshing,
    /// Last refresh attempt failed
    Failed,
}

type FlightOutcome = Result<Cluster, SessionError>;

struct Flight {
    id: u64,
    receiver: watch::Receiver<Option<FlightOutcome>>,
}

enum Role<'a> {
    Leader(FlightGuard<'a>),
    Follower(watch::Receiver<Option<FlightOutcome>>),
}

/// Held by the task performing a refresh. Dropping it unregisters the
/// flight; if no outcome was published, waiters observe a closed channel
/// and start over.
struct FlightGuard<'a> {
    flights: &'a Mutex<HashMap<String, Flight>>,
    url: String,
    id: u64,
    sender: watch::Sender<Option<FlightOutcome>>,
}

impl FlightGuard<'_> {
    fn publish(&self, outcome: FlightOutcome) {
        self.sender.send_replace(Some(outcome));
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights.get(&self.url).is_some_and(|f| f.id == self.id) {
            flights.remove(&self.url);
        }
    }
}

pub struct SessionCoordinator {
    store: Arc<Store>,
    auth_clients: HashMap<CloudProvider, Arc<dyn ProviderAuthClient>>,
    settings: SessionSettings,
    progress: ProgressHandle,
    flights: Mutex<HashMap<String, Flight>>,
    next_flight: AtomicU64,
    failures: Mutex<HashMap<String, SessionError>>,
}

impl SessionCoordinator {
    pub fn new(store: Arc<Store>, settings: SessionSettings, progress: ProgressHandle) -> Self {
        Self {
            store,
            auth_clients: HashMap::new(),
            settings,
            progress,
            flights: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Register the client used to issue tokens for its provider
    pub fn with_auth_client(mut self, client: Arc<dyn ProviderAuthClient>) -> Self {
        self.auth_clients.insert(client.provider(), client);
        self
    }

    /// Return the cluster with a token that is usable right now, refreshing
    /// it first if needed.
    pub async fn ensure_token(&self, url: &str) -> Result<Cluster, SessionError> {
        loop {
            let cluster = self
                .store
                .registry
                .get(url)
                .ok_or_else(|| SessionError::UnknownCluster(url.to_string()))?;

            if cluster.has_valid_session(Utc::now(), self.settings.safety_margin) {
                return Ok(cluster);
            }

            match self.join_or_lead(url) {
                Role::Leader(guard) => {
                    // A flight may have completed between the check above and registration
                    let latest = self
                        .store
                        .registry
                        .get(url)
                        .ok_or_else(|| SessionError::UnknownCluster(url.to_string()))?;
                    if latest.has_valid_session(Utc::now(), self.settings.safety_margin) {
                        guard.publish(Ok(latest.clone()));
                        return Ok(latest);
                    }

                    let outcome = self.refresh(&latest).await;
                    self.record_outcome(url, &outcome);
                    guard.publish(outcome.clone());
                    return outcome;
                }
                Role::Follower(mut receiver) => {
                    debug!(cluster = %url, "Waiting for in-flight token refresh");
                    let outcome = match receiver.wait_for(Option::is_some).await {
                        Ok(published) => published.clone(),
                        Err(_) => None,
                    };
                    match outcome {
                        Some(outcome) => return outcome,
                        // Refresh was abandoned before publishing
                        None => continue,
                    }
                }
            }
        }
    }

    fn join_or_lead(&self, url: &str) -> Role<'_> {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = flights.get(url) {
            return Role::Follower(flight.receiver.clone());
        }

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        flights.insert(url.to_string(), Flight { id, receiver });
        Role::Leader(FlightGuard {
            flights: &self.flights,
            url: url.to_string(),
            id,
            sender,
        })
    }

    async fn refresh(&self, cluster: &Cluster) -> FlightOutcome {
        let provider = cluster.cloud_provider;
        let credentials = self
            .store
            .credentials
            .get(provider)
            .ok_or(SessionError::MissingCredentials(provider))?;
        let client = self.auth_clients.get(&provider).ok_or_else(|| {
            SessionError::Provider(format!("no token issuer registered for {}", provider))
        })?;

        info!(cluster = %cluster.url, provider = %provider, "Obtaining cluster token");
        self.progress.refreshing_token(&cluster.url);
        let start = Instant::now();

        let issued = self
            .bounded("token request", client.issue_token(cluster, &credentials))
            .await?;

        let expiration = match provider {
            CloudProvider::Aws => None,
            CloudProvider::Gcp => {
                debug!(cluster = %cluster.url, reported = ?issued.expires_in, "GCP token issued");
                Some(Utc::now() + lifetime_delta(self.settings.gcp_token_lifetime))
            }
        };

        let updated = self
            .store
            .registry
            .set_token(&cluster.url, issued.token, expiration)
            .ok_or_else(|| SessionError::UnknownCluster(cluster.url.clone()))?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.progress.token_refreshed(&cluster.url, elapsed_ms);
        info!(cluster = %cluster.url, elapsed_ms, "Cluster token refreshed");
        Ok(updated)
    }

    fn record_outcome(&self, url: &str, outcome: &FlightOutcome) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(_) => {
                failures.remove(url);
            }
            Err(err) => {
                warn!(cluster = %url, error = %err, "Token refresh failed");
                failures.insert(url.to_string(), err.clone());
            }
        }
    }

    /// Run a remote call under the configured request timeout
    pub async fn bounded<T, F>(&self, what: &str, call: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        match tokio::time::timeout(self.settings.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::timeout(what, self.settings.request_timeout)),
        }
    }

    pub fn token_state(&self, url: &str) -> Option<TokenState> {
        let cluster = self.store.registry.get(url)?;

        let refreshing = self
            .flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(url);
        if refreshing {
            return Some(TokenState::Refreshing);
        }
        if cluster.has_valid_session(Utc::now(), self.settings.safety_margin) {
            return Some(TokenState::Valid);
        }
        if self.last_failure(url).is_some() {
            return Some(TokenState::Failed);
        }
        Some(match cluster.token {
            None => TokenState::NoToken,
            Some(_) => TokenState::Expiring,
        })
    }

    pub fn last_failure(&self, url: &str) -> Option<SessionError> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    /// Drop bookkeeping for a cluster that was removed
    pub fn forget(&self, url: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(url);
    }
}

/// Converted lifetime, capped at one year
fn lifetime_delta(lifetime: Duration) -> TimeDelta {
    let cap = TimeDelta::days(365);
    TimeDelta::from_std(lifetime).map_or(cap, |delta| delta.min(cap))
}

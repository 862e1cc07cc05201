// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Progress reporting for long-running operations
//!
//! The facade and session coordinator report health checks, token refreshes
//! and fetches here; a front end subscribes and renders whatever it likes.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use crate::model::{ClusterStatus, EntityType};

/// Create a spinner with consistent styling
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Progress update message
#[derive(Clone, Debug)]
pub enum ProgressUpdate {
    // === Health checks ===
    /// Starting a batch health check
    CheckingClusters { count: usize },
    /// One cluster's health check finished
    ClusterChecked {
        cluster: String,
        status: ClusterStatus,
        elapsed_ms: u64,
    },

    // === Sessions ===
    /// Obtaining a new token for a cluster
    RefreshingToken { cluster: String },
    /// Token obtained
    TokenRefreshed { cluster: String, elapsed_ms: u64 },

    // === Entities ===
    FetchingEntities {
        cluster: String,
        entity_type: EntityType,
    },
    EntitiesFetched {
        cluster: String,
        entity_type: EntityType,
        count: usize,
        elapsed_ms: u64,
    },
    /// A fetch finished after a newer one was started, its result was dropped
    FetchDiscarded {
        cluster: String,
        entity_type: EntityType,
    },
}

/// Global progress reporter
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressUpdate>,
    /// Count of checked clusters for the current batch
    clusters_done: AtomicUsize,
    /// Total clusters in the current batch
    clusters_total: AtomicUsize,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            clusters_done: AtomicUsize::new(0),
            clusters_total: AtomicUsize::new(0),
        }
    }

    /// Subscribe to progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    /// Report the start of a batch health check
    pub fn checking_clusters(&self, count: usize) {
        self.clusters_done.store(0, Ordering::SeqCst);
        self.clusters_total.store(count, Ordering::SeqCst);
        let _ = self
            .sender
            .send(ProgressUpdate::CheckingClusters { count });
    }

    /// Report one cluster's health check result
    pub fn cluster_checked(&self, cluster: &str, status: ClusterStatus, elapsed_ms: u64) {
        self.clusters_done.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(ProgressUpdate::ClusterChecked {
            cluster: cluster.to_string(),
            status,
            elapsed_ms,
        });
    }

    pub fn refreshing_token(&self, cluster: &str) {
        let _ = self.sender.send(ProgressUpdate::RefreshingToken {
            cluster: cluster.to_string(),
        });
    }

    pub fn token_refreshed(&self, cluster: &str, elapsed_ms: u64) {
        let _ = self.sender.send(ProgressUpdate::TokenRefreshed {
            cluster: cluster.to_string(),
            elapsed_ms,
        });
    }

    pub fn fetching_entities(&self, cluster: &str, entity_type: EntityType) {
        let _ = self.sender.send(ProgressUpdate::FetchingEntities {
            cluster: cluster.to_string(),
            entity_type,
        });
    }

    pub fn entities_fetched(
        &self,
        cluster: &str,
        entity_type: EntityType,
        count: usize,
        elapsed_ms: u64,
    ) {
        let _ = self.sender.send(ProgressUpdate::EntitiesFetched {
            cluster: cluster.to_string(),
            entity_type,
            count,
            elapsed_ms,
        });
    }

    pub fn fetch_discarded(&self, cluster: &str, entity_type: EntityType) {
        let _ = self.sender.send(ProgressUpdate::FetchDiscarded {
            cluster: cluster.to_string(),
            entity_type,
        });
    }

    /// Get current health check progress (done/total)
    pub fn progress(&self) -> (usize, usize) {
        (
            self.clusters_done.load(Ordering::SeqCst),
            self.clusters_total.load(Ordering::SeqCst),
        )
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to progress reporter
pub type ProgressHandle = Arc<ProgressReporter>;

/// Create a new progress reporter handle
pub fn create_progress_handle() -> ProgressHandle {
    Arc::new(ProgressReporter::new())
}

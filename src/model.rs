// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Core data types shared by the registry, cache and session coordinator.
//!
//! A [`Cluster`] is identified by its API server url and carries its own
//! session state (token, expiry, health status, namespace list). An
//! [`EntityRecord`] is one pod or service as returned by the cluster API,
//! tagged with the [`EntityType`] it was fetched as.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Sentinel namespace name meaning "do not filter by namespace"
pub const ALL_NAMESPACES: &str = "All Namespaces";

/// Cloud provider a cluster was registered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Gcp,
}

impl CloudProvider {
    pub const ALL: [CloudProvider; 2] = [CloudProvider::Aws, CloudProvider::Gcp];

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Gcp => "gcp",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aws" | "eks" => Ok(CloudProvider::Aws),
            "gcp" | "gke" | "google" => Ok(CloudProvider::Gcp),
            other => Err(format!("unknown cloud provider '{}' (expected aws or gcp)", other)),
        }
    }
}

/// Reachability status of a cluster, as last observed by a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    #[default]
    Unknown,
    Checking,
    Running,
    Down,
    Unauthorized,
}

/// Display severity for a cluster status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    Success,
    Warning,
    Error,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Unknown => "UNKNOWN",
            ClusterStatus::Checking => "CHECKING",
            ClusterStatus::Running => "RUNNING",
            ClusterStatus::Down => "DOWN",
            ClusterStatus::Unauthorized => "UNAUTHORIZED",
        }
    }

    pub fn badge(&self) -> Badge {
        match self {
            ClusterStatus::Running => Badge::Success,
            ClusterStatus::Down | ClusterStatus::Unauthorized => Badge::Error,
            ClusterStatus::Unknown | ClusterStatus::Checking => Badge::Warning,
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespace selection for a cluster: a concrete namespace or all of them
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NamespaceFilter {
    #[default]
    All,
    Named(String),
}

impl NamespaceFilter {
    /// Check whether an entity in `namespace` passes this filter
    pub fn matches(&self, namespace: Option<&str>) -> bool {
        match self {
            NamespaceFilter::All => true,
            NamespaceFilter::Named(name) => namespace == Some(name.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NamespaceFilter::All => ALL_NAMESPACES,
            NamespaceFilter::Named(name) => name,
        }
    }
}

impl From<&str> for NamespaceFilter {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s == ALL_NAMESPACES {
            NamespaceFilter::All
        } else {
            NamespaceFilter::Named(s.to_string())
        }
    }
}

impl From<String> for NamespaceFilter {
    fn from(s: String) -> Self {
        NamespaceFilter::from(s.as_str())
    }
}

impl From<NamespaceFilter> for String {
    fn from(filter: NamespaceFilter) -> Self {
        match filter {
            NamespaceFilter::All => ALL_NAMESPACES.to_string(),
            NamespaceFilter::Named(name) => name,
        }
    }
}

impl fmt::Display for NamespaceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered cluster and its session state
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// API server url, the unique key of the cluster
    pub url: String,
    pub name: String,
    pub cloud_provider: CloudProvider,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub current_namespace: NamespaceFilter,
}

impl Cluster {
    pub fn new(url: impl Into<String>, name: impl Into<String>, provider: CloudProvider) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            cloud_provider: provider,
            status: ClusterStatus::Unknown,
            token: None,
            token_expiration: None,
            namespaces: Vec::new(),
            current_namespace: NamespaceFilter::All,
        }
    }

    /// Whether the stored token can be used without a refresh.
    ///
    /// AWS tokens never carry an expiry and are valid once minted. Other
    /// providers need an expiry more than `margin` in the future.
    pub fn has_valid_session(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        if self.token.is_none() {
            return false;
        }
        if self.cloud_provider == CloudProvider::Aws {
            return true;
        }
        match self.token_expiration {
            Some(expiration) => match (expiration - now).to_std() {
                Ok(remaining) => remaining > margin,
                // Already expired
                Err(_) => false,
            },
            None => false,
        }
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("url", &self.url)
            .field("name", &self.name)
            .field("cloud_provider", &self.cloud_provider)
            .field("status", &self.status)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_expiration", &self.token_expiration)
            .field("namespaces", &self.namespaces)
            .field("current_namespace", &self.current_namespace)
            .finish()
    }
}

/// Resource types that can be browsed and deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Pods,
    Services,
}

impl EntityType {
    pub const ALL: [EntityType; 2] = [EntityType::Pods, EntityType::Services];

    /// Plural resource name as used in API paths
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Pods => "pods",
            EntityType::Services => "services",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Pods => "Pods",
            EntityType::Services => "Services",
        }
    }

    /// The `kind` the API server reports for objects of this type
    pub fn kind(&self) -> &'static str {
        match self {
            EntityType::Pods => "Pod",
            EntityType::Services => "Service",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pods" | "pod" | "po" => Ok(EntityType::Pods),
            "services" | "service" | "svc" => Ok(EntityType::Services),
            other => Err(format!("unknown entity type '{}' (expected pods or services)", other)),
        }
    }
}

/// One cached resource object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub uid: String,
    /// The entity type this record was fetched as
    pub kind: EntityType,
    /// Object exactly as returned by the API server
    pub object: serde_json::Value,
}

impl EntityRecord {
    /// Build a record from a raw API object. Returns None when the object has
    /// no `metadata.uid` to key it by.
    pub fn from_object(object: serde_json::Value, kind: EntityType) -> Option<Self> {
        let uid = object
            .pointer("/metadata/uid")
            .and_then(|v| v.as_str())
            .filter(|uid| !uid.is_empty())?
            .to_string();
        Some(Self { uid, kind, object })
    }

    pub fn name(&self) -> Option<&str> {
        self.object.pointer("/metadata/name").and_then(|v| v.as_str())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object
            .pointer("/metadata/namespace")
            .and_then(|v| v.as_str())
    }
}

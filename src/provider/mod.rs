// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Contracts for the remote collaborators the session coordinator drives
//!
//! [`ProviderAuthClient`] turns stored provider credentials into a cluster
//! bearer token. [`K8sApi`] performs the raw cluster calls. Both are plain
//! async traits so tests can substitute scripted fakes.

mod aws;
mod gcp;

pub use aws::AwsCliAuth;
pub use gcp::GcpOAuthAuth;

use async_trait::async_trait;
use std::time::Duration;

use crate::credentials::ProviderCredentials;
use crate::error::SessionError;
use crate::model::{Cluster, ClusterStatus, EntityRecord, EntityType};

/// Response body marker the API server sends for rejected credentials
pub const UNAUTHORIZED_RESPONSE: &str = "Unauthorized";

/// A bearer token as issued by a provider
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// Lifetime reported by the provider, if any
    pub expires_in: Option<Duration>,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[async_trait]
pub trait ProviderAuthClient: Send + Sync {
    fn provider(&self) -> crate::model::CloudProvider;

    /// Obtain a token for `cluster`: minted locally from access keys (AWS)
    /// or exchanged for a refresh credential (GCP).
    async fn issue_token(
        &self,
        cluster: &Cluster,
        credentials: &ProviderCredentials,
    ) -> Result<IssuedToken, SessionError>;
}

/// Outcome of a reachability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub up: bool,
    /// Body or reason returned by the server, when the probe failed
    pub response: Option<String>,
}

impl ProbeResult {
    pub fn up() -> Self {
        Self {
            up: true,
            response: None,
        }
    }

    pub fn down(response: impl Into<String>) -> Self {
        Self {
            up: false,
            response: Some(response.into()),
        }
    }

    pub fn status(&self) -> ClusterStatus {
        if self.response.as_deref() == Some(UNAUTHORIZED_RESPONSE) {
            ClusterStatus::Unauthorized
        } else if self.up {
            ClusterStatus::Running
        } else {
            ClusterStatus::Down
        }
    }
}

/// What the API server returned for a delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResponse {
    pub kind: Option<String>,
    pub uid: Option<String>,
}

impl DeleteResponse {
    /// Extract kind and uid from a delete response body.
    ///
    /// The server answers either with the deleted object or with a `Status`
    /// whose `details` name the resource. A successful `Status` is reported
    /// with the singular kind of the resource it describes.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let kind = value.get("kind").and_then(|v| v.as_str());
        if kind == Some("Status") {
            let success = value.get("status").and_then(|v| v.as_str()) == Some("Success");
            let details_kind = value
                .pointer("/details/kind")
                .and_then(|v| v.as_str())
                .map(|k| match k.parse::<EntityType>() {
                    Ok(entity_type) => entity_type.kind().to_string(),
                    Err(_) => k.to_string(),
                });
            return Self {
                kind: if success { details_kind } else { Some("Status".to_string()) },
                uid: value
                    .pointer("/details/uid")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            };
        }

        Self {
            kind: kind.map(String::from),
            uid: value
                .pointer("/metadata/uid")
                .and_then(|v| v.as_str())
                .map(String::from),
        }
    }

    pub fn confirms(&self, entity_type: EntityType) -> bool {
        self.kind.as_deref() == Some(entity_type.kind())
    }
}

#[async_trait]
pub trait K8sApi: Send + Sync {
    /// Lightweight reachability probe
    async fn check_cluster(&self, cluster: &Cluster) -> Result<ProbeResult, SessionError>;

    async fn fetch_namespaces(&self, cluster: &Cluster) -> Result<Vec<String>, SessionError>;

    /// List all objects of a type across namespaces. Each item carries at
    /// least `metadata.uid` and `metadata.namespace`.
    async fn fetch_entities(
        &self,
        cluster: &Cluster,
        entity_type: EntityType,
    ) -> Result<Vec<serde_json::Value>, SessionError>;

    async fn delete_entity(
        &self,
        cluster: &Cluster,
        entity: &EntityRecord,
        entity_type: EntityType,
    ) -> Result<DeleteResponse, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_probe_status_mapping() {
        assert_eq!(ProbeResult::up().status(), ClusterStatus::Running);
        assert_eq!(ProbeResult::down("connection refused").status(), ClusterStatus::Down);
        assert_eq!(
            ProbeResult::down(UNAUTHORIZED_RESPONSE).status(),
            ClusterStatus::Unauthorized
        );
    }

    #[test]
    fn test_delete_response_from_object() {
        let body = json!({"kind": "Pod", "apiVersion": "v1", "metadata": {"uid": "u-1", "name": "web"}});
        let response = DeleteResponse::from_value(&body);
        assert_eq!(response.kind.as_deref(), Some("Pod"));
        assert_eq!(response.uid.as_deref(), Some("u-1"));
        assert!(response.confirms(EntityType::Pods));
        assert!(!response.confirms(EntityType::Services));
    }

    #[test]
    fn test_delete_response_from_success_status() {
        let body = json!({
            "kind": "Status",
            "status": "Success",
            "details": {"name": "web", "kind": "services", "uid": "u-2"}
        });
        let response = DeleteResponse::from_value(&body);
        assert_eq!(response.kind.as_deref(), Some("Service"));
        assert_eq!(response.uid.as_deref(), Some("u-2"));
        assert!(response.confirms(EntityType::Services));
    }

    #[test]
    fn test_delete_response_from_failure_status() {
        let body = json!({
            "kind": "Status",
            "status": "Failure",
            "details": {"name": "web", "kind": "pods"}
        });
        let response = DeleteResponse::from_value(&body);
        assert!(!response.confirms(EntityType::Pods));
    }

    #[test]
    fn test_issued_token_debug_redacted() {
        let token = IssuedToken {
            token: "ya29.secret".to_string(),
            expires_in: Some(Duration::from_secs(3600)),
        };
        assert!(!format!("{:?}", token).contains("ya29"));
    }
}

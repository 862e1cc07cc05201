// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! EKS token minting through the AWS CLI
//!
//! `aws eks get-token` presigns an STS GetCallerIdentity request locally and
//! prints it as a client.authentication.k8s.io ExecCredential.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use tokio::process::Command;
use tracing::debug;

use super::{IssuedToken, ProviderAuthClient};
use crate::credentials::{AwsCredentials, ProviderCredentials};
use crate::error::SessionError;
use crate::model::{CloudProvider, Cluster};

/// stderr fragments the CLI prints when STS rejects the access keys
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "AccessDenied",
    "UnrecognizedClientException",
];

const CONNECTIVITY_FAILURE_MARKERS: &[&str] = &[
    "Could not connect to the endpoint URL",
    "EndpointConnectionError",
    "Connect timeout",
];

#[derive(Debug, Deserialize)]
struct ExecCredential {
    status: ExecCredentialStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialStatus {
    token: String,
}

#[derive(Debug, Clone)]
pub struct AwsCliAuth {
    cli: String,
}

impl AwsCliAuth {
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    fn command(&self, cluster: &Cluster, credentials: &AwsCredentials) -> Command {
        let mut cmd = Command::new(&self.cli);
        cmd.args([
            "eks",
            "get-token",
            "--cluster-name",
            cluster.name.as_str(),
            "--region",
            credentials.region.as_str(),
            "--output",
            "json",
        ])
        .env("AWS_ACCESS_KEY_ID", &credentials.access_key_id)
        .env("AWS_SECRET_ACCESS_KEY", &credentials.secret_access_key)
        // Keep profiles from the environment out of the way
        .env_remove("AWS_PROFILE")
        .kill_on_drop(true);

        match &credentials.session_token {
            Some(session_token) => cmd.env("AWS_SESSION_TOKEN", session_token),
            None => cmd.env_remove("AWS_SESSION_TOKEN"),
        };
        cmd
    }
}

impl Default for AwsCliAuth {
    fn default() -> Self {
        Self::new("aws")
    }
}

#[async_trait]
impl ProviderAuthClient for AwsCliAuth {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    async fn issue_token(
        &self,
        cluster: &Cluster,
        credentials: &ProviderCredentials,
    ) -> Result<IssuedToken, SessionError> {
        let ProviderCredentials::Aws(aws) = credentials else {
            return Err(SessionError::MissingCredentials(CloudProvider::Aws));
        };

        debug!(cluster = %cluster.url, name = %cluster.name, region = %aws.region, "Minting EKS token");
        let output = self
            .command(cluster, aws)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    SessionError::Provider(format!("'{}' not found in PATH", self.cli))
                }
                _ => SessionError::Provider(format!("failed to run '{}': {}", self.cli, e)),
            })?;

        if !output.status.success() {
            return Err(classify_cli_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        parse_exec_credential(&output.stdout)
    }
}

fn classify_cli_failure(stderr: &str) -> SessionError {
    let message = stderr.trim().to_string();
    if AUTH_FAILURE_MARKERS.iter().any(|m| stderr.contains(m)) {
        SessionError::Auth(message)
    } else if CONNECTIVITY_FAILURE_MARKERS.iter().any(|m| stderr.contains(m)) {
        SessionError::Connectivity(message)
    } else {
        SessionError::Provider(message)
    }
}

/// EKS tokens are treated as non-expiring once minted, so the credential's
/// expirationTimestamp is not carried over.
fn parse_exec_credential(stdout: &[u8]) -> Result<IssuedToken, SessionError> {
    let credential: ExecCredential = serde_json::from_slice(stdout)
        .map_err(|e| SessionError::Provider(format!("unreadable ExecCredential: {}", e)))?;
    if credential.status.token.is_empty() {
        return Err(SessionError::Provider("ExecCredential has an empty token".to_string()));
    }
    Ok(IssuedToken {
        token: credential.status.token,
        expires_in: None,
    })
}

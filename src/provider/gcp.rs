// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! GKE access tokens from a Google OAuth refresh credential

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{IssuedToken, ProviderAuthClient};
use crate::credentials::ProviderCredentials;
use crate::error::SessionError;
use crate::model::{CloudProvider, Cluster};

/// OAuth error codes that mean the refresh credential itself is no good
const AUTH_ERROR_CODES: &[&str] = &["invalid_grant", "invalid_client", "unauthorized_client"];

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GcpOAuthAuth {
    http: reqwest::Client,
    token_endpoint: String,
}

impl GcpOAuthAuth {
    pub fn new(token_endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Provider(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            token_endpoint: token_endpoint.into(),
        })
    }
}

#[async_trait]
impl ProviderAuthClient for GcpOAuthAuth {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Gcp
    }

    async fn issue_token(
        &self,
        cluster: &Cluster,
        credentials: &ProviderCredentials,
    ) -> Result<IssuedToken, SessionError> {
        let ProviderCredentials::Gcp(gcp) = credentials else {
            return Err(SessionError::MissingCredentials(CloudProvider::Gcp));
        };

        debug!(cluster = %cluster.url, endpoint = %self.token_endpoint, "Refreshing GCP access token");
        let request = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token: &gcp.refresh_token,
            client_id: &gcp.client_id,
            client_secret: gcp.client_secret.as_deref(),
        };

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&request)
            .send()
            .await
            .map_err(SessionError::from)?;

        let status = response.status();
        let body = response.text().await.map_err(SessionError::from)?;

        if !status.is_success() {
            let err = classify_refresh_failure(status, &body);
            warn!(cluster = %cluster.url, status = %status, error = %err, "Token refresh rejected");
            return Err(err);
        }

        parse_token_response(&body)
    }
}

fn classify_refresh_failure(status: StatusCode, body: &str) -> SessionError {
    let detail = match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(parsed) => {
            if AUTH_ERROR_CODES.contains(&parsed.error.as_str()) {
                return SessionError::Auth(match parsed.error_description {
                    Some(desc) => format!("{}: {}", parsed.error, desc),
                    None => parsed.error,
                });
            }
            parsed.error
        }
        Err(_) => format!("HTTP {}", status.as_u16()),
    };

    match status.as_u16() {
        400 | 401 | 403 => SessionError::Auth(detail),
        408 | 429 | 500..=599 => SessionError::Connectivity(detail),
        _ => SessionError::Provider(detail),
    }
}

fn parse_token_response(body: &str) -> Result<IssuedToken, SessionError> {
    let parsed: TokenResponse = serde_json::from_str(body)
        .map_err(|e| SessionError::Provider(format!("unexpected token response: {}", e)))?;
    if parsed.access_token.is_empty() {
        return Err(SessionError::Provider("token response has an empty access_token".to_string()));
    }
    Ok(IssuedToken {
        token: parsed.access_token,
        expires_in: parsed.expires_in.map(Duration::from_secs),
    })
}

// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Failure taxonomy for remote operations.

use crate::model::CloudProvider;

/// Errors returned by the session coordinator and query facade.
///
/// Cloneable so a single token refresh outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Network failure or timeout. Retryable.
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// Credential rejected or expired. Needs re-authentication.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// The remote object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or unexpected response from a provider
    #[error("provider error: {0}")]
    Provider(String),

    #[error("cluster '{0}' is not registered")]
    UnknownCluster(String),

    #[error("no {0} credentials configured")]
    MissingCredentials(CloudProvider),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Connectivity(_))
    }

    /// Whether the user has to log in again before retrying
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            SessionError::Auth(_) | SessionError::MissingCredentials(_)
        )
    }

    pub fn timeout(what: &str, after: std::time::Duration) -> Self {
        SessionError::Connectivity(format!("{} timed out after {}s", what, after.as_secs()))
    }
}

impl From<kube::Error> for SessionError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(api_err) => match api_err.code {
                401 | 403 => SessionError::Auth(api_err.message.clone()),
                404 => SessionError::NotFound(api_err.message.clone()),
                408 | 429 | 500..=599 => SessionError::Connectivity(api_err.message.clone()),
                _ => SessionError::Provider(format!("{} ({})", api_err.message, api_err.code)),
            },
            kube::Error::HyperError(_) | kube::Error::Service(_) => {
                SessionError::Connectivity(err.to_string())
            }
            kube::Error::Auth(_) => SessionError::Auth(err.to_string()),
            _ => SessionError::Provider(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            SessionError::Connectivity(err.to_string())
        } else if err.is_decode() {
            SessionError::Provider(err.to_string())
        } else {
            match err.status().map(|s| s.as_u16()) {
                Some(401) | Some(403) => SessionError::Auth(err.to_string()),
                Some(404) => SessionError::NotFound(err.to_string()),
                _ => SessionError::Provider(err.to_string()),
            }
        }
    }
}

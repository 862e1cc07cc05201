// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Per-provider credentials
//!
//! One credential blob per cloud provider. Blobs are stored and persisted
//! independently so a broken one never prevents loading the others.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::model::CloudProvider;

/// Static AWS access keys used to mint EKS tokens
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub region: String,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}

/// Google OAuth refresh credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcpCredentials {
    pub refresh_token: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl fmt::Debug for GcpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpCredentials")
            .field("refresh_token", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderCredentials {
    Aws(AwsCredentials),
    Gcp(GcpCredentials),
}

impl ProviderCredentials {
    pub fn provider(&self) -> CloudProvider {
        match self {
            ProviderCredentials::Aws(_) => CloudProvider::Aws,
            ProviderCredentials::Gcp(_) => CloudProvider::Gcp,
        }
    }
}

#[derive(Debug, Default)]
pub struct CredentialStore {
    credentials: RwLock<HashMap<CloudProvider, ProviderCredentials>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, provider: CloudProvider) -> Option<ProviderCredentials> {
        self.credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&provider)
            .cloned()
    }

    /// Store credentials under the provider they belong to
    pub fn set(&self, credentials: ProviderCredentials) {
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credentials.provider(), credentials);
    }

    pub fn remove(&self, provider: CloudProvider) -> Option<ProviderCredentials> {
        self.credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&provider)
    }
}

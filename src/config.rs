// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Configuration persistence for kubedeck
//!
//! All kubedeck data is stored under ~/.kubedeck/:
//! - ~/.kubedeck/config.json - timeouts and provider endpoints
//! - ~/.kubedeck/state/ - registered clusters and provider credentials
//! - ~/.kubedeck/log/ - log files

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::SessionSettings;

/// Default Google OAuth token endpoint used for refresh-token grants
pub const DEFAULT_GCP_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Get the base kubedeck directory (~/.kubedeck/)
pub fn base_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".kubedeck"))
        .context("Could not determine home directory")
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_safety_margin() -> u64 {
    60
}

fn default_gcp_token_lifetime() -> u64 {
    3600
}

fn default_gcp_token_endpoint() -> String {
    DEFAULT_GCP_TOKEN_ENDPOINT.to_string()
}

fn default_aws_cli() -> String {
    "aws".to_string()
}

/// kubedeck configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound for any single remote call (probe, token issue, list, delete)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// TCP connect timeout for cluster API connections
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Tokens closer than this to expiry are refreshed before use
    #[serde(default = "default_safety_margin")]
    pub token_safety_margin_secs: u64,

    /// Lifetime assigned to a freshly refreshed GCP access token
    #[serde(default = "default_gcp_token_lifetime")]
    pub gcp_token_lifetime_secs: u64,

    /// Skip TLS verification of cluster API servers
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default = "default_gcp_token_endpoint")]
    pub gcp_token_endpoint: String,

    /// Path or name of the AWS CLI used to mint EKS tokens
    #[serde(default = "default_aws_cli")]
    pub aws_cli: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            token_safety_margin_secs: default_safety_margin(),
            gcp_token_lifetime_secs: default_gcp_token_lifetime(),
            accept_invalid_certs: false,
            gcp_token_endpoint: default_gcp_token_endpoint(),
            aws_cli: default_aws_cli(),
        }
    }
}

impl Config {
    /// Load config from disk, or return default if not found
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Reject values that would make every remote call or token unusable
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        if self.connect_timeout_secs == 0 {
            bail!("connect_timeout_secs must be greater than zero");
        }
        if self.gcp_token_lifetime_secs <= self.token_safety_margin_secs {
            bail!(
                "gcp_token_lifetime_secs ({}) must exceed token_safety_margin_secs ({})",
                self.gcp_token_lifetime_secs,
                self.token_safety_margin_secs
            );
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get the config file path (~/.kubedeck/config.json)
    pub fn config_path() -> Result<PathBuf> {
        Ok(base_dir()?.join("config.json"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Values the session coordinator needs
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            safety_margin: Duration::from_secs(self.token_safety_margin_secs),
            gcp_token_lifetime: Duration::from_secs(self.gcp_token_lifetime_secs),
            request_timeout: self.request_timeout(),
        }
    }
}

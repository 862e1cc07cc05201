// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use clap::{Parser, Subcommand, ValueEnum};
use kubedeck::model::{CloudProvider, EntityType};

#[derive(Parser, Debug)]
#[command(name = "kubedeck")]
#[command(author, version, about = "Browse and manage pods and services across EKS and GKE clusters")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Omit column headers in output
    #[arg(long, global = true)]
    pub no_headers: bool,

    /// Enable verbose logging (also to stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List registered clusters
    Clusters {
        /// Only show clusters of this provider
        #[arg(short, long, value_parser = parse_provider)]
        provider: Option<CloudProvider>,
    },

    /// Register a cluster (or update an existing one with the same url)
    Add {
        /// API server url, e.g. https://203.0.113.10
        #[arg(long)]
        url: String,

        /// Cluster name; for EKS this must match the name AWS knows it by
        #[arg(long)]
        name: String,

        #[arg(short, long, value_parser = parse_provider)]
        provider: CloudProvider,
    },

    /// Remove a cluster and everything cached for it
    Remove {
        /// Cluster name or url
        cluster: String,
    },

    /// Probe every registered cluster and update its status
    Check,

    /// Fetch and list the namespaces of a cluster
    Namespaces {
        /// Cluster name or url
        cluster: String,
    },

    /// Select the namespace used to filter entities ("All Namespaces" for none)
    UseNamespace {
        /// Cluster name or url
        cluster: String,

        namespace: String,
    },

    /// List pods or services of a cluster
    Get {
        /// Cluster name or url
        cluster: String,

        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,

        /// Filter by namespace instead of the cluster's selected one
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Delete a pod or service
    Delete {
        /// Cluster name or url
        cluster: String,

        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,

        /// Object name
        name: String,

        #[arg(short, long)]
        namespace: Option<String>,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Store provider credentials
    Login {
        #[command(subcommand)]
        provider: LoginCommand,
    },

    /// Forget the stored credentials of a provider
    Logout {
        #[arg(value_parser = parse_provider)]
        provider: CloudProvider,
    },
}

#[derive(Subcommand, Debug)]
pub enum LoginCommand {
    /// AWS access keys used to mint EKS tokens
    Aws {
        #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
        access_key_id: String,

        #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
        secret_access_key: String,

        #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
        session_token: Option<String>,

        #[arg(long, env = "AWS_REGION")]
        region: String,
    },

    /// Google OAuth refresh token used to obtain GKE access tokens
    Gcp {
        #[arg(long, hide_env_values = true, env = "KUBEDECK_GCP_REFRESH_TOKEN")]
        refresh_token: String,

        #[arg(long)]
        client_id: String,

        #[arg(long, hide_env_values = true, env = "KUBEDECK_GCP_CLIENT_SECRET")]
        client_secret: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

fn parse_provider(s: &str) -> Result<CloudProvider, String> {
    s.parse()
}

fn parse_entity_type(s: &str) -> Result<EntityType, String> {
    s.parse()
}

// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod json;
mod table;

pub use json::JsonFormatter;
pub use table::TableFormatter;

use chrono::{DateTime, Utc};

use crate::cli::OutputFormat;
use kubedeck::cache::EntityView;
use kubedeck::facade::ClusterCheck;
use kubedeck::model::{Badge, Cluster, EntityRecord, EntityType};
use kubedeck::session::{SessionCoordinator, TokenState};

/// Rows ready for rendering. `badges` holds an optional severity per row,
/// applied to the `STATUS` column in table output.
#[derive(Debug, Clone)]
pub struct Listing {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub badges: Vec<Option<Badge>>,
}

impl Listing {
    fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
            badges: Vec::new(),
        }
    }

    fn push(&mut self, row: Vec<String>, badge: Option<Badge>) {
        self.rows.push(row);
        self.badges.push(badge);
    }

    pub fn format(&self, format: &OutputFormat, no_headers: bool) -> String {
        match format {
            OutputFormat::Table => TableFormatter::format(self, no_headers),
            OutputFormat::Json => JsonFormatter::format(self),
        }
    }

    /// Rows as JSON objects keyed by lowercased column name
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(col, val)| (col.to_lowercase(), serde_json::Value::String(val.clone())))
                    .collect();
                serde_json::Value::Object(map)
            })
            .collect()
    }

    pub fn clusters(clusters: &[Cluster], sessions: &SessionCoordinator) -> Self {
        let mut listing = Self::new(&["NAME", "PROVIDER", "STATUS", "SESSION", "NAMESPACE", "URL"]);
        for cluster in clusters {
            let session = sessions
                .token_state(&cluster.url)
                .map(token_state_label)
                .unwrap_or("-");
            listing.push(
                vec![
                    cluster.name.clone(),
                    cluster.cloud_provider.to_string(),
                    cluster.status.to_string(),
                    session.to_string(),
                    cluster.current_namespace.to_string(),
                    cluster.url.clone(),
                ],
                Some(cluster.status.badge()),
            );
        }
        listing
    }

    pub fn checks(checks: &[ClusterCheck]) -> Self {
        let mut listing = Self::new(&["URL", "STATUS", "ERROR"]);
        for check in checks {
            listing.push(
                vec![
                    check.url.clone(),
                    check.status.to_string(),
                    check
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_default(),
                ],
                Some(check.status.badge()),
            );
        }
        listing
    }

    pub fn namespaces(namespaces: &[String], selected: &str) -> Self {
        let mut listing = Self::new(&["NAMESPACE", "SELECTED"]);
        for namespace in namespaces {
            let marker = if namespace == selected { "*" } else { "" };
            listing.push(vec![namespace.clone(), marker.to_string()], None);
        }
        listing
    }

    pub fn entities(view: &EntityView, entity_type: EntityType, now: DateTime<Utc>) -> Self {
        let detail = match entity_type {
            EntityType::Pods => "IP",
            EntityType::Services => "CLUSTER-IP",
        };
        let mut listing = Self::new(&["NAMESPACE", "NAME", "STATUS", detail, "AGE", "UID"]);

        let mut records: Vec<&EntityRecord> = view.iter().collect();
        records.sort_by(|a, b| (a.namespace(), a.name()).cmp(&(b.namespace(), b.name())));

        for record in records {
            let (status, detail) = match entity_type {
                EntityType::Pods => (
                    field(record, "/status/phase"),
                    field(record, "/status/podIP"),
                ),
                EntityType::Services => (
                    field(record, "/spec/type"),
                    field(record, "/spec/clusterIP"),
                ),
            };
            let age = record
                .object
                .pointer("/metadata/creationTimestamp")
                .and_then(|v| v.as_str())
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|created| format_age(now, created.with_timezone(&Utc)))
                .unwrap_or_default();
            listing.push(
                vec![
                    record.namespace().unwrap_or_default().to_string(),
                    record.name().unwrap_or_default().to_string(),
                    status,
                    detail,
                    age,
                    record.uid.clone(),
                ],
                None,
            );
        }
        listing
    }
}

fn field(record: &EntityRecord, pointer: &str) -> String {
    record
        .object
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn token_state_label(state: TokenState) -> &'static str {
    match state {
        TokenState::NoToken => "none",
        TokenState::Valid => "valid",
        TokenState::Expiring => "expiring",
        TokenState::Refreshing => "refreshing",
        TokenState::Failed => "failed",
    }
}

/// kubectl-style age: 45s, 12m, 5h, 3d
fn format_age(now: DateTime<Utc>, created: DateTime<Utc>) -> String {
    let secs = (now - created).num_seconds().max(0);
    match secs {
        0..=119 => format!("{}s", secs),
        120..=7199 => format!("{}m", secs / 60),
        7200..=172_799 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

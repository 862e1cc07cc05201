// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use super::Listing;

pub struct JsonFormatter;

impl JsonFormatter {
    pub fn format(listing: &Listing) -> String {
        let rows = listing.to_json_rows();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }

    /// Raw API objects, as returned by the cluster
    pub fn format_objects<'a>(objects: impl Iterator<Item = &'a serde_json::Value>) -> String {
        let objects: Vec<&serde_json::Value> = objects.collect();
        serde_json::to_string_pretty(&objects).unwrap_or_else(|_| "[]".to_string())
    }
}

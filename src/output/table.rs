// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use std::borrow::Cow;

use comfy_table::{Cell, Color, Table, presets::ASCII_BORDERS_ONLY_CONDENSED};
use kubedeck::model::Badge;

use super::Listing;

/// Maximum width for free-form text columns
const MAX_TEXT_COLUMN_WIDTH: usize = 60;

/// Columns that should have width limits in table mode
const WIDE_COLUMNS: &[&str] = &["ERROR", "URL"];

const STATUS_COLUMN: &str = "STATUS";

/// Truncate a string to max_len chars, adding "..." if truncated
fn truncate_value(s: &str, max_len: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_len {
        Cow::Borrowed(s)
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        Cow::Owned(format!("{}...", truncated))
    }
}

fn badge_color(badge: Badge) -> Color {
    match badge {
        Badge::Success => Color::Green,
        Badge::Warning => Color::Yellow,
        Badge::Error => Color::Red,
    }
}

pub struct TableFormatter;

impl TableFormatter {
    pub fn format(listing: &Listing, no_headers: bool) -> String {
        if listing.rows.is_empty() {
            return "(0 rows)".to_string();
        }

        let mut table = Table::new();
        table.load_preset(ASCII_BORDERS_ONLY_CONDENSED);

        let status_col = listing.columns.iter().position(|c| c == STATUS_COLUMN);

        if !no_headers {
            table.set_header(&listing.columns);
        }

        for (row_idx, row) in listing.rows.iter().enumerate() {
            let badge = listing.badges.get(row_idx).copied().flatten();
            let cells: Vec<Cell> = row
                .iter()
                .enumerate()
                .map(|(idx, val)| {
                    let text = if WIDE_COLUMNS.contains(&listing.columns[idx].as_str()) {
                        truncate_value(val, MAX_TEXT_COLUMN_WIDTH)
                    } else {
                        Cow::Borrowed(val.as_str())
                    };
                    let cell = Cell::new(text);
                    match badge {
                        Some(badge) if Some(idx) == status_col => cell.fg(badge_color(badge)),
                        _ => cell,
                    }
                })
                .collect();
            table.add_row(cells);
        }

        let output = table.to_string();
        format!("{}\n({} rows)", output, listing.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(columns: &[&str], rows: Vec<Vec<String>>) -> Listing {
        let badges = vec![None; rows.len()];
        Listing {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            badges,
        }
    }

    #[test]
    fn test_truncate_value_short() {
        let result = truncate_value("hello", 10);
        assert_eq!(result, "hello");
        assert!(matches!(result, Cow::Borrowed(_)));
    }

    #[test]
    fn test_truncate_value_too_long() {
        let long = "this is a very long string that needs truncation";
        let result = truncate_value(long, 20);
        assert!(result.ends_with("..."));
        assert!(result.chars().count() <= 20);
        assert!(matches!(result, Cow::Owned(_)));
    }

    #[test]
    fn test_truncate_value_unicode() {
        let unicode = "日本語テストです長い文字列";
        let result = truncate_value(unicode, 8);
        assert!(result.chars().count() <= 8);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn test_empty_listing() {
        assert_eq!(TableFormatter::format(&listing(&["NAME"], vec![]), false), "(0 rows)");
    }

    #[test]
    fn test_error_column_truncated() {
        let out = TableFormatter::format(
            &listing(&["URL", "ERROR"], vec![vec!["https://a".to_string(), "e".repeat(80)]]),
            false,
        );
        assert!(!out.contains(&"e".repeat(80)));
        assert!(out.contains("..."));
        assert!(out.ends_with("(1 rows)"));
    }

    #[test]
    fn test_uid_column_not_truncated() {
        let out = TableFormatter::format(
            &listing(&["NAME", "UID"], vec![vec!["web".to_string(), "u".repeat(80)]]),
            false,
        );
        assert!(out.contains(&"u".repeat(80)));
    }

    #[test]
    fn test_no_headers() {
        let out = TableFormatter::format(
            &listing(&["NAMESPACE"], vec![vec!["default".to_string()]]),
            true,
        );
        assert!(!out.contains("NAMESPACE"));
        assert!(out.contains("default"));
    }
}

// src/pipeline/parse.rs

//! Line parser: raw operator input → pending item records.
//!
//! One record per non-empty line, `;`-separated into at most four fields:
//! `name; kind; location hint; tags`. Malformed lines are retained but
//! marked as errors so the operator sees every line accounted for; only an
//! entirely empty input aborts.

use std::collections::HashSet;

use crate::error::{AppError, Result};
use crate::models::{ItemKind, ItemRecord, ItemStatus};

/// Parse a raw text block into item records.
///
/// `line_number` is the 1-based position among non-empty lines, assigned
/// here once and never reassigned.
pub fn parse_items(raw: &str) -> Result<Vec<ItemRecord>> {
    let mut items = Vec::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let line_number = items.len() as u32 + 1;
        items.push(parse_line(line_number, line));
    }
    if items.is_empty() {
        return Err(AppError::EmptyInput);
    }
    Ok(items)
}

fn parse_line(line_number: u32, line: &str) -> ItemRecord {
    let mut fields = line.splitn(4, ';').map(str::trim);
    let name = fields.next().unwrap_or_default();
    let kind_raw = fields.next().unwrap_or_default();
    let kind = ItemKind::parse(kind_raw);
    let location_hint = fields
        .next()
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);
    let tags = parse_tags(fields.next().unwrap_or_default());

    let mut item = ItemRecord::new(line_number, line, kind, name, location_hint, tags);

    if name.is_empty() {
        item.set_status(ItemStatus::Error, "line has no name before the first ';'");
    } else if kind == ItemKind::Unknown {
        item.set_status(
            ItemStatus::Error,
            format!("unknown kind '{kind_raw}': expected 'restaurant' or 'dish'"),
        );
    }
    item
}

/// Comma-split, trim, lowercase, drop empties, dedup keeping first occurrence.
fn parse_tags(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

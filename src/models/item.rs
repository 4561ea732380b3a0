// src/models/item.rs

//! Item record tracked through the import pipeline.

use serde::{Deserialize, Serialize};

use super::place::PlaceCandidate;

/// Kind of catalog record an input line describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Restaurant,
    Dish,
    Unknown,
}

impl ItemKind {
    /// Parse a kind field case-insensitively. Anything unrecognized is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "restaurant" => ItemKind::Restaurant,
            "dish" => ItemKind::Dish,
            _ => ItemKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Restaurant => "restaurant",
            ItemKind::Dish => "dish",
            ItemKind::Unknown => "unknown",
        }
    }
}

/// Per-item pipeline state. Exactly one value at any time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Resolving,
    Ready,
    ReviewNeeded,
    AwaitingSelection,
    Duplicate,
    Skipped,
    Added,
    Error,
}

impl ItemStatus {
    /// Terminal states never transition again (except `Duplicate`,
    /// which becomes submission-eligible when force_submit is set).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Added | ItemStatus::Skipped | ItemStatus::Error | ItemStatus::Duplicate
        )
    }

    /// States that keep the run in its resolution phase.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ItemStatus::Pending | ItemStatus::Resolving | ItemStatus::AwaitingSelection
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Resolving => "resolving",
            ItemStatus::Ready => "ready",
            ItemStatus::ReviewNeeded => "review_needed",
            ItemStatus::AwaitingSelection => "awaiting_selection",
            ItemStatus::Duplicate => "duplicate",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Added => "added",
            ItemStatus::Error => "error",
        }
    }
}

/// Place and geography data attached to an item after resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedPlace {
    /// Formatted street address of the selected place
    pub address: String,

    /// External place identifier from the search service
    pub place_id: String,

    /// Latitude (None when the operator supplied the address manually)
    pub lat: Option<f64>,

    /// Longitude
    pub lng: Option<f64>,

    /// Catalog city id (None when geography lookup had no match)
    pub city_id: Option<u64>,

    /// Catalog city display name
    pub city_name: Option<String>,

    /// Catalog neighborhood id
    pub neighborhood_id: Option<u64>,

    /// Catalog neighborhood display name
    pub neighborhood_name: Option<String>,
}

/// Duplicate-classification outcome and the operator override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicateInfo {
    /// Whether the batched catalog check matched an existing record
    pub is_duplicate: bool,

    /// Id of the matching catalog record, when matched
    pub existing_id: Option<u64>,

    /// Operator override: submit even though flagged as duplicate
    pub force_submit: bool,
}

/// The unit of work, identity-stable across the whole run.
///
/// `line_number` is assigned once at parse time and never reassigned; every
/// later stage looks records up by `line_number`, never by array position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    /// 1-based position among non-empty input lines
    pub line_number: u32,

    /// Original input text, kept for diagnostics
    pub raw_line: String,

    /// Record kind parsed from the line
    pub kind: ItemKind,

    /// Record name
    pub name: String,

    /// City name (restaurant) or parent restaurant name (dish)
    pub location_hint: Option<String>,

    /// Normalized tags, deduplicated on ingestion
    pub tags: Vec<String>,

    /// Place/geography data, populated by the resolver
    pub resolved: Option<ResolvedPlace>,

    /// Candidate list parked on the record while awaiting operator selection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<PlaceCandidate>,

    /// Duplicate classification state
    #[serde(default)]
    pub duplicate: DuplicateInfo,

    /// Current pipeline state
    pub status: ItemStatus,

    /// Human-readable explanation of the current status
    pub message: Option<String>,

    /// Catalog id assigned by a successful submission
    pub final_id: Option<u64>,
}

impl ItemRecord {
    /// Create a fresh pending record for one parsed line.
    pub fn new(
        line_number: u32,
        raw_line: impl Into<String>,
        kind: ItemKind,
        name: impl Into<String>,
        location_hint: Option<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            line_number,
            raw_line: raw_line.into(),
            kind,
            name: name.into(),
            location_hint,
            tags,
            resolved: None,
            candidates: Vec::new(),
            duplicate: DuplicateInfo::default(),
            status: ItemStatus::Pending,
            message: None,
            final_id: None,
        }
    }

    /// Move the record to a new status with an explanatory message.
    pub fn set_status(&mut self, status: ItemStatus, message: impl Into<String>) {
        self.status = status;
        self.message = Some(message.into());
    }

    /// Whether the submitter may include this record in a chunk.
    ///
    /// Forcing a duplicate does not flip its status back to `Ready`;
    /// both flags coexist and this predicate is the single eligibility rule.
    pub fn is_eligible_for_submission(&self) -> bool {
        self.status == ItemStatus::Ready
            || (self.status == ItemStatus::Duplicate && self.duplicate.force_submit)
    }

    /// Append a warning to the message without changing status.
    pub fn append_warning(&mut self, warning: &str) {
        self.message = Some(match self.message.take() {
            Some(existing) => format!("{existing}; {warning}"),
            None => warning.to_string(),
        });
    }
}

/// Aggregate outcome of one run.
///
/// Always recomputed from the final record set, never mutated in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub added: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl RunSummary {
    /// Recompute the summary from a record set.
    ///
    /// Items still waiting on operator review when the run ends are counted
    /// as skipped: they were never submitted.
    pub fn from_items(items: &[ItemRecord]) -> Self {
        let mut summary = Self {
            total: items.len(),
            ..Self::default()
        };
        for item in items {
            match item.status {
                ItemStatus::Added => summary.added += 1,
                ItemStatus::Duplicate => summary.duplicates += 1,
                ItemStatus::Error => summary.errors += 1,
                ItemStatus::Skipped | ItemStatus::ReviewNeeded => summary.skipped += 1,
                _ => {}
            }
        }
        summary
    }
}

// src/pipeline/submit.rs

//! Chunked submission of eligible items to the catalog store.
//!
//! Chunks are submitted strictly sequentially so progress is monotonic and a
//! systemic failure shows up after the first chunk instead of being fired
//! blindly for all of them. Backend outcomes are merged back onto records by
//! `line_number`; matching by name exists only as a flagged fallback.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{ItemRecord, ItemStatus, RunSummary, SubmitterConfig};
use crate::services::{CatalogApi, SubmitItem, SubmitOutcome, SubmitOutcomeKind};
use crate::utils::normalize_key;

/// Progress snapshot emitted after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitProgress {
    /// Completed percentage, exactly 100 after the last chunk
    pub percent: u8,
    /// Items whose chunk has completed (success or failure)
    pub submitted: usize,
    /// Total eligible items in this run
    pub eligible: usize,
}

/// Submits eligible items in fixed-size chunks.
pub struct BatchSubmitter {
    catalog: Arc<dyn CatalogApi>,
    config: SubmitterConfig,
}

impl BatchSubmitter {
    pub fn new(catalog: Arc<dyn CatalogApi>, config: SubmitterConfig) -> Self {
        Self { catalog, config }
    }

    /// Submit every eligible item and return the recomputed run summary.
    ///
    /// Eligibility is `Ready`, or `Duplicate` with the operator's
    /// force-submit override. Completion, not success, drives progress: a
    /// failing chunk still advances the count and later chunks still run.
    pub async fn submit(
        &self,
        items: &mut [ItemRecord],
        mut on_progress: impl FnMut(SubmitProgress),
    ) -> Result<RunSummary> {
        // Ordered by line number, not insertion order, so retries are
        // deterministic.
        let mut eligible: Vec<u32> = items
            .iter()
            .filter(|item| item.is_eligible_for_submission())
            .map(|item| item.line_number)
            .collect();
        eligible.sort_unstable();

        let total = eligible.len();
        if total == 0 {
            on_progress(SubmitProgress {
                percent: 100,
                submitted: 0,
                eligible: 0,
            });
            return Ok(RunSummary::from_items(items));
        }

        let chunk_size = self.config.chunk_size.max(1);
        let mut submitted = 0usize;

        for chunk in eligible.chunks(chunk_size) {
            let payload: Vec<SubmitItem> = chunk
                .iter()
                .filter_map(|line| items.iter().find(|i| i.line_number == *line))
                .map(SubmitItem::from_record)
                .collect();

            match self.catalog.bulk_create(&payload).await {
                Ok(outcomes) => merge_outcomes(items, chunk, outcomes),
                Err(error) => {
                    // Transport failure: every item in this chunk shares the
                    // error; later chunks still attempt submission since the
                    // failure may be transient per chunk.
                    log::warn!("Bulk create request failed for a chunk: {error}");
                    let message = format!("bulk create request failed: {error}");
                    for line in chunk {
                        if let Some(item) = items.iter_mut().find(|i| i.line_number == *line) {
                            item.set_status(ItemStatus::Error, message.clone());
                        }
                    }
                }
            }

            submitted += chunk.len();
            on_progress(SubmitProgress {
                percent: (submitted * 100 / total) as u8,
                submitted,
                eligible: total,
            });
        }

        Ok(RunSummary::from_items(items))
    }
}

/// Merge one chunk's backend outcomes onto local records.
fn merge_outcomes(items: &mut [ItemRecord], chunk: &[u32], outcomes: Vec<SubmitOutcome>) {
    let mut settled: HashSet<u32> = HashSet::new();

    for outcome in outcomes {
        let (line, by_name) = match outcome.line_number {
            Some(line) if chunk.contains(&line) => (Some(line), false),
            Some(line) => {
                log::warn!("Bulk create reply references line {line} outside the chunk; ignored");
                (None, false)
            }
            None => {
                // Last-resort fallback when the backend omits line numbers.
                let found = outcome.name.as_deref().and_then(|name| {
                    let key = normalize_key(name);
                    chunk.iter().copied().find(|line| {
                        !settled.contains(line)
                            && items
                                .iter()
                                .any(|i| i.line_number == *line && normalize_key(&i.name) == key)
                    })
                });
                if found.is_some() {
                    log::warn!("Bulk create reply omitted line numbers; matched by name");
                }
                (found, true)
            }
        };

        let Some(line) = line else { continue };
        let Some(item) = items.iter_mut().find(|i| i.line_number == line) else {
            continue;
        };

        match outcome.outcome {
            SubmitOutcomeKind::Added => {
                item.final_id = outcome.final_id;
                item.set_status(
                    ItemStatus::Added,
                    outcome
                        .message
                        .unwrap_or_else(|| "added to the catalog".to_string()),
                );
            }
            SubmitOutcomeKind::Duplicate => {
                // Classification is fail-open, so a server-side duplicate
                // verdict here is still possible and authoritative.
                item.duplicate.is_duplicate = true;
                if outcome.existing_id.is_some() {
                    item.duplicate.existing_id = outcome.existing_id;
                }
                item.set_status(
                    ItemStatus::Duplicate,
                    match item.duplicate.existing_id {
                        Some(id) => format!("backend reported an existing record {id}"),
                        None => "backend reported an existing record".to_string(),
                    },
                );
            }
            SubmitOutcomeKind::Error => {
                item.set_status(
                    ItemStatus::Error,
                    outcome
                        .message
                        .unwrap_or_else(|| "backend rejected the item".to_string()),
                );
            }
        }
        if by_name {
            item.append_warning("matched to the backend reply by name, not line number");
        }
        settled.insert(line);
    }

    // A chunk item the backend said nothing about must not stay Ready.
    for line in chunk {
        if settled.contains(line) {
            continue;
        }
        if let Some(item) = items.iter_mut().find(|i| i.line_number == *line) {
            if item.is_eligible_for_submission() {
                item.set_status(
                    ItemStatus::Error,
                    "backend returned no outcome for this item",
                );
            }
        }
    }
}

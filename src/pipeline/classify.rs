// src/pipeline/classify.rs

//! Duplicate classification against the catalog store.
//!
//! One batched request covers every `Ready` item. The check fails open: a
//! failed call is treated as "no duplicates found" so a flaky backend never
//! silently drops data. `classifier.fail_closed` flips that policy.

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{ClassifierConfig, ItemRecord, ItemStatus};
use crate::services::{CatalogApi, ExistingQuery};

/// Marks resolved items that already exist in the catalog.
pub struct DuplicateClassifier {
    catalog: Arc<dyn CatalogApi>,
    config: ClassifierConfig,
}

impl DuplicateClassifier {
    pub fn new(catalog: Arc<dyn CatalogApi>, config: ClassifierConfig) -> Self {
        Self { catalog, config }
    }

    /// Run the batched duplicate check over all `Ready` items.
    ///
    /// Matched items move to `Duplicate` with the existing id recorded;
    /// unmatched items keep their status. A detected duplicate stays
    /// excluded from submission until the operator sets `force_submit`.
    pub async fn classify(&self, items: &mut [ItemRecord]) -> Result<()> {
        let queries: Vec<ExistingQuery> = items
            .iter()
            .filter(|item| item.status == ItemStatus::Ready)
            .map(|item| ExistingQuery {
                line_number: item.line_number,
                name: item.name.clone(),
                kind: item.kind,
                city_id: item.resolved.as_ref().and_then(|r| r.city_id),
            })
            .collect();

        if queries.is_empty() {
            return Ok(());
        }

        let matches = match self.catalog.check_existing(&queries).await {
            Ok(matches) => matches,
            Err(error) if self.config.fail_closed => {
                return Err(AppError::classification(error.to_string()));
            }
            Err(error) => {
                // Fail-open: proceed as if no duplicates were found. Logged
                // prominently because it weakens the duplicate guarantee.
                log::error!(
                    "Duplicate check failed, continuing without duplicate detection: {error}"
                );
                return Ok(());
            }
        };

        for m in matches {
            let Some(existing_id) = m.existing_id else {
                continue;
            };
            let Some(item) = items.iter_mut().find(|i| i.line_number == m.line_number) else {
                log::warn!(
                    "Duplicate check returned unknown line number {}",
                    m.line_number
                );
                continue;
            };
            if item.status != ItemStatus::Ready {
                continue;
            }
            item.duplicate.is_duplicate = true;
            item.duplicate.existing_id = Some(existing_id);
            item.set_status(
                ItemStatus::Duplicate,
                format!("already in the catalog as record {existing_id}"),
            );
        }
        Ok(())
    }
}

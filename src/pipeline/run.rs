// src/pipeline/run.rs

//! Pipeline orchestrator.
//!
//! `Pipeline` is the only type the caller (CLI or UI layer) talks to. It
//! owns the item records, the geography cache and the service handles,
//! drives items through parse → resolve → classify → submit, enforces the
//! per-item state machine, and emits incremental events so a caller can
//! render progress continuously.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{AppError, Result};
use crate::models::{
    Config, ItemRecord, ItemStatus, PlaceCandidate, ResolvedPlace, RunStatus, RunSummary,
};
use crate::pipeline::classify::DuplicateClassifier;
use crate::pipeline::parse::parse_items;
use crate::pipeline::resolve::{self, PlaceResolver};
use crate::pipeline::submit::{BatchSubmitter, SubmitProgress};
use crate::services::{
    CatalogApi, GeographyCache, GeographyLookup, HttpCatalogApi, HttpGeographyLookup,
    HttpPlaceSearch, PlaceSearch,
};
use crate::utils::extract_postal_code;

/// Incremental update emitted while a run progresses.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// An item changed status
    ItemChanged {
        line_number: u32,
        status: ItemStatus,
    },
    /// An item is parked and needs an operator selection
    SelectionNeeded { line_number: u32 },
    /// A submission chunk completed
    Progress(SubmitProgress),
    /// The run reached its final summary
    Finished(RunSummary),
}

/// Drives one bulk-import run at a time.
pub struct Pipeline {
    config: Config,
    places: Arc<dyn PlaceSearch>,
    geography: Arc<dyn GeographyLookup>,
    catalog: Arc<dyn CatalogApi>,
    items: Vec<ItemRecord>,
    cache: GeographyCache,
    /// Whether the duplicate check ran for the current run. Item states
    /// alone cannot distinguish "ready, pre-classification" from "ready,
    /// post-classification".
    classified: bool,
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl Pipeline {
    /// Create a pipeline over explicit service implementations.
    pub fn new(
        config: Config,
        places: Arc<dyn PlaceSearch>,
        geography: Arc<dyn GeographyLookup>,
        catalog: Arc<dyn CatalogApi>,
    ) -> Self {
        Self {
            config,
            places,
            geography,
            catalog,
            items: Vec::new(),
            cache: GeographyCache::new(),
            classified: false,
            events: None,
        }
    }

    /// Create a pipeline with HTTP clients built from the configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let shared = Arc::new(config.clone());
        let places = Arc::new(HttpPlaceSearch::new(Arc::clone(&shared))?);
        let geography = Arc::new(HttpGeographyLookup::new(Arc::clone(&shared))?);
        let catalog = Arc::new(HttpCatalogApi::new(shared)?);
        Ok(Self::new(config, places, geography, catalog))
    }

    /// Subscribe to incremental run events. Replaces any prior subscriber.
    pub fn subscribe(&mut self) -> UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver just means nobody is listening.
            let _ = events.send(event);
        }
    }

    fn emit_item(&self, line_number: u32, status: ItemStatus) {
        self.emit(PipelineEvent::ItemChanged {
            line_number,
            status,
        });
    }

    /// Start a new run: tear down prior state and parse the input.
    pub fn parse(&mut self, raw: &str) -> Result<()> {
        self.reset();
        self.items = parse_items(raw)?;
        for item in &self.items {
            self.emit(PipelineEvent::ItemChanged {
                line_number: item.line_number,
                status: item.status,
            });
        }
        Ok(())
    }

    /// Resolve every pending item; ambiguous items end up parked.
    pub async fn resolve_pending(&mut self) -> Result<()> {
        let resolver = PlaceResolver::new(Arc::clone(&self.places), self.config.resolver.clone());
        resolver
            .resolve_pending(&mut self.items, self.geography.as_ref(), &mut self.cache)
            .await?;

        for item in &self.items {
            self.emit(PipelineEvent::ItemChanged {
                line_number: item.line_number,
                status: item.status,
            });
            if item.status == ItemStatus::AwaitingSelection {
                self.emit(PipelineEvent::SelectionNeeded {
                    line_number: item.line_number,
                });
            }
        }
        Ok(())
    }

    /// Resume a parked item with the operator's choice.
    ///
    /// `None` cancels the item (→ `Skipped`). Only the given item moves;
    /// the rest of the run is unaffected.
    pub async fn select_place(
        &mut self,
        line_number: u32,
        candidate: Option<PlaceCandidate>,
    ) -> Result<()> {
        let index = self.item_index(line_number)?;
        if self.items[index].status != ItemStatus::AwaitingSelection {
            return Err(AppError::validation(format!(
                "item {line_number} is not awaiting selection"
            )));
        }

        match candidate {
            Some(candidate) => {
                resolve::apply_selection(
                    &mut self.items[index],
                    &candidate,
                    self.geography.as_ref(),
                    &mut self.cache,
                )
                .await;
            }
            None => {
                self.items[index].candidates.clear();
                self.items[index]
                    .set_status(ItemStatus::Skipped, "selection cancelled by operator");
            }
        }

        let status = self.items[index].status;
        self.emit_item(line_number, status);
        Ok(())
    }

    /// Operator supplies an address manually for a `ReviewNeeded` item.
    ///
    /// Geography is still derived from the address when it contains a
    /// postal code; there is no place id and no coordinates.
    pub async fn mark_reviewed(&mut self, line_number: u32, address: &str) -> Result<()> {
        let index = self.item_index(line_number)?;
        if self.items[index].status != ItemStatus::ReviewNeeded {
            return Err(AppError::validation(format!(
                "item {line_number} is not awaiting review"
            )));
        }

        let postal = extract_postal_code(address);
        let geo = match &postal {
            Some(code) => self.cache.lookup(self.geography.as_ref(), code).await,
            None => None,
        };

        let item = &mut self.items[index];
        item.resolved = Some(ResolvedPlace {
            address: address.to_string(),
            place_id: String::new(),
            lat: None,
            lng: None,
            city_id: geo.as_ref().map(|g| g.city_id),
            city_name: geo.as_ref().map(|g| g.city_name.clone()),
            neighborhood_id: geo.as_ref().map(|g| g.neighborhood_id),
            neighborhood_name: geo.as_ref().map(|g| g.neighborhood_name.clone()),
        });
        item.set_status(ItemStatus::Ready, "address supplied manually");
        if geo.is_none() {
            item.append_warning("no geography derived from the manual address");
        }

        self.emit_item(line_number, ItemStatus::Ready);
        Ok(())
    }

    /// Skip a parked or review-needed item.
    pub fn skip(&mut self, line_number: u32) -> Result<()> {
        let index = self.item_index(line_number)?;
        let item = &mut self.items[index];
        if !matches!(
            item.status,
            ItemStatus::AwaitingSelection | ItemStatus::ReviewNeeded
        ) {
            return Err(AppError::validation(format!(
                "item {line_number} cannot be skipped from state '{}'",
                item.status.as_str()
            )));
        }
        item.candidates.clear();
        item.set_status(ItemStatus::Skipped, "skipped by operator");
        self.emit_item(line_number, ItemStatus::Skipped);
        Ok(())
    }

    /// Operator override: submit a detected duplicate anyway.
    pub fn set_force_submit(&mut self, line_number: u32, force: bool) -> Result<()> {
        let index = self.item_index(line_number)?;
        self.items[index].duplicate.force_submit = force;
        let status = self.items[index].status;
        self.emit_item(line_number, status);
        Ok(())
    }

    /// Run the batched duplicate check over all ready items.
    pub async fn classify(&mut self) -> Result<()> {
        self.ensure_resolution_finished()?;
        let classifier =
            DuplicateClassifier::new(Arc::clone(&self.catalog), self.config.classifier.clone());
        classifier.classify(&mut self.items).await?;
        self.classified = true;

        for item in &self.items {
            if item.status == ItemStatus::Duplicate {
                self.emit(PipelineEvent::ItemChanged {
                    line_number: item.line_number,
                    status: item.status,
                });
            }
        }
        Ok(())
    }

    /// Submit the eligible item set and return the final summary.
    pub async fn submit(&mut self) -> Result<RunSummary> {
        self.ensure_resolution_finished()?;
        if !self.classified {
            return Err(AppError::validation(
                "run the duplicate check before submitting",
            ));
        }

        let submitter =
            BatchSubmitter::new(Arc::clone(&self.catalog), self.config.submitter.clone());
        let events = self.events.clone();
        let summary = submitter
            .submit(&mut self.items, |progress| {
                if let Some(events) = &events {
                    let _ = events.send(PipelineEvent::Progress(progress));
                }
            })
            .await?;

        for item in &self.items {
            self.emit(PipelineEvent::ItemChanged {
                line_number: item.line_number,
                status: item.status,
            });
        }
        self.emit(PipelineEvent::Finished(summary.clone()));
        Ok(summary)
    }

    /// Current item records, in input order.
    pub fn items(&self) -> &[ItemRecord] {
        &self.items
    }

    /// Line numbers currently parked for operator selection.
    pub fn awaiting_selection(&self) -> Vec<u32> {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::AwaitingSelection)
            .map(|i| i.line_number)
            .collect()
    }

    /// Derived run-level status.
    pub fn run_status(&self) -> RunStatus {
        if self.items.is_empty() {
            return RunStatus::Idle;
        }
        if self
            .items
            .iter()
            .any(|i| matches!(i.status, ItemStatus::Pending | ItemStatus::Resolving))
        {
            return RunStatus::Resolving;
        }
        if self
            .items
            .iter()
            .any(|i| i.status == ItemStatus::AwaitingSelection)
        {
            return RunStatus::AwaitingSelection;
        }
        if self.items.iter().any(|i| i.is_eligible_for_submission()) {
            return if self.classified {
                RunStatus::Submitting
            } else {
                RunStatus::Classifying
            };
        }
        RunStatus::Done
    }

    /// Summary recomputed from the current record set.
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_items(&self.items)
    }

    /// Discard all run state, including the geography cache.
    pub fn reset(&mut self) {
        self.items.clear();
        self.cache = GeographyCache::new();
        self.classified = false;
    }

    fn item_index(&self, line_number: u32) -> Result<usize> {
        self.items
            .iter()
            .position(|i| i.line_number == line_number)
            .ok_or_else(|| AppError::validation(format!("no item with line number {line_number}")))
    }

    /// The run cannot advance past resolution while any item is transient.
    fn ensure_resolution_finished(&self) -> Result<()> {
        if let Some(item) = self.items.iter().find(|i| i.status.is_transient()) {
            return Err(AppError::validation(format!(
                "item {} is still '{}'; resolution is not finished",
                item.line_number,
                item.status.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::models::Geography;
    use crate::services::{ExistingMatch, ExistingQuery, SubmitItem, SubmitOutcome, SubmitOutcomeKind};

    struct FakeSearch {
        responses: Vec<(String, Vec<PlaceCandidate>)>,
    }

    #[async_trait]
    impl PlaceSearch for FakeSearch {
        async fn search(&self, query: &str) -> crate::error::Result<Vec<PlaceCandidate>> {
            let query = query.to_lowercase();
            Ok(self
                .responses
                .iter()
                .find(|(part, _)| query.contains(&part.to_lowercase()))
                .map(|(_, candidates)| candidates.clone())
                .unwrap_or_default())
        }
    }

    struct FakeGeo;

    #[async_trait]
    impl GeographyLookup for FakeGeo {
        async fn lookup(&self, postal_code: &str) -> crate::error::Result<Option<Geography>> {
            if postal_code == "10014" {
                Ok(Some(Geography {
                    city_id: 1,
                    city_name: "New York".to_string(),
                    neighborhood_id: 3,
                    neighborhood_name: "West Village".to_string(),
                }))
            } else {
                Ok(None)
            }
        }
    }

    /// Catalog fake: configurable duplicate verdicts, records submitted
    /// line numbers, adds everything else with sequential ids.
    #[derive(Default)]
    struct FakeCatalog {
        duplicates: Vec<(u32, u64)>,
        submitted_lines: Mutex<Vec<u32>>,
        next_id: AtomicU64,
    }

    #[async_trait]
    impl CatalogApi for FakeCatalog {
        async fn check_existing(
            &self,
            items: &[ExistingQuery],
        ) -> crate::error::Result<Vec<ExistingMatch>> {
            Ok(items
                .iter()
                .map(|q| ExistingMatch {
                    line_number: q.line_number,
                    existing_id: self
                        .duplicates
                        .iter()
                        .find(|(line, _)| *line == q.line_number)
                        .map(|(_, id)| *id),
                })
                .collect())
        }

        async fn bulk_create(
            &self,
            items: &[SubmitItem],
        ) -> crate::error::Result<Vec<SubmitOutcome>> {
            let mut submitted = self.submitted_lines.lock().unwrap();
            Ok(items
                .iter()
                .map(|item| {
                    submitted.push(item.line_number);
                    SubmitOutcome {
                        line_number: Some(item.line_number),
                        name: Some(item.name.clone()),
                        outcome: SubmitOutcomeKind::Added,
                        final_id: Some(1000 + self.next_id.fetch_add(1, Ordering::SeqCst)),
                        existing_id: None,
                        message: None,
                    }
                })
                .collect())
        }
    }

    fn candidate(place_id: &str, name: &str) -> PlaceCandidate {
        PlaceCandidate {
            place_id: place_id.to_string(),
            name: name.to_string(),
            formatted_address: "7 Carmine St, New York, NY 10014".to_string(),
            lat: 40.73,
            lng: -74.0,
            rating: None,
            price_level: None,
            neighborhood_hint: None,
            postal_code: Some("10014".to_string()),
        }
    }

    fn pipeline_with(
        responses: Vec<(String, Vec<PlaceCandidate>)>,
        catalog: Arc<FakeCatalog>,
    ) -> Pipeline {
        Pipeline::new(
            Config::default(),
            Arc::new(FakeSearch { responses }),
            Arc::new(FakeGeo),
            catalog,
        )
    }

    #[tokio::test]
    async fn test_scenario_single_confident_line_ends_added() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(
            vec![(
                "joe's pizza".to_string(),
                vec![candidate("p-1", "Joe's Pizza")],
            )],
            catalog.clone(),
        );

        pipeline
            .parse("Joe's Pizza; restaurant; New York; pizza,italian")
            .unwrap();
        assert_eq!(pipeline.items()[0].status, ItemStatus::Pending);
        assert_eq!(pipeline.run_status(), RunStatus::Resolving);

        pipeline.resolve_pending().await.unwrap();
        assert_eq!(pipeline.items()[0].status, ItemStatus::Ready);
        let resolved = pipeline.items()[0].resolved.as_ref().unwrap();
        assert_eq!(resolved.city_id, Some(1));
        assert_eq!(resolved.neighborhood_id, Some(3));
        assert_eq!(pipeline.run_status(), RunStatus::Classifying);

        pipeline.classify().await.unwrap();
        assert_eq!(pipeline.run_status(), RunStatus::Submitting);

        let summary = pipeline.submit().await.unwrap();
        assert_eq!(pipeline.items()[0].status, ItemStatus::Added);
        assert!(pipeline.items()[0].final_id.is_some());
        assert_eq!(summary.added, 1);
        assert_eq!(pipeline.run_status(), RunStatus::Done);
    }

    #[tokio::test]
    async fn test_scenario_duplicate_excluded_unless_forced() {
        let catalog = Arc::new(FakeCatalog {
            duplicates: vec![(2, 555)],
            ..FakeCatalog::default()
        });
        let mut pipeline = pipeline_with(
            vec![(
                "joe's pizza".to_string(),
                vec![candidate("p-1", "Joe's Pizza")],
            )],
            catalog.clone(),
        );

        pipeline
            .parse("Joe's Pizza; restaurant; New York\nJoe's Pizza; restaurant; New York")
            .unwrap();
        pipeline.resolve_pending().await.unwrap();
        pipeline.classify().await.unwrap();

        assert_eq!(pipeline.items()[1].status, ItemStatus::Duplicate);
        assert_eq!(pipeline.items()[1].duplicate.existing_id, Some(555));

        pipeline.submit().await.unwrap();
        assert_eq!(*catalog.submitted_lines.lock().unwrap(), vec![1]);

        // Forcing makes it eligible again for the submission transition only.
        pipeline.set_force_submit(2, true).unwrap();
        assert_eq!(pipeline.items()[1].status, ItemStatus::Duplicate);
        let summary = pipeline.submit().await.unwrap();
        assert!(catalog.submitted_lines.lock().unwrap().contains(&2));
        assert_eq!(summary.added, 2);
    }

    #[tokio::test]
    async fn test_scenario_ambiguous_item_resumes_with_selection() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(
            vec![(
                "ambiguous place".to_string(),
                vec![
                    candidate("p-1", "Ambiguous Place North"),
                    candidate("p-2", "Ambiguous Place South"),
                    candidate("p-3", "Ambiguous Place East"),
                ],
            )],
            catalog,
        );

        pipeline
            .parse("Ambiguous Place; restaurant; New York")
            .unwrap();
        pipeline.resolve_pending().await.unwrap();

        assert_eq!(pipeline.run_status(), RunStatus::AwaitingSelection);
        assert_eq!(pipeline.awaiting_selection(), vec![1]);
        let chosen = pipeline.items()[0].candidates[1].clone();

        pipeline.select_place(1, Some(chosen.clone())).await.unwrap();
        let item = &pipeline.items()[0];
        assert_eq!(item.status, ItemStatus::Ready);
        assert_eq!(item.resolved.as_ref().unwrap().place_id, chosen.place_id);
        assert!(item.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_selection_skips_only_that_item() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(
            vec![
                (
                    "ambiguous place".to_string(),
                    vec![
                        candidate("p-1", "Ambiguous Place North"),
                        candidate("p-2", "Ambiguous Place South"),
                    ],
                ),
                (
                    "joe's pizza".to_string(),
                    vec![candidate("p-9", "Joe's Pizza")],
                ),
            ],
            catalog,
        );

        pipeline
            .parse("Ambiguous Place; restaurant; New York\nJoe's Pizza; restaurant; New York")
            .unwrap();
        pipeline.resolve_pending().await.unwrap();

        pipeline.select_place(1, None).await.unwrap();
        assert_eq!(pipeline.items()[0].status, ItemStatus::Skipped);
        assert_eq!(pipeline.items()[1].status, ItemStatus::Ready);

        pipeline.classify().await.unwrap();
        let summary = pipeline.submit().await.unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_selection_on_unparked_item_is_rejected() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(
            vec![(
                "joe's pizza".to_string(),
                vec![candidate("p-1", "Joe's Pizza")],
            )],
            catalog,
        );

        pipeline.parse("Joe's Pizza; restaurant; New York").unwrap();
        pipeline.resolve_pending().await.unwrap();

        let result = pipeline.select_place(1, Some(candidate("p-1", "Joe's Pizza"))).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_manual_review_supplies_address_and_geography() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(vec![], catalog);

        pipeline.parse("Hidden Gem; restaurant; New York").unwrap();
        pipeline.resolve_pending().await.unwrap();
        assert_eq!(pipeline.items()[0].status, ItemStatus::ReviewNeeded);

        pipeline
            .mark_reviewed(1, "12 Bedford St, New York, NY 10014")
            .await
            .unwrap();
        let item = &pipeline.items()[0];
        assert_eq!(item.status, ItemStatus::Ready);
        let resolved = item.resolved.as_ref().unwrap();
        assert!(resolved.place_id.is_empty());
        assert!(resolved.lat.is_none());
        assert_eq!(resolved.city_id, Some(1));
    }

    #[tokio::test]
    async fn test_submit_requires_classification_first() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(
            vec![(
                "joe's pizza".to_string(),
                vec![candidate("p-1", "Joe's Pizza")],
            )],
            catalog,
        );

        pipeline.parse("Joe's Pizza; restaurant; New York").unwrap();
        pipeline.resolve_pending().await.unwrap();

        assert!(matches!(
            pipeline.submit().await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_classify_rejected_while_items_parked() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(
            vec![(
                "ambiguous place".to_string(),
                vec![
                    candidate("p-1", "Ambiguous Place North"),
                    candidate("p-2", "Ambiguous Place South"),
                ],
            )],
            catalog,
        );

        pipeline
            .parse("Ambiguous Place; restaurant; New York")
            .unwrap();
        pipeline.resolve_pending().await.unwrap();

        assert!(matches!(
            pipeline.classify().await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_identity_stable_across_all_stages() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(
            vec![(
                "joe's pizza".to_string(),
                vec![candidate("p-1", "Joe's Pizza")],
            )],
            catalog,
        );

        let input = "Joe's Pizza; restaurant; New York\nBad Line; cafe; NYC\nMargherita; dish; Joe's Pizza";
        pipeline.parse(input).unwrap();
        let lines_before: Vec<u32> = pipeline.items().iter().map(|i| i.line_number).collect();

        pipeline.resolve_pending().await.unwrap();
        pipeline.classify().await.unwrap();
        pipeline.submit().await.unwrap();

        let lines_after: Vec<u32> = pipeline.items().iter().map(|i| i.line_number).collect();
        assert_eq!(lines_before, lines_after);
        assert_eq!(pipeline.summary().total, 3);
    }

    #[tokio::test]
    async fn test_events_cover_selection_progress_and_finish() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(
            vec![(
                "joe's pizza".to_string(),
                vec![candidate("p-1", "Joe's Pizza")],
            )],
            catalog,
        );
        let mut events = pipeline.subscribe();

        pipeline.parse("Joe's Pizza; restaurant; New York").unwrap();
        pipeline.resolve_pending().await.unwrap();
        pipeline.classify().await.unwrap();
        pipeline.submit().await.unwrap();

        let mut saw_progress = false;
        let mut saw_finished = false;
        while let Ok(event) = events.try_recv() {
            match event {
                PipelineEvent::Progress(p) => {
                    saw_progress = true;
                    assert!(p.percent <= 100);
                }
                PipelineEvent::Finished(summary) => {
                    saw_finished = true;
                    assert_eq!(summary.added, 1);
                }
                _ => {}
            }
        }
        assert!(saw_progress);
        assert!(saw_finished);
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle() {
        let catalog = Arc::new(FakeCatalog::default());
        let mut pipeline = pipeline_with(vec![], catalog);

        pipeline.parse("Joe's Pizza; restaurant; New York").unwrap();
        assert_ne!(pipeline.run_status(), RunStatus::Idle);

        pipeline.reset();
        assert_eq!(pipeline.run_status(), RunStatus::Idle);
        assert!(pipeline.items().is_empty());
    }
}

// src/pipeline/resolve.rs

//! Place resolution: match items to real-world places and derive geography.
//!
//! Restaurants are searched directly; dishes resolve through their parent
//! restaurant name. Searches are deduplicated per unique normalized query,
//! so several dishes of one restaurant cost a single external call, and run
//! with bounded concurrency. Ambiguous results park the item for operator
//! selection instead of guessing.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::error::Result;
use crate::models::{
    ItemKind, ItemRecord, ItemStatus, PlaceCandidate, ResolvedPlace, ResolverConfig,
};
use crate::services::{GeographyCache, GeographyLookup, PlaceSearch};
use crate::utils::{extract_postal_code, match_score, normalize_key};

/// One deduplicated place search.
#[derive(Debug, Clone)]
struct SearchJob {
    /// Normalized query, the dedup key
    key: String,
    /// Query string sent to the search service
    query: String,
    /// Name the candidates are scored against
    reference: String,
}

/// What to do with every item sharing one search key.
enum Decision {
    Select(PlaceCandidate),
    Park(Vec<PlaceCandidate>, String),
    Review(String),
}

/// Resolves pending items against the place search service.
pub struct PlaceResolver {
    places: Arc<dyn PlaceSearch>,
    config: ResolverConfig,
}

impl PlaceResolver {
    pub fn new(places: Arc<dyn PlaceSearch>, config: ResolverConfig) -> Self {
        Self { places, config }
    }

    /// Drive every `Pending` item to a non-transient state.
    ///
    /// Items whose search is ambiguous end up `AwaitingSelection` with their
    /// candidate list parked; everything else lands in `Ready`,
    /// `ReviewNeeded` or stays terminal. One item's search failure never
    /// cancels its siblings.
    pub async fn resolve_pending(
        &self,
        items: &mut [ItemRecord],
        geography: &dyn GeographyLookup,
        cache: &mut GeographyCache,
    ) -> Result<()> {
        // Stage 1: mark pending items and collect unique search jobs.
        let mut jobs: HashMap<String, SearchJob> = HashMap::new();
        for item in items.iter_mut() {
            if item.status != ItemStatus::Pending {
                continue;
            }
            item.status = ItemStatus::Resolving;
            match search_job(item) {
                Some(job) => {
                    jobs.entry(job.key.clone()).or_insert(job);
                }
                None => item.set_status(
                    ItemStatus::ReviewNeeded,
                    "dish line has no parent restaurant name",
                ),
            }
        }

        // Stage 2: run the unique searches with bounded concurrency.
        let concurrency = self.config.max_concurrent.max(1);
        let delay = Duration::from_millis(self.config.request_delay_ms);
        let mut results: HashMap<String, Result<Vec<PlaceCandidate>>> = HashMap::new();

        let job_list: Vec<SearchJob> = jobs.values().cloned().collect();
        let mut search_stream = stream::iter(job_list)
            .map(|job| async move {
                let outcome = self.places.search(&job.query).await;
                (job, outcome)
            })
            .buffer_unordered(concurrency);

        while let Some((job, outcome)) = search_stream.next().await {
            if let Err(error) = &outcome {
                log::warn!("Place search failed for '{}': {}", job.query, error);
            }
            results.insert(job.key, outcome);

            if delay.as_millis() > 0 {
                tokio::time::sleep(delay).await;
            }
        }
        drop(search_stream);

        // Stage 3: one decision per unique query.
        let mut decisions: HashMap<String, Decision> = HashMap::new();
        for (key, job) in &jobs {
            if let Some(outcome) = results.remove(key) {
                decisions.insert(key.clone(), self.decide(job, outcome));
            }
        }

        // Stage 4: apply decisions to items in line order. Geography lookups
        // happen here, sequentially, so the cache has a single writer.
        for item in items.iter_mut() {
            if item.status != ItemStatus::Resolving {
                continue;
            }
            let key = match search_job(item) {
                Some(job) => job.key,
                None => continue,
            };
            match decisions.get(&key) {
                Some(Decision::Select(candidate)) => {
                    let candidate = candidate.clone();
                    apply_selection(item, &candidate, geography, cache).await;
                }
                Some(Decision::Park(candidates, message)) => {
                    item.candidates = candidates.clone();
                    item.set_status(ItemStatus::AwaitingSelection, message.clone());
                }
                Some(Decision::Review(message)) => {
                    item.set_status(ItemStatus::ReviewNeeded, message.clone());
                }
                None => {
                    item.set_status(ItemStatus::ReviewNeeded, "place search produced no result");
                }
            }
        }
        Ok(())
    }

    /// Apply the ambiguity policy to one search outcome.
    fn decide(&self, job: &SearchJob, outcome: Result<Vec<PlaceCandidate>>) -> Decision {
        let candidates = match outcome {
            Err(error) => return Decision::Review(format!("place search failed: {error}")),
            Ok(candidates) if candidates.is_empty() => {
                return Decision::Review(format!("no match found for '{}'", job.query));
            }
            Ok(candidates) => candidates,
        };

        let mut scored: Vec<(f64, PlaceCandidate)> = candidates
            .into_iter()
            .map(|c| (match_score(&job.reference, &c.name), c))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        if scored.len() == 1 || scored[0].0 - scored[1].0 >= self.config.ambiguity_margin {
            Decision::Select(scored.into_iter().next().map(|(_, c)| c).unwrap())
        } else {
            let count = scored.len();
            Decision::Park(
                scored.into_iter().map(|(_, c)| c).collect(),
                format!("{count} candidates with no clear winner; selection required"),
            )
        }
    }
}

/// Build the search job for an item, or `None` when it cannot be searched.
///
/// Dishes search for their parent restaurant, so the dedup key is the
/// normalized parent name and every dish of that restaurant shares one job.
fn search_job(item: &ItemRecord) -> Option<SearchJob> {
    match item.kind {
        ItemKind::Restaurant => {
            let query = match &item.location_hint {
                Some(hint) => format!("{} {}", item.name, hint),
                None => item.name.clone(),
            };
            Some(SearchJob {
                key: normalize_key(&query),
                query,
                reference: item.name.clone(),
            })
        }
        ItemKind::Dish => item.location_hint.as_ref().map(|parent| SearchJob {
            key: normalize_key(parent),
            query: parent.clone(),
            reference: parent.clone(),
        }),
        ItemKind::Unknown => None,
    }
}

/// Attach a chosen candidate to an item: extract the postal code, look up
/// geography through the cache, populate `resolved` and move to `Ready`.
///
/// Missing geography never fails the item; it only appends a warning.
/// Also used by the orchestrator when the operator picks a parked candidate.
pub async fn apply_selection(
    item: &mut ItemRecord,
    candidate: &PlaceCandidate,
    geography: &dyn GeographyLookup,
    cache: &mut GeographyCache,
) {
    let postal = candidate
        .postal_code
        .clone()
        .or_else(|| extract_postal_code(&candidate.formatted_address));

    let geo = match &postal {
        Some(code) => cache.lookup(geography, code).await,
        None => None,
    };

    item.resolved = Some(ResolvedPlace {
        address: candidate.formatted_address.clone(),
        place_id: candidate.place_id.clone(),
        lat: Some(candidate.lat),
        lng: Some(candidate.lng),
        city_id: geo.as_ref().map(|g| g.city_id),
        city_name: geo.as_ref().map(|g| g.city_name.clone()),
        neighborhood_id: geo.as_ref().map(|g| g.neighborhood_id),
        neighborhood_name: geo.as_ref().map(|g| g.neighborhood_name.clone()),
    });
    item.candidates.clear();
    item.set_status(
        ItemStatus::Ready,
        format!("resolved to {}", candidate.formatted_address),
    );

    if geo.is_none() {
        match postal {
            Some(code) => item.append_warning(&format!("no geography found for postal code {code}")),
            None => item.append_warning("no postal code in the selected address"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::AppError;
    use crate::models::Geography;
    use crate::pipeline::parse_items;

    /// Scripted place search: maps a query substring to candidates, counts
    /// calls, and can fail for chosen queries.
    #[derive(Default)]
    struct ScriptedSearch {
        responses: Vec<(String, Vec<PlaceCandidate>)>,
        fail_for: Vec<String>,
        calls: AtomicUsize,
    }

    impl ScriptedSearch {
        fn respond(mut self, query_part: &str, candidates: Vec<PlaceCandidate>) -> Self {
            self.responses.push((query_part.to_string(), candidates));
            self
        }

        fn fail_for(mut self, query_part: &str) -> Self {
            self.fail_for.push(query_part.to_string());
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(AtomicOrdering::SeqCst)
        }
    }

    #[async_trait]
    impl PlaceSearch for ScriptedSearch {
        async fn search(&self, query: &str) -> Result<Vec<PlaceCandidate>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let query = query.to_lowercase();
            if self.fail_for.iter().any(|part| query.contains(part)) {
                return Err(AppError::api("place search", 503, "unavailable"));
            }
            Ok(self
                .responses
                .iter()
                .find(|(part, _)| query.contains(&part.to_lowercase()))
                .map(|(_, candidates)| candidates.clone())
                .unwrap_or_default())
        }
    }

    struct MappedGeo;

    #[async_trait]
    impl GeographyLookup for MappedGeo {
        async fn lookup(&self, postal_code: &str) -> Result<Option<Geography>> {
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

    fn candidate(place_id: &str, name: &str, postal: Option<&str>) -> PlaceCandidate {
        PlaceCandidate {
            place_id: place_id.to_string(),
            name: name.to_string(),
            formatted_address: format!("7 Carmine St, New York, NY {}", postal.unwrap_or("10014")),
            lat: 40.73,
            lng: -74.0,
            rating: None,
            price_level: None,
            neighborhood_hint: None,
            postal_code: postal.map(ToString::to_string),
        }
    }

    fn resolver(search: ScriptedSearch) -> (PlaceResolver, GeographyCache) {
        (
            PlaceResolver::new(Arc::new(search), ResolverConfig::default()),
            GeographyCache::new(),
        )
    }

    #[tokio::test]
    async fn test_single_candidate_resolves_with_geography() {
        let search = ScriptedSearch::default()
            .respond("joe's pizza", vec![candidate("p-1", "Joe's Pizza", Some("10014"))]);
        let (resolver, mut cache) = resolver(search);
        let mut items = parse_items("Joe's Pizza; restaurant; New York; pizza").unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(items[0].status, ItemStatus::Ready);
        let resolved = items[0].resolved.as_ref().unwrap();
        assert_eq!(resolved.place_id, "p-1");
        assert_eq!(resolved.city_id, Some(1));
        assert_eq!(resolved.neighborhood_name.as_deref(), Some("West Village"));
    }

    #[tokio::test]
    async fn test_clear_winner_is_auto_selected() {
        let search = ScriptedSearch::default().respond(
            "joe's pizza",
            vec![
                candidate("p-2", "Gio's Cucina", Some("10014")),
                candidate("p-1", "Joe's Pizza", Some("10014")),
            ],
        );
        let (resolver, mut cache) = resolver(search);
        let mut items = parse_items("Joe's Pizza; restaurant; New York").unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(items[0].status, ItemStatus::Ready);
        assert_eq!(items[0].resolved.as_ref().unwrap().place_id, "p-1");
    }

    #[tokio::test]
    async fn test_near_equal_candidates_await_selection() {
        let search = ScriptedSearch::default().respond(
            "ambiguous place",
            vec![
                candidate("p-1", "Ambiguous Place North", Some("10014")),
                candidate("p-2", "Ambiguous Place South", Some("10014")),
                candidate("p-3", "Ambiguous Place East", Some("10014")),
            ],
        );
        let (resolver, mut cache) = resolver(search);
        let mut items = parse_items("Ambiguous Place; restaurant; New York").unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(items[0].status, ItemStatus::AwaitingSelection);
        assert_eq!(items[0].candidates.len(), 3);
        assert!(items[0].resolved.is_none());
    }

    #[tokio::test]
    async fn test_zero_candidates_need_review() {
        let (resolver, mut cache) = resolver(ScriptedSearch::default());
        let mut items = parse_items("Nowhere Grill; restaurant; Atlantis").unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(items[0].status, ItemStatus::ReviewNeeded);
        assert!(items[0].message.as_ref().unwrap().contains("no match"));
        assert!(items[0].resolved.is_none());
    }

    #[tokio::test]
    async fn test_search_failure_is_isolated_per_item() {
        let search = ScriptedSearch::default()
            .respond("joe's pizza", vec![candidate("p-1", "Joe's Pizza", Some("10014"))])
            .fail_for("flaky diner");
        let (resolver, mut cache) = resolver(search);
        let mut items =
            parse_items("Joe's Pizza; restaurant; New York\nFlaky Diner; restaurant; New York")
                .unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(items[0].status, ItemStatus::Ready);
        assert_eq!(items[1].status, ItemStatus::ReviewNeeded);
        assert!(items[1].message.as_ref().unwrap().contains("failed"));
    }

    #[tokio::test]
    async fn test_dishes_share_one_parent_search() {
        let search = ScriptedSearch::default()
            .respond("joe's pizza", vec![candidate("p-1", "Joe's Pizza", Some("10014"))]);
        let (resolver, mut cache) = resolver(search);
        let mut items = parse_items(
            "Margherita; dish; Joe's Pizza\nCalzone; dish; Joe's Pizza\nGarlic Knots; dish; joe's  pizza",
        )
        .unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        for item in &items {
            assert_eq!(item.status, ItemStatus::Ready);
            let resolved = item.resolved.as_ref().unwrap();
            assert_eq!(resolved.place_id, "p-1");
            assert_eq!(resolved.city_id, Some(1));
        }
    }

    #[tokio::test]
    async fn test_parent_search_happens_once() {
        let search = Arc::new(
            ScriptedSearch::default()
                .respond("joe's pizza", vec![candidate("p-1", "Joe's Pizza", Some("10014"))]),
        );
        let resolver = PlaceResolver::new(search.clone(), ResolverConfig::default());
        let mut cache = GeographyCache::new();
        let mut items =
            parse_items("Margherita; dish; Joe's Pizza\nCalzone; dish; Joe's Pizza").unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(search.call_count(), 1);
    }

    #[tokio::test]
    async fn test_dish_without_parent_needs_review() {
        let (resolver, mut cache) = resolver(ScriptedSearch::default());
        let mut items = parse_items("Margherita; dish").unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(items[0].status, ItemStatus::ReviewNeeded);
        assert!(items[0].message.as_ref().unwrap().contains("parent"));
    }

    #[tokio::test]
    async fn test_missing_geography_still_ready_with_warning() {
        let search = ScriptedSearch::default()
            .respond("lone star", vec![candidate("p-9", "Lone Star", Some("73301"))]);
        let (resolver, mut cache) = resolver(search);
        let mut items = parse_items("Lone Star; restaurant; Austin").unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(items[0].status, ItemStatus::Ready);
        let resolved = items[0].resolved.as_ref().unwrap();
        assert!(resolved.city_id.is_none());
        assert!(items[0].message.as_ref().unwrap().contains("no geography"));
    }

    #[tokio::test]
    async fn test_postal_code_falls_back_to_address_regex() {
        let mut no_structured = candidate("p-1", "Joe's Pizza", None);
        no_structured.formatted_address = "7 Carmine St, New York, NY 10014".to_string();
        let search = ScriptedSearch::default().respond("joe's pizza", vec![no_structured]);
        let (resolver, mut cache) = resolver(search);
        let mut items = parse_items("Joe's Pizza; restaurant; New York").unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(items[0].resolved.as_ref().unwrap().city_id, Some(1));
    }

    #[tokio::test]
    async fn test_error_items_are_left_alone() {
        let (resolver, mut cache) = resolver(ScriptedSearch::default());
        let mut items = parse_items("Bad Line; cafe; NYC").unwrap();

        resolver
            .resolve_pending(&mut items, &MappedGeo, &mut cache)
            .await
            .unwrap();

        assert_eq!(items[0].status, ItemStatus::Error);
    }
}

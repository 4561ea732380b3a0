// src/services/catalog.rs

//! Catalog store API client: batched duplicate check and bulk create.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{Config, ItemKind, ItemRecord};

/// One entry of the batched "check existing" request.
#[derive(Debug, Clone, Serialize)]
pub struct ExistingQuery {
    pub line_number: u32,
    pub name: String,
    pub kind: ItemKind,
    pub city_id: Option<u64>,
}

/// Per-item reply of the batched "check existing" request.
#[derive(Debug, Clone, Deserialize)]
pub struct ExistingMatch {
    pub line_number: u32,
    pub existing_id: Option<u64>,
}

/// Payload for one record in a bulk-create chunk.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitItem {
    pub line_number: u32,
    pub name: String,
    pub kind: ItemKind,
    pub tags: Vec<String>,
    pub address: Option<String>,
    pub place_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub city_id: Option<u64>,
    pub neighborhood_id: Option<u64>,
}

impl SubmitItem {
    /// Build the payload for a submission-eligible record.
    pub fn from_record(item: &ItemRecord) -> Self {
        let resolved = item.resolved.as_ref();
        Self {
            line_number: item.line_number,
            name: item.name.clone(),
            kind: item.kind,
            tags: item.tags.clone(),
            address: resolved.map(|r| r.address.clone()),
            place_id: resolved
                .map(|r| r.place_id.clone())
                .filter(|id| !id.is_empty()),
            lat: resolved.and_then(|r| r.lat),
            lng: resolved.and_then(|r| r.lng),
            city_id: resolved.and_then(|r| r.city_id),
            neighborhood_id: resolved.and_then(|r| r.neighborhood_id),
        }
    }
}

/// Backend outcome for one submitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitOutcomeKind {
    Added,
    Duplicate,
    Error,
}

/// Per-item reply of a bulk-create chunk.
///
/// `line_number` is the primary join key back to local records; `name` is
/// only used as a last-resort fallback when the backend omits it.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitOutcome {
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
    pub outcome: SubmitOutcomeKind,
    #[serde(default)]
    pub final_id: Option<u64>,
    #[serde(default)]
    pub existing_id: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Catalog store operations used by the pipeline.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Batched duplicate check for resolved items.
    async fn check_existing(&self, items: &[ExistingQuery]) -> Result<Vec<ExistingMatch>>;

    /// Create one chunk of records; returns one outcome per item.
    async fn bulk_create(&self, items: &[SubmitItem]) -> Result<Vec<SubmitOutcome>>;
}

/// HTTP implementation backed by the configured catalog store.
pub struct HttpCatalogApi {
    config: Arc<Config>,
    client: Client,
}

impl HttpCatalogApi {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = super::create_client(&config.http)?;
        Ok(Self { config, client })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.services.catalog_url, path);
        let mut builder = self.client.post(&url);
        if !self.config.services.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.services.api_key);
        }
        builder
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogApi {
    async fn check_existing(&self, items: &[ExistingQuery]) -> Result<Vec<ExistingMatch>> {
        let response = self
            .request("/records/check-existing")
            .json(&serde_json::json!({ "items": items }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::api("duplicate check", status.as_u16(), body));
        }

        #[derive(Deserialize)]
        struct CheckResponse {
            #[serde(default)]
            matches: Vec<ExistingMatch>,
        }
        let parsed: CheckResponse = response.json().await?;
        Ok(parsed.matches)
    }

    async fn bulk_create(&self, items: &[SubmitItem]) -> Result<Vec<SubmitOutcome>> {
        let response = self
            .request("/records/bulk")
            .json(&serde_json::json!({ "items": items }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::api("bulk create", status.as_u16(), body));
        }

        #[derive(Deserialize)]
        struct BulkResponse {
            #[serde(default)]
            outcomes: Vec<SubmitOutcome>,
        }
        let parsed: BulkResponse = response.json().await?;
        Ok(parsed.outcomes)
    }
}

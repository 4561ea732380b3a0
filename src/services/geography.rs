// src/services/geography.rs

//! Geography lookup service client and the per-run lookup cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{Config, Geography};
use crate::utils::normalize_postal;

/// Map a postal code to catalog city/neighborhood identifiers.
#[async_trait]
pub trait GeographyLookup: Send + Sync {
    /// Returns `None` when the service knows no geography for the code.
    async fn lookup(&self, postal_code: &str) -> Result<Option<Geography>>;
}

/// HTTP implementation backed by the configured geography service.
pub struct HttpGeographyLookup {
    config: Arc<Config>,
    client: Client,
}

impl HttpGeographyLookup {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = super::create_client(&config.http)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl GeographyLookup for HttpGeographyLookup {
    async fn lookup(&self, postal_code: &str) -> Result<Option<Geography>> {
        let url = format!("{}/neighborhoods", self.config.services.geography_url);
        let response = self
            .client
            .get(&url)
            .query(&[("postal_code", postal_code)])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::api("geography lookup", status.as_u16(), body));
        }

        let parsed: GeographyDto = response.json().await?;
        Ok(Some(Geography {
            city_id: parsed.city_id,
            city_name: parsed.city_name,
            neighborhood_id: parsed.neighborhood_id,
            neighborhood_name: parsed.neighborhood_name,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct GeographyDto {
    city_id: u64,
    city_name: String,
    neighborhood_id: u64,
    neighborhood_name: String,
}

/// Memoizes postal-code lookups for the duration of one run.
///
/// Keys are normalized postal codes; negative results and failed calls are
/// cached too, so one bad code issues at most one external call per run.
/// Created at run start and dropped at teardown, never persisted.
#[derive(Debug, Default)]
pub struct GeographyCache {
    entries: HashMap<String, Option<Geography>>,
}

impl GeographyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up geography for a postal code, hitting the service at most
    /// once per normalized key. Lookup failures are logged and cached as
    /// negative results; missing geography never fails an item.
    pub async fn lookup(
        &mut self,
        service: &dyn GeographyLookup,
        postal_code: &str,
    ) -> Option<Geography> {
        let key = normalize_postal(postal_code);
        if key.len() < 5 {
            return None;
        }
        if let Some(entry) = self.entries.get(&key) {
            return entry.clone();
        }

        let result = match service.lookup(&key).await {
            Ok(geography) => geography,
            Err(error) => {
                log::warn!("Geography lookup failed for {key}: {error}");
                None
            }
        };
        self.entries.insert(key, result.clone());
        result
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

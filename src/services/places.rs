// src/services/places.rs

//! Place search service client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::models::{Config, PlaceCandidate};

/// Search for places matching a free-form query.
#[async_trait]
pub trait PlaceSearch: Send + Sync {
    /// Returns zero or more candidates in service ranking order.
    async fn search(&self, query: &str) -> Result<Vec<PlaceCandidate>>;
}

/// HTTP implementation backed by the configured place search service.
pub struct HttpPlaceSearch {
    config: Arc<Config>,
    client: Client,
}

impl HttpPlaceSearch {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = super::create_client(&config.http)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl PlaceSearch for HttpPlaceSearch {
    async fn search(&self, query: &str) -> Result<Vec<PlaceCandidate>> {
        let url = format!("{}/search", self.config.services.place_search_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::api("place search", status.as_u16(), body));
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.results.into_iter().map(PlaceCandidate::from).collect())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<CandidateDto>,
}

/// Wire shape of one search result.
#[derive(Debug, Deserialize)]
struct CandidateDto {
    place_id: String,
    name: String,
    formatted_address: String,
    location: LocationDto,
    #[serde(default)]
    rating: Option<f32>,
    #[serde(default)]
    price_level: Option<u8>,
    #[serde(default)]
    neighborhood: Option<String>,
    #[serde(default)]
    postal_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocationDto {
    lat: f64,
    lng: f64,
}

impl From<CandidateDto> for PlaceCandidate {
    fn from(dto: CandidateDto) -> Self {
        Self {
            place_id: dto.place_id,
            name: dto.name,
            formatted_address: dto.formatted_address,
            lat: dto.location.lat,
            lng: dto.location.lng,
            rating: dto.rating,
            price_level: dto.price_level,
            neighborhood_hint: dto.neighborhood,
            postal_code: dto.postal_code,
        }
    }
}

// src/services/mod.rs

//! Service clients for the three backend collaborators:
//! - Place search (`PlaceSearch` / `HttpPlaceSearch`)
//! - Geography lookup (`GeographyLookup` / `HttpGeographyLookup`) plus the
//!   per-run `GeographyCache`
//! - Catalog store (`CatalogApi` / `HttpCatalogApi`)

mod catalog;
mod geography;
mod places;

pub use catalog::{
    CatalogApi, ExistingMatch, ExistingQuery, HttpCatalogApi, SubmitItem, SubmitOutcome,
    SubmitOutcomeKind,
};
pub use geography::{GeographyCache, GeographyLookup, HttpGeographyLookup};
pub use places::{HttpPlaceSearch, PlaceSearch};

use std::time::Duration;

use crate::error::Result;
use crate::models::HttpConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

// src/models/place.rs

//! Place search and geography value types.

use serde::{Deserialize, Serialize};

/// A read-only result from the place search service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaceCandidate {
    /// External place identifier
    pub place_id: String,

    /// Place display name
    pub name: String,

    /// Formatted street address
    pub formatted_address: String,

    /// Latitude
    pub lat: f64,

    /// Longitude
    pub lng: f64,

    /// Average rating, when the service provides one
    #[serde(default)]
    pub rating: Option<f32>,

    /// Price level (1-4), when the service provides one
    #[serde(default)]
    pub price_level: Option<u8>,

    /// Neighborhood name hint from the search service
    #[serde(default)]
    pub neighborhood_hint: Option<String>,

    /// Structured postal code, when address components are available
    #[serde(default)]
    pub postal_code: Option<String>,
}

/// City/neighborhood pair derived from a postal code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Geography {
    /// Catalog city id
    pub city_id: u64,

    /// City display name
    pub city_name: String,

    /// Catalog neighborhood id
    pub neighborhood_id: u64,

    /// Neighborhood display name
    pub neighborhood_name: String,
}

// src/models/config.rs

//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Backend service endpoints
    #[serde(default)]
    pub services: ServicesConfig,

    /// Place resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Duplicate classification settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Batch submission settings
    #[serde(default)]
    pub submitter: SubmitterConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.resolver.max_concurrent == 0 {
            return Err(AppError::validation("resolver.max_concurrent must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.resolver.ambiguity_margin) {
            return Err(AppError::validation(
                "resolver.ambiguity_margin must be between 0 and 1",
            ));
        }
        if self.submitter.chunk_size == 0 {
            return Err(AppError::validation("submitter.chunk_size must be > 0"));
        }
        for (name, url) in [
            ("services.place_search_url", &self.services.place_search_url),
            ("services.geography_url", &self.services.geography_url),
            ("services.catalog_url", &self.services.catalog_url),
        ] {
            if url.trim().is_empty() {
                return Err(AppError::validation(format!("{name} is empty")));
            }
        }
        Ok(())
    }
}

/// HTTP client settings shared by all service clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Backend service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Base URL of the place search service
    #[serde(default = "defaults::place_search_url")]
    pub place_search_url: String,

    /// Base URL of the geography lookup service
    #[serde(default = "defaults::geography_url")]
    pub geography_url: String,

    /// Base URL of the catalog store API
    #[serde(default = "defaults::catalog_url")]
    pub catalog_url: String,

    /// API key sent as a bearer token to the catalog store
    #[serde(default)]
    pub api_key: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            place_search_url: defaults::place_search_url(),
            geography_url: defaults::geography_url(),
            catalog_url: defaults::catalog_url(),
            api_key: String::new(),
        }
    }
}

/// Place resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Maximum concurrent place search requests
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Score gap required between the top and second candidate to
    /// auto-select instead of asking the operator
    #[serde(default = "defaults::ambiguity_margin")]
    pub ambiguity_margin: f64,

    /// Delay between search requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
            ambiguity_margin: defaults::ambiguity_margin(),
            request_delay_ms: defaults::request_delay(),
        }
    }
}

/// Duplicate classification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// When true, a failed duplicate-check call aborts the run instead of
    /// proceeding as if no duplicates were found
    #[serde(default)]
    pub fail_closed: bool,
}

/// Batch submission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitterConfig {
    /// Number of items per bulk-create request
    #[serde(default = "defaults::chunk_size")]
    pub chunk_size: usize,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::chunk_size(),
        }
    }
}

mod defaults {
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; platefeed/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn ambiguity_margin() -> f64 {
        0.08
    }
    pub fn request_delay() -> u64 {
        0
    }
    pub fn chunk_size() -> usize {
        5
    }
    pub fn place_search_url() -> String {
        "https://places.example.com/v1".into()
    }
    pub fn geography_url() -> String {
        "https://geo.example.com/v1".into()
    }
    pub fn catalog_url() -> String {
        "https://catalog.example.com/api".into()
    }
}

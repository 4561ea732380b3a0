// src/error.rs

//! Unified error handling for the import pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A backend service replied with a non-success status
    #[error("API error from {context} (status {status}): {message}")]
    Api {
        context: String,
        status: u16,
        message: String,
    },

    /// Input text contained no usable lines
    #[error("Input is empty: nothing to import")]
    EmptyInput,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate check failed while fail-closed mode is enabled
    #[error("Duplicate check failed: {0}")]
    Classification(String),
}

impl AppError {
    /// Create an API error with context.
    pub fn api(context: impl Into<String>, status: u16, message: impl fmt::Display) -> Self {
        Self::Api {
            context: context.into(),
            status,
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a classification error.
    pub fn classification(message: impl Into<String>) -> Self {
        Self::Classification(message.into())
    }
}

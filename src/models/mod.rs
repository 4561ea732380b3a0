// src/models/mod.rs

//! Domain models for the import pipeline.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod item;
mod place;

// Re-export all public types
pub use config::{
    ClassifierConfig, Config, HttpConfig, ResolverConfig, ServicesConfig, SubmitterConfig,
};
pub use item::{DuplicateInfo, ItemKind, ItemRecord, ItemStatus, ResolvedPlace, RunSummary};
pub use place::{Geography, PlaceCandidate};

/// Run-level status, derived from the item set (see `pipeline::Pipeline`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Resolving,
    AwaitingSelection,
    Classifying,
    Submitting,
    Done,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Resolving => "resolving",
            RunStatus::AwaitingSelection => "awaiting-selection",
            RunStatus::Classifying => "classifying",
            RunStatus::Submitting => "submitting",
            RunStatus::Done => "done",
        }
    }
}

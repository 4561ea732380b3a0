// src/pipeline/mod.rs

//! Pipeline stages for the bulk import run.
//!
//! - `parse`: raw text → pending item records
//! - `resolve`: place search + geography enrichment
//! - `classify`: batched duplicate check
//! - `submit`: chunked bulk creation
//! - `run`: the orchestrator tying the stages together

pub mod classify;
pub mod parse;
pub mod resolve;
pub mod run;
pub mod submit;

pub use classify::DuplicateClassifier;
pub use parse::parse_items;
pub use resolve::PlaceResolver;
pub use run::{Pipeline, PipelineEvent};
pub use submit::{BatchSubmitter, SubmitProgress};

// src/lib.rs

//! platefeed bulk-import library

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;

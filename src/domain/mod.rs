//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the canonical household record and its coded enums (`Sex`, `HousingType`)
//! - vulnerability labels and per-model predictions
//! - the merged per-household result (`CombinedResult`)
//! - training and batch configuration

pub mod types;

pub use types::*;

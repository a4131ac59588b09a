//! Feature engineering.
//!
//! - `engine`: record validation and the fixed-shape feature vector
//! - `score`: weak-supervision score and tier thresholds
//! - `calibrate`: fit the score to a reference tier mix

pub mod calibrate;
pub mod engine;
pub mod score;

pub use calibrate::{Calibration, CalibrationGrid, REFERENCE_DISTRIBUTION, calibrate, label_distribution};
pub use engine::{
    DERIVED_FEATURES, FEATURE_NAMES, FEATURE_SCHEMA_VERSION, FeatureRow, FeatureVector, derive,
    income_per_capita, validate,
};
pub use score::{ScoreWeights, VulnerabilityScore, label, score};

//! Numeric utilities: feature standardization and probability helpers.

pub mod scaler;
pub mod stats;

pub use scaler::*;
pub use stats::*;

//! Input/output helpers.
//!
//! - household CSV ingest + row validation (`ingest`)
//! - model bundle JSON read/write (`bundle`)
//! - report exports (CSV/JSON) (`export`)

pub mod bundle;
pub mod export;
pub mod ingest;

pub use bundle::*;
pub use export::*;
pub use ingest::*;

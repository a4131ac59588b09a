//! Batch rollups by region.

pub mod municipality;

pub use municipality::{
    AggregationReport, MunicipalityAggregate, MunicipalityAggregator, RegionKey, aggregate,
};

//! Data sources and external collaborators.
//!
//! - `sample`: deterministic synthetic households
//! - `regions`: IBGE municipality names
//! - `narrative`: HTTP text-generation client

pub mod narrative;
pub mod regions;
pub mod sample;

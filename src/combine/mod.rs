//! Result merge and the narrative collaborator seam.

pub mod meta;

pub use meta::{DEFAULT_NARRATIVE_TIMEOUT, DEFAULT_NARRATIVE_WORKERS, MetaCombiner, NarrativeGenerator, NarrativePayload};

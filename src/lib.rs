//! `vulnerability-tiers` library crate.
//!
//! Classifies household registry snapshots into four vulnerability tiers with
//! two independent tree ensembles, flags disagreements for analyst review, and
//! rolls results up per municipality.
//!
//! The binary (`vtiers`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the pipeline stages can be reused by other front-ends

pub mod aggregate;
pub mod app;
pub mod cli;
pub mod combine;
pub mod data;
pub mod domain;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod io;
pub mod labeling;
pub mod math;
pub mod models;
pub mod report;
pub mod tree;

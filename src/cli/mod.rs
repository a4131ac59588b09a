//! Command-line parsing for `vtiers`.
//!
//! Argument parsing and command dispatch stay separate from the modelling
//! code: every `*Args` struct is converted into a plain config struct before
//! anything runs.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{HousingType, NarrativePolicy, Sex};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "vtiers", version, about = "Household vulnerability tiers from registry snapshots")]
pub struct Cli {
    /// Debug-level logs (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Train both classifiers and write their bundles to a model directory.
    Train(TrainArgs),
    /// Classify a single household given on the command line.
    Predict(PredictArgs),
    /// Classify a household CSV and aggregate the results per region.
    Batch(BatchArgs),
    /// Fit the score weights to the reference tier distribution.
    Calibrate(CalibrateArgs),
}

#[derive(Debug, Args, Clone)]
#[group(id = "source", multiple = false)]
pub struct SourceArgs {
    /// Household CSV; a `label` column, when present, is used as ground truth.
    #[arg(long, value_name = "CSV")]
    pub input: Option<PathBuf>,

    /// Generate this many synthetic households instead of reading a file.
    #[arg(long, value_name = "N")]
    pub synthetic: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct TrainArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Directory receiving `bagging.json` and `boosting.json`.
    #[arg(long, value_name = "DIR", default_value = "models")]
    pub out_dir: PathBuf,

    /// Seed for splits, resampling and synthetic data.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Score weights JSON (from `vtiers calibrate --out`) used for bootstrap labels.
    #[arg(long, value_name = "JSON")]
    pub weights: Option<PathBuf>,

    /// Number of bagged trees.
    #[arg(long, default_value_t = 100)]
    pub trees: usize,

    /// Maximum depth of each bagged tree.
    #[arg(long, default_value_t = 16)]
    pub bagging_depth: usize,

    /// Maximum boosting rounds.
    #[arg(long, default_value_t = 100)]
    pub rounds: usize,

    #[arg(long, default_value_t = 0.1)]
    pub learning_rate: f64,

    /// Maximum depth of each boosted tree.
    #[arg(long, default_value_t = 6)]
    pub boosting_depth: usize,

    /// Rounds without validation improvement before boosting stops.
    #[arg(long, default_value_t = 10)]
    pub early_stopping: usize,

    /// Skip k-fold cross-validation.
    #[arg(long)]
    pub no_cv: bool,

    /// Choose the bagging trees, depth and leaf size by a cross-validated grid
    /// search before training (overrides --trees and --bagging-depth).
    #[arg(long)]
    pub tune: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PredictArgs {
    /// Model directory written by `vtiers train`.
    #[arg(long, value_name = "DIR", default_value = "models")]
    pub models: PathBuf,

    #[arg(long)]
    pub age: u16,

    #[arg(long, value_enum)]
    pub sex: Sex,

    /// Education ordinal 0-5.
    #[arg(long)]
    pub education: u8,

    /// Monthly family income.
    #[arg(long)]
    pub income: f64,

    #[arg(long)]
    pub household_size: u32,

    #[arg(long)]
    pub disability: bool,

    /// Employment ordinal 0-2 (unemployed, informal, formal).
    #[arg(long)]
    pub employment: u8,

    #[arg(long, value_enum, default_value_t = HousingType::Owned)]
    pub housing: HousingType,

    #[arg(long)]
    pub water: bool,

    #[arg(long)]
    pub sewage: bool,

    #[arg(long)]
    pub benefit: bool,

    /// Region code (IBGE municipality code).
    #[arg(long)]
    pub region: Option<String>,

    /// When to ask the narrative service for a written assessment.
    #[arg(long, value_enum, default_value_t = NarrativePolicy::Divergent)]
    pub narrative: NarrativePolicy,

    /// Print the combined result as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args, Clone)]
pub struct BatchArgs {
    #[arg(long, value_name = "DIR", default_value = "models")]
    pub models: PathBuf,

    #[arg(long, value_name = "CSV")]
    pub input: PathBuf,

    /// Stop after this many data rows.
    #[arg(long)]
    pub max_rows: Option<u64>,

    /// Rows classified in parallel per step.
    #[arg(long, default_value_t = 1024)]
    pub chunk_size: usize,

    #[arg(long, value_enum, default_value_t = NarrativePolicy::Never)]
    pub narrative: NarrativePolicy,

    /// Show the N most vulnerable regions.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Export per-region aggregates to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Export the full report to JSON.
    #[arg(long = "export-json", value_name = "JSON")]
    pub export_json: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct CalibrateArgs {
    /// Household CSV to calibrate on.
    #[arg(long, value_name = "CSV", conflicts_with = "synthetic")]
    pub input: Option<PathBuf>,

    /// Synthetic households to calibrate on (default when no input is given).
    #[arg(long, value_name = "N", default_value_t = 5000)]
    pub synthetic: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Write the calibrated weights to JSON.
    #[arg(long, value_name = "JSON")]
    pub out: Option<PathBuf>,
}

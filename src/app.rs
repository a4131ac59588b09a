//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - converts arguments into config structs
//! - runs the shared workflows in [`pipeline`]
//! - prints reports and writes optional exports

use std::fs::File;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{BatchArgs, CalibrateArgs, Cli, Command, PredictArgs, SourceArgs, TrainArgs};
use crate::domain::{BaggingParams, BatchConfig, BoostingParams, HouseholdRecord, RegionCode, TrainConfig};
use crate::error::AppError;
use crate::features::{REFERENCE_DISTRIBUTION, ScoreWeights};
use crate::io::export::{export_aggregates_csv, read_json, write_json};
use crate::io::ingest::HouseholdReader;
use crate::models::context::ModelContext;
use crate::models::tune::BaggingGrid;
use crate::report::{
    format_aggregation_report, format_calibration, format_combined, format_comparison, format_training_summary,
    format_tuning,
};

use self::pipeline::DataSource;

pub mod pipeline;

/// Default synthetic sample size when `train` gets no source.
const DEFAULT_SYNTHETIC_COUNT: usize = 5000;

/// Entry point for the `vtiers` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Train(args) => handle_train(args),
        Command::Predict(args) => handle_predict(args),
        Command::Batch(args) => handle_batch(args),
        Command::Calibrate(args) => handle_calibrate(args),
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` selects debug. Logs go to stderr so
/// stdout carries only reports.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_train(args: TrainArgs) -> Result<(), AppError> {
    let source = data_source(&args.source, args.seed, DEFAULT_SYNTHETIC_COUNT);
    let weights = match &args.weights {
        Some(path) => read_json::<ScoreWeights>(path)?,
        None => ScoreWeights::default(),
    };
    let config = train_config_from_args(&args);
    let grid = args.tune.then(BaggingGrid::default);
    let run = pipeline::run_train(&source, &weights, &config, grid.as_ref(), &args.out_dir)?;

    println!(
        "Rows: read={} rejected={} | labels: ground truth={} bootstrapped={}\n",
        run.rows_read,
        run.row_errors.len(),
        run.sources.ground_truth,
        run.sources.bootstrapped
    );
    if let Some(tuning) = &run.tuning {
        println!("{}", format_tuning(tuning));
    }
    println!("{}", format_training_summary(&run.bagging));
    println!("{}", format_training_summary(&run.boosting));
    println!("{}", format_comparison(&run.comparison));
    println!("Bundles written to {}", args.out_dir.display());
    Ok(())
}

fn handle_predict(args: PredictArgs) -> Result<(), AppError> {
    let ctx = ModelContext::load_dir(&args.models)?;
    let combiner = pipeline::build_combiner(args.narrative)?;
    let record = record_from_args(&args);
    let result = pipeline::predict_one(&ctx, &record, &combiner)?;

    if args.json {
        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| AppError::new(4, format!("Failed to serialize result: {e}")))?;
        println!("{text}");
    } else {
        print!("{}", format_combined(&result));
    }
    Ok(())
}

fn handle_batch(args: BatchArgs) -> Result<(), AppError> {
    let ctx = ModelContext::load_dir(&args.models)?;
    let config = batch_config_from_args(&args);
    let combiner = pipeline::build_combiner(config.narrative_policy)?;
    let reader = HouseholdReader::<File>::open(&args.input)?;

    let cancel = AtomicBool::new(false);
    let report = pipeline::run_batch(&ctx, reader, &combiner, &config, &cancel)?;

    print!("{}", format_aggregation_report(&report, args.top));

    if let Some(path) = &args.export {
        export_aggregates_csv(path, &report)?;
    }
    if let Some(path) = &args.export_json {
        write_json(path, &report)?;
    }
    Ok(())
}

fn handle_calibrate(args: CalibrateArgs) -> Result<(), AppError> {
    let source = match &args.input {
        Some(path) => DataSource::Csv(path.clone()),
        None => DataSource::Synthetic {
            count: args.synthetic,
            seed: args.seed,
        },
    };
    let calibration = pipeline::run_calibrate(&source)?;
    print!("{}", format_calibration(&calibration, &REFERENCE_DISTRIBUTION));

    if let Some(path) = &args.out {
        write_json(path, &calibration.weights)?;
        println!("Weights written to {}", path.display());
    }
    Ok(())
}

fn data_source(args: &SourceArgs, seed: u64, default_count: usize) -> DataSource {
    match (&args.input, args.synthetic) {
        (Some(path), _) => DataSource::Csv(path.clone()),
        (None, count) => DataSource::Synthetic {
            count: count.unwrap_or(default_count),
            seed,
        },
    }
}

pub fn train_config_from_args(args: &TrainArgs) -> TrainConfig {
    TrainConfig {
        cross_validate: !args.no_cv,
        seed: args.seed,
        bagging: BaggingParams {
            n_trees: args.trees,
            max_depth: args.bagging_depth,
            seed: args.seed,
            ..BaggingParams::default()
        },
        boosting: BoostingParams {
            max_rounds: args.rounds,
            learning_rate: args.learning_rate,
            max_depth: args.boosting_depth,
            early_stopping_rounds: args.early_stopping,
            seed: args.seed,
            ..BoostingParams::default()
        },
        ..TrainConfig::default()
    }
}

pub fn batch_config_from_args(args: &BatchArgs) -> BatchConfig {
    BatchConfig {
        max_rows: args.max_rows,
        chunk_size: args.chunk_size,
        narrative_policy: args.narrative,
        ..BatchConfig::default()
    }
}

pub fn record_from_args(args: &PredictArgs) -> HouseholdRecord {
    HouseholdRecord {
        age: args.age,
        sex: args.sex,
        education: args.education,
        family_income: args.income,
        household_size: Some(args.household_size),
        disability: args.disability,
        employment: args.employment,
        housing_type: args.housing,
        water_access: args.water,
        sewage_access: args.sewage,
        benefit: args.benefit,
        region: args.region.as_deref().and_then(RegionCode::parse),
    }
}

//! Shared workflows used by every CLI command.
//!
//! Keeping them here keeps the command handlers about presentation only:
//!
//! - train: load/generate households -> label -> (tune bagging) -> fit both ensembles -> persist
//! - predict: one record through both classifiers and the combiner
//! - batch: stream a CSV through the classifiers into the per-region aggregator
//! - calibrate: fit the score weights to the reference tier mix

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregationReport, MunicipalityAggregator};
use crate::combine::MetaCombiner;
use crate::data::narrative::{HttpNarrativeClient, NarrativeSettings};
use crate::data::sample::{SampleConfig, generate_households};
use crate::domain::{
    BatchConfig, CombinedResult, HouseholdRecord, ModelKind, NarrativePolicy, RowError, TrainConfig,
};
use crate::ensemble::stratified_split;
use crate::error::VulnError;
use crate::features::{
    Calibration, CalibrationGrid, REFERENCE_DISTRIBUTION, ScoreWeights, calibrate, derive,
};
use crate::io::bundle::{bundle_path, write_bundle};
use crate::io::ingest::{HouseholdReader, LoadedHouseholds, ParsedRow, load_households};
use crate::labeling::{LabelSources, build_dataset};
use crate::models::bundle::TrainedModelBundle;
use crate::models::compare::{ModelComparison, compare};
use crate::models::context::ModelContext;
use crate::models::train::train;
use crate::models::tune::{BaggingGrid, TuningResult, tune_bagging};

/// Where training or calibration households come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    Csv(PathBuf),
    Synthetic { count: usize, seed: u64 },
}

pub fn load_source(source: &DataSource) -> Result<LoadedHouseholds, VulnError> {
    match source {
        DataSource::Csv(path) => {
            let loaded = load_households(path)?;
            if !loaded.row_errors.is_empty() {
                warn!(
                    rejected = loaded.row_errors.len(),
                    rows_read = loaded.rows_read,
                    "some input rows were rejected"
                );
            }
            Ok(loaded)
        }
        DataSource::Synthetic { count, seed } => {
            let records = generate_households(&SampleConfig {
                count: *count,
                seed: *seed,
                ..SampleConfig::default()
            })?;
            info!(count, seed, "generated synthetic households");
            Ok(LoadedHouseholds {
                labels: vec![None; records.len()],
                rows_read: records.len() as u64,
                records,
                row_errors: Vec::new(),
            })
        }
    }
}

/// All outputs of one training run.
#[derive(Debug, Clone)]
pub struct TrainRun {
    pub bagging: TrainedModelBundle,
    pub boosting: TrainedModelBundle,
    pub comparison: ModelComparison,
    /// Present when the bagging params came from a grid search.
    pub tuning: Option<TuningResult>,
    pub sources: LabelSources,
    pub rows_read: u64,
    pub row_errors: Vec<RowError>,
}

/// Train both classifiers in memory.
///
/// With `tuning`, the bagging params are first chosen by a CV grid search on
/// the training split (the holdout never takes part in the choice).
pub fn train_models(
    source: &DataSource,
    weights: &ScoreWeights,
    config: &TrainConfig,
    tuning: Option<&BaggingGrid>,
) -> Result<TrainRun, VulnError> {
    let loaded = load_source(source)?;
    let (dataset, sources) = build_dataset(&loaded.records, &loaded.labels, weights)?;

    let mut config = config.clone();
    let tuning = match tuning {
        Some(grid) => {
            let (train_idx, _) = stratified_split(&dataset.y, config.holdout_fraction, config.seed);
            let result = tune_bagging(
                &dataset.subset(&train_idx),
                &config.bagging,
                grid,
                config.cv_folds,
                config.seed,
            )?;
            config.bagging = result.best.clone();
            Some(result)
        }
        None => None,
    };

    let (bagging, boosting) = rayon::join(
        || train(ModelKind::Bagging, &dataset, &config),
        || train(ModelKind::Boosting, &dataset, &config),
    );
    let (bagging, boosting) = (bagging?, boosting?);
    let comparison = compare(&bagging, &boosting);

    Ok(TrainRun {
        bagging,
        boosting,
        comparison,
        tuning,
        sources,
        rows_read: loaded.rows_read,
        row_errors: loaded.row_errors,
    })
}

/// Train both classifiers and write `bagging.json` / `boosting.json` into `out_dir`.
pub fn run_train(
    source: &DataSource,
    weights: &ScoreWeights,
    config: &TrainConfig,
    tuning: Option<&BaggingGrid>,
    out_dir: &Path,
) -> Result<TrainRun, VulnError> {
    let run = train_models(source, weights, config, tuning)?;
    for bundle in [&run.bagging, &run.boosting] {
        let path = bundle_path(out_dir, bundle.model_kind);
        write_bundle(&path, bundle)?;
        info!(model = bundle.model_kind.file_stem(), path = %path.display(), "bundle written");
    }
    Ok(run)
}

/// A combiner for `policy`, wired to the HTTP narrative client when the
/// environment configures one. Without configuration, narratives are reported
/// as unavailable rather than failing the run.
pub fn build_combiner(policy: NarrativePolicy) -> Result<MetaCombiner, VulnError> {
    let combiner = MetaCombiner::new(policy);
    if policy == NarrativePolicy::Never {
        return Ok(combiner);
    }
    match NarrativeSettings::from_env()? {
        Some(settings) => {
            let client = HttpNarrativeClient::new(settings)?;
            let timeout = client.timeout();
            Ok(combiner.with_generator(Arc::new(client), timeout))
        }
        None => {
            warn!("NARRATIVE_API_KEY is not set; narratives will be reported as not configured");
            Ok(combiner)
        }
    }
}

pub fn predict_one(
    ctx: &ModelContext,
    record: &HouseholdRecord,
    combiner: &MetaCombiner,
) -> Result<CombinedResult, VulnError> {
    ctx.classify(record, combiner)
}

/// Outcome of classifying one row: a result, a skippable row error, or a hard failure.
fn classify_row(
    ctx: &ModelContext,
    combiner: &MetaCombiner,
    row: &Result<ParsedRow, RowError>,
) -> Result<Result<CombinedResult, RowError>, VulnError> {
    let row = match row {
        Ok(row) => row,
        Err(e) => return Ok(Err(e.clone())),
    };
    match ctx.classify(&row.record, combiner) {
        Ok(result) => Ok(Ok(result)),
        Err(e @ VulnError::Validation { .. }) => Ok(Err(RowError {
            line: row.line,
            message: e.to_string(),
        })),
        Err(e) => Err(e),
    }
}

/// Stream households through both classifiers into per-region aggregates.
///
/// Rows are read in chunks of `config.chunk_size`, classified in parallel, given
/// their narratives (see [`MetaCombiner::narrate_all`]), then folded into the
/// aggregator in input order. `max_rows` counts rows read
/// (valid or not). Setting `cancel` stops the run at the next chunk boundary
/// with a valid partial report.
pub fn run_batch<R: Read>(
    ctx: &ModelContext,
    reader: HouseholdReader<R>,
    combiner: &MetaCombiner,
    config: &BatchConfig,
    cancel: &AtomicBool,
) -> Result<AggregationReport, VulnError> {
    if config.chunk_size == 0 {
        return Err(VulnError::validation("chunk_size", "must be >= 1"));
    }
    // Fail before reading anything if a model is missing.
    for kind in ModelKind::ALL {
        ctx.get(kind)?;
    }

    // Classification never waits on the narrative service; narratives are
    // attached per chunk under one shared deadline.
    let merger = MetaCombiner::new(NarrativePolicy::Never);
    let mut rows = reader.peekable();
    let mut aggregator = MunicipalityAggregator::new(config.max_row_errors_kept);
    let mut chunk: Vec<Result<ParsedRow, RowError>> = Vec::with_capacity(config.chunk_size);
    let mut rows_read: u64 = 0;
    let mut truncated = false;
    let mut cancelled = false;

    loop {
        if cancel.load(Ordering::Relaxed) {
            cancelled = true;
            break;
        }

        chunk.clear();
        while chunk.len() < config.chunk_size {
            if config.max_rows.is_some_and(|m| rows_read >= m) {
                break;
            }
            match rows.next() {
                Some(row) => {
                    rows_read += 1;
                    chunk.push(row);
                }
                None => break,
            }
        }
        if chunk.is_empty() {
            break;
        }

        let mut outcomes: Vec<Result<CombinedResult, RowError>> = chunk
            .par_iter()
            .map(|row| classify_row(ctx, &merger, row))
            .collect::<Result<_, VulnError>>()?;
        combiner.narrate_all(outcomes.iter_mut().filter_map(|o| o.as_mut().ok()));

        for outcome in outcomes {
            match outcome {
                Ok(result) => aggregator.push(&result, result.record.region.as_ref())?,
                Err(row_error) => aggregator.record_skip(row_error),
            }
        }
        debug!(
            rows_read,
            processed = aggregator.processed(),
            skipped = aggregator.skipped(),
            "chunk folded"
        );
    }

    if !cancelled && config.max_rows.is_some_and(|m| rows_read >= m) {
        truncated = rows.peek().is_some();
    }
    Ok(aggregator.finish(truncated, cancelled))
}

/// Calibrate the default weights on the households from `source`.
pub fn run_calibrate(source: &DataSource) -> Result<Calibration, VulnError> {
    let loaded = load_source(source)?;
    let vectors = loaded
        .records
        .iter()
        .map(derive)
        .collect::<Result<Vec<_>, _>>()?;
    calibrate(
        &vectors,
        &ScoreWeights::default(),
        &REFERENCE_DISTRIBUTION,
        &CalibrationGrid::default(),
    )
}

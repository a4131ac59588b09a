//! Cross-validated grid search over the bagging hyperparameters.
//!
//! Every grid point is scored on the same stratified folds, in parallel. The
//! best mean fold accuracy wins and ties go to the lower grid index, so a
//! search is reproducible for a fixed seed.

use std::time::Instant;

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{BaggingParams, ModelKind, TrainConfig};
use crate::ensemble::{ClassificationMetrics, CvScores, Estimator, LabeledDataset, stratified_folds};
use crate::error::VulnError;
use crate::math::StandardScaler;
use crate::models::train::MIN_TRAINING_ROWS;

/// Values tried per axis. `sqrt_features` and `seed` come from the base params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaggingGrid {
    pub n_trees: Vec<usize>,
    pub max_depth: Vec<usize>,
    pub min_samples_leaf: Vec<usize>,
}

impl Default for BaggingGrid {
    fn default() -> Self {
        Self {
            n_trees: vec![50, 100, 200],
            max_depth: vec![10, 20, 30],
            min_samples_leaf: vec![1, 2, 4],
        }
    }
}

impl BaggingGrid {
    pub fn len(&self) -> usize {
        self.n_trees.len() * self.max_depth.len() * self.min_samples_leaf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All parameter sets in row-major order (`n_trees` outermost).
    fn points(&self, base: &BaggingParams) -> Result<Vec<BaggingParams>, VulnError> {
        for (field, axis) in [
            ("n_trees", &self.n_trees),
            ("max_depth", &self.max_depth),
            ("min_samples_leaf", &self.min_samples_leaf),
        ] {
            if axis.is_empty() {
                return Err(VulnError::validation(field, "grid axis has no values"));
            }
            if axis.contains(&0) {
                return Err(VulnError::validation(field, "grid values must be >= 1"));
            }
        }
        let mut points = Vec::with_capacity(self.len());
        for &n_trees in &self.n_trees {
            for &max_depth in &self.max_depth {
                for &min_samples_leaf in &self.min_samples_leaf {
                    points.push(BaggingParams {
                        n_trees,
                        max_depth,
                        min_samples_leaf,
                        ..base.clone()
                    });
                }
            }
        }
        Ok(points)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningCandidate {
    pub params: BaggingParams,
    pub cv: CvScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningResult {
    pub best: BaggingParams,
    pub best_cv: CvScores,
    pub best_index: usize,
    /// Every grid point with its fold scores, in grid order.
    pub candidates: Vec<TuningCandidate>,
}

struct Fold {
    fit_x: DMatrix<f64>,
    fit_y: Vec<usize>,
    test_x: DMatrix<f64>,
    test_y: Vec<usize>,
}

/// Score every point of `grid` with `folds`-fold stratified CV on `dataset`.
pub fn tune_bagging(
    dataset: &LabeledDataset,
    base: &BaggingParams,
    grid: &BaggingGrid,
    folds: usize,
    seed: u64,
) -> Result<TuningResult, VulnError> {
    if folds < 2 {
        return Err(VulnError::validation("cv_folds", "must be >= 2"));
    }
    if dataset.len() < MIN_TRAINING_ROWS {
        return Err(VulnError::InsufficientData(format!(
            "need at least {MIN_TRAINING_ROWS} labeled households to tune, got {}",
            dataset.len()
        )));
    }
    let points = grid.points(base)?;
    let started = Instant::now();

    // The scaler does not depend on the tree params, so each fold is scaled once.
    let folds: Vec<Fold> = stratified_folds(&dataset.y, folds, seed)
        .iter()
        .map(|test_idx| {
            let fit_idx: Vec<usize> = (0..dataset.len())
                .filter(|i| test_idx.binary_search(i).is_err())
                .collect();
            let fit = dataset.subset(&fit_idx);
            let test = dataset.subset(test_idx);
            let scaler = StandardScaler::fit(&fit.x)?;
            Ok(Fold {
                fit_x: scaler.transform(&fit.x),
                fit_y: fit.y,
                test_x: scaler.transform(&test.x),
                test_y: test.y,
            })
        })
        .collect::<Result<_, VulnError>>()?;

    let candidates: Vec<TuningCandidate> = points
        .par_iter()
        .map(|params| {
            let config = TrainConfig {
                bagging: params.clone(),
                ..TrainConfig::default()
            };
            let scores = folds
                .iter()
                .map(|fold| {
                    let estimator = Estimator::fit(ModelKind::Bagging, &fold.fit_x, &fold.fit_y, &config)?;
                    let predicted = estimator.predict_matrix(&fold.test_x);
                    Ok(ClassificationMetrics::compute(&fold.test_y, &predicted).accuracy)
                })
                .collect::<Result<Vec<f64>, VulnError>>()?;
            Ok(TuningCandidate {
                params: params.clone(),
                cv: CvScores::from_folds(scores),
            })
        })
        .collect::<Result<_, VulnError>>()?;

    let mut best_index = 0;
    for (idx, c) in candidates.iter().enumerate().skip(1) {
        if c.cv.mean > candidates[best_index].cv.mean {
            best_index = idx;
        }
    }
    let best = candidates[best_index].clone();

    info!(
        grid_points = candidates.len(),
        best_index,
        n_trees = best.params.n_trees,
        max_depth = best.params.max_depth,
        min_samples_leaf = best.params.min_samples_leaf,
        cv_mean = best.cv.mean,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "bagging grid search finished"
    );

    Ok(TuningResult {
        best: best.params,
        best_cv: best.cv,
        best_index,
        candidates,
    })
}

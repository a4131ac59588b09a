//! Classifier B: gradient-boosted trees with a softmax objective.
//!
//! Every round fits one regression tree per class to the gradient of the
//! multi-class log loss (Newton leaves, L2 regularized), scaled by the learning
//! rate. A stratified slice of the training rows is held back; when its log
//! loss has not improved for `early_stopping_rounds` rounds, training stops and
//! the ensemble is truncated to the best round.

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{BoostingParams, VulnerabilityLabel};
use crate::ensemble::validation::stratified_split;
use crate::error::VulnError;
use crate::math::{argmax, log_loss, normalize, softmax};
use crate::tree::{DecisionTree, NewtonCriterion, TreeParams};

const K: usize = VulnerabilityLabel::COUNT;
/// L2 penalty on leaf values.
const LAMBDA: f64 = 1.0;
const MIN_HESSIAN: f64 = 1e-6;
const MIN_PRIOR: f64 = 1e-6;
/// Improvements smaller than this do not reset the patience counter.
const MIN_IMPROVEMENT: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    /// Initial logits (log class priors).
    pub base_score: [f64; K],
    pub learning_rate: f64,
    /// One tree per class per kept round.
    pub rounds: Vec<Vec<DecisionTree>>,
    /// Rounds trained before stopping (kept rounds may be fewer).
    pub rounds_trained: usize,
    pub stopped_early: bool,
    pub params: BoostingParams,
}

impl BoostedTrees {
    pub fn fit(x: &DMatrix<f64>, y: &[usize], params: &BoostingParams) -> Result<Self, VulnError> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(VulnError::InsufficientData(format!(
                "boosting needs matching non-empty inputs, got {n} rows and {} labels",
                y.len()
            )));
        }
        if params.max_rounds == 0 {
            return Err(VulnError::validation("max_rounds", "must be >= 1"));
        }
        if !(params.learning_rate.is_finite() && params.learning_rate > 0.0) {
            return Err(VulnError::validation("learning_rate", "must be > 0"));
        }
        if !(0.0..1.0).contains(&params.validation_fraction) {
            return Err(VulnError::validation("validation_fraction", "must be in [0, 1)"));
        }

        let (fit_idx, val_idx) = if params.validation_fraction > 0.0 && params.early_stopping_rounds > 0 {
            stratified_split(y, params.validation_fraction, params.seed)
        } else {
            ((0..n).collect(), Vec::new())
        };

        let base_score = log_priors(fit_idx.iter().map(|&i| y[i]));
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
        };

        let mut logits: Vec<[f64; K]> = vec![base_score; n];
        let mut rounds: Vec<Vec<DecisionTree>> = Vec::new();
        let mut best_loss = f64::INFINITY;
        let mut best_rounds = 0;
        let mut stopped_early = false;

        for round in 0..params.max_rounds {
            let probs: Vec<Vec<f64>> = logits.iter().map(|z| softmax(z)).collect();

            let trees: Vec<DecisionTree> = (0..K)
                .into_par_iter()
                .map(|k| {
                    let mut grad = vec![0.0; n];
                    let mut hess = vec![0.0; n];
                    for &i in &fit_idx {
                        let p = probs[i][k];
                        grad[i] = p - if y[i] == k { 1.0 } else { 0.0 };
                        hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
                    }
                    let criterion = NewtonCriterion {
                        grad: &grad,
                        hess: &hess,
                        lambda: LAMBDA,
                    };
                    // Trees use every feature, so the RNG is never consulted.
                    let mut rng = StdRng::seed_from_u64(params.seed);
                    DecisionTree::fit(x, fit_idx.clone(), &criterion, &tree_params, &mut rng)
                })
                .collect();

            for (i, z) in logits.iter_mut().enumerate() {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                for (k, tree) in trees.iter().enumerate() {
                    z[k] += params.learning_rate * tree.predict(&row)[0];
                }
            }
            rounds.push(trees);

            if val_idx.is_empty() {
                best_rounds = rounds.len();
                continue;
            }

            let val_probs: Vec<Vec<f64>> = val_idx.iter().map(|&i| softmax(&logits[i])).collect();
            let val_targets: Vec<usize> = val_idx.iter().map(|&i| y[i]).collect();
            let loss = log_loss(&val_probs, &val_targets);
            debug!(round, loss, "boosting round");

            if loss < best_loss - MIN_IMPROVEMENT {
                best_loss = loss;
                best_rounds = rounds.len();
            } else if rounds.len() - best_rounds >= params.early_stopping_rounds {
                stopped_early = true;
                info!(
                    round,
                    best_rounds, best_loss, "early stopping: validation loss stopped improving"
                );
                break;
            }
        }

        let rounds_trained = rounds.len();
        rounds.truncate(best_rounds.max(1));

        Ok(Self {
            base_score,
            learning_rate: params.learning_rate,
            rounds,
            rounds_trained,
            stopped_early,
            params: params.clone(),
        })
    }

    pub fn predict_proba(&self, row: &[f64]) -> [f64; K] {
        let mut z = self.base_score;
        for trees in &self.rounds {
            for (k, tree) in trees.iter().enumerate() {
                z[k] += self.learning_rate * tree.predict(row)[0];
            }
        }
        let p = softmax(&z);
        let mut out = [0.0; K];
        out.copy_from_slice(&p);
        out
    }

    pub fn predict(&self, row: &[f64]) -> usize {
        argmax(&self.predict_proba(row))
    }

    pub fn rounds_kept(&self) -> usize {
        self.rounds.len()
    }

    /// Total split gain per feature across all trees, summing to 1.
    pub fn feature_importances(&self) -> Vec<f64> {
        let n_features = self
            .rounds
            .first()
            .and_then(|r| r.first())
            .map_or(0, |t| t.n_features);
        let mut total = vec![0.0; n_features];
        for tree in self.rounds.iter().flatten() {
            for (acc, v) in total.iter_mut().zip(&tree.importances) {
                *acc += v;
            }
        }
        normalize(&mut total);
        total
    }

    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.rounds.is_empty() {
            return Err("boosted ensemble has no rounds".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0)
            || self.base_score.iter().any(|v| !v.is_finite())
        {
            return Err("boosted ensemble has invalid base score or learning rate".to_string());
        }
        for (r, trees) in self.rounds.iter().enumerate() {
            if trees.len() != K {
                return Err(format!("round {r} has {} trees, expected {K}", trees.len()));
            }
            for tree in trees {
                tree.validate(n_features, 1).map_err(|e| format!("round {r}: {e}"))?;
            }
        }
        Ok(())
    }
}

fn log_priors(labels: impl Iterator<Item = usize>) -> [f64; K] {
    let mut counts = [0.0; K];
    for k in labels {
        counts[k] += 1.0;
    }
    normalize(&mut counts);
    counts.map(|p| p.max(MIN_PRIOR).ln())
}

//! Classifier A: bagged decision trees (random forest).
//!
//! Each tree is grown on its own bootstrap resample with its own RNG stream,
//! so trees are independent and built in parallel. Prediction is a hard vote:
//! the probability of a class is the fraction of trees voting for it, which
//! does not depend on tree order.

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{BaggingParams, VulnerabilityLabel};
use crate::error::VulnError;
use crate::math::{argmax, normalize};
use crate::tree::{DecisionTree, GiniCriterion, TreeParams};

const K: usize = VulnerabilityLabel::COUNT;

/// Derive the RNG seed of tree `t` from the forest seed.
fn tree_seed(seed: u64, t: usize) -> u64 {
    seed ^ (t as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaggingForest {
    pub trees: Vec<DecisionTree>,
    pub params: BaggingParams,
}

impl BaggingForest {
    pub fn fit(x: &DMatrix<f64>, y: &[usize], params: &BaggingParams) -> Result<Self, VulnError> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(VulnError::InsufficientData(format!(
                "bagging needs matching non-empty inputs, got {n} rows and {} labels",
                y.len()
            )));
        }
        if params.n_trees == 0 {
            return Err(VulnError::validation("n_trees", "must be >= 1"));
        }

        let n_features = x.ncols();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: params
                .sqrt_features
                .then(|| ((n_features as f64).sqrt().round() as usize).max(1)),
        };
        let criterion = GiniCriterion {
            targets: y,
            n_classes: K,
        };

        let trees: Vec<DecisionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(tree_seed(params.seed, t));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit(x, bootstrap, &criterion, &tree_params, &mut rng)
            })
            .collect();

        debug!(
            trees = trees.len(),
            max_depth = trees.iter().map(DecisionTree::depth).max().unwrap_or(0),
            "bagging forest grown"
        );

        Ok(Self {
            trees,
            params: params.clone(),
        })
    }

    /// Vote fractions in class order.
    pub fn predict_proba(&self, row: &[f64]) -> [f64; K] {
        let mut votes = [0.0; K];
        for tree in &self.trees {
            votes[argmax(tree.predict(row))] += 1.0;
        }
        normalize(&mut votes);
        votes
    }

    pub fn predict(&self, row: &[f64]) -> usize {
        argmax(&self.predict_proba(row))
    }

    /// Mean of per-tree normalized impurity decreases, summing to 1.
    pub fn feature_importances(&self) -> Vec<f64> {
        let n_features = self.trees.first().map_or(0, |t| t.n_features);
        let mut total = vec![0.0; n_features];
        for tree in &self.trees {
            let sum: f64 = tree.importances.iter().sum();
            if sum > 0.0 {
                for (acc, v) in total.iter_mut().zip(&tree.importances) {
                    *acc += v / sum;
                }
            }
        }
        normalize(&mut total);
        total
    }

    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("bagging forest has no trees".to_string());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(n_features, K).map_err(|e| format!("tree {t}: {e}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Four well-separated clusters on x0 with a noise column.
    fn clusters(n_per: usize) -> (DMatrix<f64>, Vec<usize>) {
        let mut flat = Vec::new();
        let mut y = Vec::new();
        for k in 0..K {
            for i in 0..n_per {
                flat.push(k as f64 * 10.0 + (i % 3) as f64);
                flat.push(((i * 13 + k) % 7) as f64);
                y.push(k);
            }
        }
        (DMatrix::from_row_slice(y.len(), 2, &flat), y)
    }

    fn small_params() -> BaggingParams {
        BaggingParams {
            n_trees: 15,
            max_depth: 6,
            min_samples_leaf: 1,
            sqrt_features: false,
            seed: 7,
        }
    }

    #[test]
    fn separable_clusters_are_learned() {
        let (x, y) = clusters(12);
        let forest = BaggingForest::fit(&x, &y, &small_params()).unwrap();
        for k in 0..K {
            let row = [k as f64 * 10.0 + 1.0, 3.0];
            let p = forest.predict_proba(&row);
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert_eq!(forest.predict(&row), k, "probabilities {p:?}");
        }
        let imp = forest.feature_importances();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1]);
        assert!(forest.validate(2).is_ok());
    }

    #[test]
    fn vote_is_order_independent_and_fit_is_deterministic() {
        let (x, y) = clusters(8);
        let forest = BaggingForest::fit(&x, &y, &small_params()).unwrap();
        let again = BaggingForest::fit(&x, &y, &small_params()).unwrap();
        assert_eq!(forest, again);

        let mut reversed = forest.clone();
        reversed.trees.reverse();
        for i in 0..x.nrows() {
            let row: Vec<f64> = x.row(i).iter().copied().collect();
            assert_eq!(forest.predict_proba(&row), reversed.predict_proba(&row));
        }
    }

    #[test]
    fn rejects_empty_or_zero_tree_forest() {
        let x = DMatrix::<f64>::zeros(0, 2);
        assert!(BaggingForest::fit(&x, &[], &small_params()).is_err());

        let (x, y) = clusters(4);
        let params = BaggingParams {
            n_trees: 0,
            ..small_params()
        };
        assert!(BaggingForest::fit(&x, &y, &params).is_err());
    }
}

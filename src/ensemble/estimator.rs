//! The two ensemble kinds behind one type.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{ModelKind, TrainConfig, VulnerabilityLabel};
use crate::ensemble::bagging::BaggingForest;
use crate::ensemble::boosting::BoostedTrees;
use crate::error::VulnError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Estimator {
    Bagging(BaggingForest),
    Boosting(BoostedTrees),
}

impl Estimator {
    pub fn fit(
        kind: ModelKind,
        x: &DMatrix<f64>,
        y: &[usize],
        config: &TrainConfig,
    ) -> Result<Self, VulnError> {
        match kind {
            ModelKind::Bagging => Ok(Estimator::Bagging(BaggingForest::fit(x, y, &config.bagging)?)),
            ModelKind::Boosting => Ok(Estimator::Boosting(BoostedTrees::fit(x, y, &config.boosting)?)),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Estimator::Bagging(_) => ModelKind::Bagging,
            Estimator::Boosting(_) => ModelKind::Boosting,
        }
    }

    /// Row must already be scaled.
    pub fn predict_proba(&self, row: &[f64]) -> [f64; VulnerabilityLabel::COUNT] {
        match self {
            Estimator::Bagging(m) => m.predict_proba(row),
            Estimator::Boosting(m) => m.predict_proba(row),
        }
    }

    pub fn predict_matrix(&self, x: &DMatrix<f64>) -> Vec<usize> {
        (0..x.nrows())
            .map(|i| {
                let row: Vec<f64> = x.row(i).iter().copied().collect();
                match self {
                    Estimator::Bagging(m) => m.predict(&row),
                    Estimator::Boosting(m) => m.predict(&row),
                }
            })
            .collect()
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        match self {
            Estimator::Bagging(m) => m.feature_importances(),
            Estimator::Boosting(m) => m.feature_importances(),
        }
    }

    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        match self {
            Estimator::Bagging(m) => m.validate(n_features),
            Estimator::Boosting(m) => m.validate(n_features),
        }
    }
}

//! Side-by-side comparison of the two trained classifiers.

use serde::Serialize;

use crate::domain::ModelKind;
use crate::models::bundle::TrainedModelBundle;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub model: ModelKind,
    pub holdout_accuracy: f64,
    pub macro_f1: f64,
    pub cv_mean: Option<f64>,
    pub cv_std: Option<f64>,
    /// Top features by importance, descending.
    pub top_features: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelComparison {
    pub models: Vec<ModelSummary>,
    /// Higher holdout accuracy; bagging wins an exact tie.
    pub best: ModelKind,
}

pub fn summarize(bundle: &TrainedModelBundle, top_n: usize) -> ModelSummary {
    let mut features = bundle.feature_importances();
    features.sort_by(|a, b| b.1.total_cmp(&a.1));
    features.truncate(top_n);
    ModelSummary {
        model: bundle.model_kind,
        holdout_accuracy: bundle.metrics.holdout.accuracy,
        macro_f1: bundle.metrics.holdout.macro_f1,
        cv_mean: bundle.metrics.cv.as_ref().map(|c| c.mean),
        cv_std: bundle.metrics.cv.as_ref().map(|c| c.std),
        top_features: features,
    }
}

pub fn compare(a: &TrainedModelBundle, b: &TrainedModelBundle) -> ModelComparison {
    let sa = summarize(a, 5);
    let sb = summarize(b, 5);
    let best = if sb.holdout_accuracy > sa.holdout_accuracy {
        sb.model
    } else {
        sa.model
    };
    ModelComparison {
        models: vec![sa, sb],
        best,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bundle::tests::trained;

    #[test]
    fn comparison_names_the_more_accurate_model() {
        let a = trained(ModelKind::Bagging);
        let mut b = trained(ModelKind::Boosting);

        b.metrics.holdout.accuracy = a.metrics.holdout.accuracy + 0.01;
        assert_eq!(compare(&a, &b).best, ModelKind::Boosting);

        b.metrics.holdout.accuracy = a.metrics.holdout.accuracy;
        let cmp = compare(&a, &b);
        assert_eq!(cmp.best, ModelKind::Bagging);
        assert_eq!(cmp.models.len(), 2);
        let top = &cmp.models[0].top_features;
        assert!(top.len() <= 5);
        assert!(top.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}

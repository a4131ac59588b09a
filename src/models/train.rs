//! Offline training: holdout split, scaler, estimator, metrics, k-fold CV.

use std::time::Instant;

use chrono::Utc;
use rayon::prelude::*;
use tracing::info;

use crate::domain::{ModelKind, TrainConfig, VulnerabilityLabel};
use crate::ensemble::{
    ClassificationMetrics, CvScores, Estimator, LabeledDataset, stratified_folds, stratified_split,
};
use crate::error::VulnError;
use crate::features::FEATURE_SCHEMA_VERSION;
use crate::math::StandardScaler;
use crate::models::bundle::{BUNDLE_FORMAT_VERSION, TrainedModelBundle, TrainingMetrics};

/// Below this many labeled rows neither the holdout nor CV means anything.
pub const MIN_TRAINING_ROWS: usize = 20;

fn check_config(config: &TrainConfig) -> Result<(), VulnError> {
    if !(config.holdout_fraction > 0.0 && config.holdout_fraction < 1.0) {
        return Err(VulnError::validation(
            "holdout_fraction",
            format!("must be in (0, 1), got {}", config.holdout_fraction),
        ));
    }
    if config.cross_validate && config.cv_folds < 2 {
        return Err(VulnError::validation("cv_folds", "must be >= 2"));
    }
    Ok(())
}

/// Scale, fit and score one estimator on `train`, returning it with its scaler.
fn fit_scaled(
    kind: ModelKind,
    train: &LabeledDataset,
    config: &TrainConfig,
) -> Result<(StandardScaler, Estimator), VulnError> {
    let scaler = StandardScaler::fit(&train.x)?;
    let estimator = Estimator::fit(kind, &scaler.transform(&train.x), &train.y, config)?;
    Ok((scaler, estimator))
}

fn accuracy_on(scaler: &StandardScaler, estimator: &Estimator, data: &LabeledDataset) -> ClassificationMetrics {
    let predicted = estimator.predict_matrix(&scaler.transform(&data.x));
    ClassificationMetrics::compute(&data.y, &predicted)
}

/// Train one classifier and package it as a bundle.
pub fn train(
    kind: ModelKind,
    dataset: &LabeledDataset,
    config: &TrainConfig,
) -> Result<TrainedModelBundle, VulnError> {
    check_config(config)?;
    if dataset.len() < MIN_TRAINING_ROWS {
        return Err(VulnError::InsufficientData(format!(
            "need at least {MIN_TRAINING_ROWS} labeled households, got {}",
            dataset.len()
        )));
    }
    let counts = dataset.label_counts();
    let classes_present = VulnerabilityLabel::ALL
        .iter()
        .filter(|&&l| counts.get(l) > 0)
        .count();
    if classes_present < 2 {
        return Err(VulnError::InsufficientData(
            "training labels contain a single tier".to_string(),
        ));
    }

    let started = Instant::now();
    let (train_idx, holdout_idx) = stratified_split(&dataset.y, config.holdout_fraction, config.seed);
    let train_set = dataset.subset(&train_idx);
    let holdout_set = dataset.subset(&holdout_idx);

    let (scaler, estimator) = fit_scaled(kind, &train_set, config)?;
    let train_accuracy = accuracy_on(&scaler, &estimator, &train_set).accuracy;
    let holdout = accuracy_on(&scaler, &estimator, &holdout_set);

    let cv = if config.cross_validate {
        let folds = stratified_folds(&train_set.y, config.cv_folds, config.seed);
        let scores: Vec<f64> = folds
            .par_iter()
            .map(|test_idx| {
                let fit_idx: Vec<usize> = (0..train_set.len())
                    .filter(|i| test_idx.binary_search(i).is_err())
                    .collect();
                let (s, e) = fit_scaled(kind, &train_set.subset(&fit_idx), config)?;
                Ok(accuracy_on(&s, &e, &train_set.subset(test_idx)).accuracy)
            })
            .collect::<Result<_, VulnError>>()?;
        Some(CvScores::from_folds(scores))
    } else {
        None
    };

    let (rounds_trained, rounds_kept) = match &estimator {
        Estimator::Boosting(m) => (Some(m.rounds_trained), Some(m.rounds_kept())),
        Estimator::Bagging(_) => (None, None),
    };

    info!(
        model = kind.file_stem(),
        n_train = train_set.len(),
        n_holdout = holdout_set.len(),
        train_accuracy,
        holdout_accuracy = holdout.accuracy,
        cv_mean = cv.as_ref().map(|c| c.mean),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "model trained"
    );

    let bundle = TrainedModelBundle {
        format_version: BUNDLE_FORMAT_VERSION,
        schema_version: FEATURE_SCHEMA_VERSION.to_string(),
        model_kind: kind,
        estimator,
        scaler,
        feature_names: dataset.feature_names.clone(),
        metrics: TrainingMetrics {
            n_train: train_set.len(),
            n_holdout: holdout_set.len(),
            train_accuracy,
            holdout,
            cv,
            label_counts: counts,
            rounds_trained,
            rounds_kept,
        },
        trained_at: Utc::now(),
    };
    bundle.validate()?;
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SampleConfig, generate_households};
    use crate::domain::{BaggingParams, BoostingParams};
    use crate::features::ScoreWeights;
    use crate::labeling::bootstrap_dataset;
    use crate::models::bundle::tests::quick_config;

    fn dataset(count: usize) -> LabeledDataset {
        let records = generate_households(&SampleConfig {
            count,
            seed: 4,
            ..SampleConfig::default()
        })
        .unwrap();
        bootstrap_dataset(&records, &ScoreWeights::default()).unwrap()
    }

    #[test]
    fn both_models_learn_the_bootstrap_labels() {
        let ds = dataset(1000);
        for kind in ModelKind::ALL {
            let bundle = train(kind, &ds, &quick_config()).unwrap();
            let m = &bundle.metrics;
            assert_eq!(m.n_train + m.n_holdout, 1000);
            assert!(m.holdout.accuracy > 0.75, "{kind:?} holdout {}", m.holdout.accuracy);
            assert!(m.train_accuracy >= m.holdout.accuracy - 0.05);
            assert_eq!(bundle.model_kind, kind);
            assert_eq!(m.rounds_kept.is_some(), kind == ModelKind::Boosting);
        }
    }

    #[test]
    fn cross_validation_reports_each_fold() {
        let ds = dataset(400);
        let config = TrainConfig {
            cross_validate: true,
            cv_folds: 3,
            bagging: BaggingParams {
                n_trees: 10,
                ..BaggingParams::default()
            },
            boosting: BoostingParams {
                max_rounds: 10,
                ..BoostingParams::default()
            },
            ..TrainConfig::default()
        };
        let bundle = train(ModelKind::Bagging, &ds, &config).unwrap();
        let cv = bundle.metrics.cv.unwrap();
        assert_eq!(cv.folds.len(), 3);
        assert!(cv.folds.iter().all(|a| (0.0..=1.0).contains(a)));
        assert!(cv.mean > 0.5);
    }

    #[test]
    fn too_little_or_single_tier_data_is_rejected() {
        let ds = dataset(10);
        assert!(matches!(
            train(ModelKind::Bagging, &ds, &quick_config()),
            Err(VulnError::InsufficientData(_))
        ));

        let mut ds = dataset(100);
        ds.y.iter_mut().for_each(|k| *k = 2);
        assert!(matches!(
            train(ModelKind::Boosting, &ds, &quick_config()),
            Err(VulnError::InsufficientData(_))
        ));
    }

    #[test]
    fn bad_holdout_fraction_is_a_validation_error() {
        let ds = dataset(100);
        let config = TrainConfig {
            holdout_fraction: 1.0,
            ..quick_config()
        };
        assert!(matches!(
            train(ModelKind::Bagging, &ds, &config),
            Err(VulnError::Validation { field: "holdout_fraction", .. })
        ));
    }
}

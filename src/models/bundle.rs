//! Trained model bundle: everything inference needs, as one validated object.
//!
//! A bundle is only ever constructed complete. Reading one from JSON goes
//! through [`RawBundle`], where every part is optional, and then through
//! [`TrainedModelBundle::try_from_raw`], which names the first missing or
//! inconsistent part instead of failing later at prediction time.

use std::collections::HashSet;
use std::io::Read;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ClassifierPrediction, LabelCounts, ModelKind, VulnerabilityLabel};
use crate::ensemble::{ClassificationMetrics, CvScores, Estimator};
use crate::error::VulnError;
use crate::features::{FeatureRow, FeatureVector};
use crate::math::{StandardScaler, argmax};

/// Bumped whenever the on-disk layout changes incompatibly.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub n_train: usize,
    pub n_holdout: usize,
    pub train_accuracy: f64,
    pub holdout: ClassificationMetrics,
    /// `None` when cross-validation was disabled.
    pub cv: Option<CvScores>,
    pub label_counts: LabelCounts,
    /// Boosting only: rounds trained and rounds kept after early stopping.
    pub rounds_trained: Option<usize>,
    pub rounds_kept: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainedModelBundle {
    pub format_version: u32,
    pub schema_version: String,
    pub model_kind: ModelKind,
    pub estimator: Estimator,
    pub scaler: StandardScaler,
    pub feature_names: Vec<String>,
    pub metrics: TrainingMetrics,
    pub trained_at: DateTime<Utc>,
}

/// Bundle as read from disk, before validation.
#[derive(Debug, Default, Deserialize)]
pub struct RawBundle {
    pub format_version: Option<u32>,
    pub schema_version: Option<String>,
    pub model_kind: Option<ModelKind>,
    pub estimator: Option<Estimator>,
    pub scaler: Option<StandardScaler>,
    pub feature_names: Option<Vec<String>>,
    pub metrics: Option<TrainingMetrics>,
    pub trained_at: Option<DateTime<Utc>>,
}

fn missing(part: &str) -> VulnError {
    VulnError::InvalidBundle(format!("missing part '{part}'"))
}

impl TrainedModelBundle {
    pub fn try_from_raw(raw: RawBundle) -> Result<Self, VulnError> {
        let bundle = Self {
            format_version: raw.format_version.ok_or_else(|| missing("format_version"))?,
            schema_version: raw.schema_version.ok_or_else(|| missing("schema_version"))?,
            model_kind: raw.model_kind.ok_or_else(|| missing("model_kind"))?,
            estimator: raw.estimator.ok_or_else(|| missing("estimator"))?,
            scaler: raw.scaler.ok_or_else(|| missing("scaler"))?,
            feature_names: raw.feature_names.ok_or_else(|| missing("feature_names"))?,
            metrics: raw.metrics.ok_or_else(|| missing("metrics"))?,
            trained_at: raw.trained_at.ok_or_else(|| missing("trained_at"))?,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    /// Parse and validate a JSON bundle.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, VulnError> {
        let raw: RawBundle = serde_json::from_reader(reader)
            .map_err(|e| VulnError::InvalidBundle(format!("unreadable bundle: {e}")))?;
        Self::try_from_raw(raw)
    }

    /// Cross-part consistency.
    pub fn validate(&self) -> Result<(), VulnError> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(VulnError::InvalidBundle(format!(
                "format version {} is not supported (expected {BUNDLE_FORMAT_VERSION})",
                self.format_version
            )));
        }
        if self.schema_version.trim().is_empty() {
            return Err(VulnError::InvalidBundle("empty schema version".to_string()));
        }
        if self.estimator.kind() != self.model_kind {
            return Err(VulnError::InvalidBundle(format!(
                "model_kind is {:?} but estimator is {:?}",
                self.model_kind,
                self.estimator.kind()
            )));
        }

        let n = self.feature_names.len();
        if n == 0 {
            return Err(VulnError::InvalidBundle("empty feature list".to_string()));
        }
        let unique: HashSet<&str> = self.feature_names.iter().map(String::as_str).collect();
        if unique.len() != n {
            return Err(VulnError::InvalidBundle("duplicate feature names".to_string()));
        }

        self.scaler.validate().map_err(VulnError::InvalidBundle)?;
        if self.scaler.n_features() != n {
            return Err(VulnError::InvalidBundle(format!(
                "scaler covers {} features, feature list has {n}",
                self.scaler.n_features()
            )));
        }
        self.estimator.validate(n).map_err(VulnError::InvalidBundle)?;
        Ok(())
    }

    /// Fails with `ShapeMismatch` unless `row.names` equals the bundle's feature list.
    pub fn check_shape(&self, row: &FeatureRow<'_>) -> Result<(), VulnError> {
        let same = row.names.len() == self.feature_names.len()
            && row.values.len() == self.feature_names.len()
            && row
                .names
                .iter()
                .zip(&self.feature_names)
                .all(|(a, b)| *a == b.as_str());
        if same {
            Ok(())
        } else {
            Err(VulnError::ShapeMismatch {
                expected: self.feature_names.clone(),
                actual: row.names.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    pub fn predict_row(&self, row: &FeatureRow<'_>) -> Result<ClassifierPrediction, VulnError> {
        self.check_shape(row)?;
        let scaled = self.scaler.transform_row(&row.values);
        let probabilities = self.estimator.predict_proba(&scaled);
        let label = VulnerabilityLabel::from_index(argmax(&probabilities)).ok_or_else(|| {
            VulnError::InvalidBundle("estimator produced an out-of-range class".to_string())
        })?;
        Ok(ClassifierPrediction {
            model: self.model_kind,
            label,
            probabilities,
        })
    }

    pub fn predict(&self, vector: &FeatureVector) -> Result<ClassifierPrediction, VulnError> {
        self.predict_row(&vector.to_row())
    }

    /// `(feature, weight)` in feature-list order; weights are `>= 0` and sum to 1.
    pub fn feature_importances(&self) -> Vec<(String, f64)> {
        self.feature_names
            .iter()
            .cloned()
            .zip(self.estimator.feature_importances())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::OnceLock;

    use super::*;
    use crate::data::sample::{SampleConfig, generate_households};
    use crate::domain::{BaggingParams, BoostingParams, TrainConfig};
    use crate::features::engine::tests::reference_record;
    use crate::features::{ScoreWeights, derive};
    use crate::labeling::bootstrap_dataset;
    use crate::models::train::train;

    /// Small but realistic config so tests stay fast.
    pub(crate) fn quick_config() -> TrainConfig {
        TrainConfig {
            cross_validate: false,
            bagging: BaggingParams {
                n_trees: 25,
                max_depth: 10,
                ..BaggingParams::default()
            },
            boosting: BoostingParams {
                max_rounds: 40,
                learning_rate: 0.2,
                max_depth: 4,
                ..BoostingParams::default()
            },
            ..TrainConfig::default()
        }
    }

    /// Trained once per process and cloned out; several test modules share these.
    pub(crate) fn trained(kind: ModelKind) -> TrainedModelBundle {
        static BAGGING: OnceLock<TrainedModelBundle> = OnceLock::new();
        static BOOSTING: OnceLock<TrainedModelBundle> = OnceLock::new();
        let cell = match kind {
            ModelKind::Bagging => &BAGGING,
            ModelKind::Boosting => &BOOSTING,
        };
        cell.get_or_init(|| {
            let records = generate_households(&SampleConfig {
                count: 1200,
                seed: 21,
                ..SampleConfig::default()
            })
            .unwrap();
            let dataset = bootstrap_dataset(&records, &ScoreWeights::default()).unwrap();
            train(kind, &dataset, &quick_config()).unwrap()
        })
        .clone()
    }

    #[test]
    fn prediction_is_a_distribution_and_idempotent() {
        let bundle = trained(ModelKind::Boosting);
        let v = derive(&reference_record()).unwrap();
        let a = bundle.predict(&v).unwrap();
        let b = bundle.predict(&v).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.model, ModelKind::Boosting);
        assert_eq!(a.probabilities.len(), VulnerabilityLabel::COUNT);
        assert!((a.probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(a.probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn shape_mismatch_fails_fast() {
        let bundle = trained(ModelKind::Bagging);
        let v = derive(&reference_record()).unwrap();

        let mut row = v.to_row();
        row.names.swap(0, 1);
        assert!(matches!(bundle.predict_row(&row), Err(VulnError::ShapeMismatch { .. })));

        let mut row = v.to_row();
        row.names.push("extra");
        row.values.push(1.0);
        assert!(matches!(bundle.predict_row(&row), Err(VulnError::ShapeMismatch { .. })));

        let mut row = v.to_row();
        row.names.pop();
        row.values.pop();
        assert!(matches!(bundle.predict_row(&row), Err(VulnError::ShapeMismatch { .. })));
    }

    #[test]
    fn importances_are_named_and_normalized() {
        let bundle = trained(ModelKind::Bagging);
        let imp = bundle.feature_importances();
        assert_eq!(imp.len(), bundle.feature_names.len());
        assert!(imp.iter().all(|(_, w)| *w >= 0.0));
        assert!((imp.iter().map(|(_, w)| w).sum::<f64>() - 1.0).abs() < 1e-9);
        let income = imp.iter().find(|(n, _)| n == "income_per_capita").unwrap().1;
        assert!(income > 0.05, "income importance {income}");
    }

    #[test]
    fn json_round_trip_and_incomplete_bundles() {
        let bundle = trained(ModelKind::Boosting);
        let json = serde_json::to_string(&bundle).unwrap();
        let loaded = TrainedModelBundle::from_reader(json.as_bytes()).unwrap();
        assert_eq!(loaded, bundle);

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value.as_object_mut().unwrap().remove("scaler");
        let err = TrainedModelBundle::from_reader(value.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, VulnError::InvalidBundle(ref m) if m.contains("scaler")), "{err}");

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["model_kind"] = serde_json::json!("bagging");
        assert!(matches!(
            TrainedModelBundle::from_reader(value.to_string().as_bytes()),
            Err(VulnError::InvalidBundle(_))
        ));

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["feature_names"].as_array_mut().unwrap().pop();
        assert!(matches!(
            TrainedModelBundle::from_reader(value.to_string().as_bytes()),
            Err(VulnError::InvalidBundle(_))
        ));

        assert!(matches!(
            TrainedModelBundle::from_reader(&b"not json"[..]),
            Err(VulnError::InvalidBundle(_))
        ));
    }
}

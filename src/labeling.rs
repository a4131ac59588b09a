//! Bootstrap labeling: the only place the weak-supervision score is used.
//!
//! Training data without ground truth gets its labels from the score; rows that
//! carry a ground-truth label keep it. Inference never calls into this module.

use serde::Serialize;
use tracing::info;

use crate::domain::{HouseholdRecord, LabelCounts, VulnerabilityLabel};
use crate::ensemble::LabeledDataset;
use crate::error::VulnError;
use crate::features::{FeatureVector, ScoreWeights, derive, label};

pub fn bootstrap_label(vector: &FeatureVector, weights: &ScoreWeights) -> VulnerabilityLabel {
    label(weights.score(vector))
}

/// Where the training labels came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelSources {
    pub ground_truth: usize,
    pub bootstrapped: usize,
}

/// Label every record with the score.
pub fn bootstrap_dataset(
    records: &[HouseholdRecord],
    weights: &ScoreWeights,
) -> Result<LabeledDataset, VulnError> {
    let truth = vec![None; records.len()];
    build_dataset(records, &truth, weights).map(|(ds, _)| ds)
}

/// Build a training set, preferring `truth[i]` over the bootstrap label.
pub fn build_dataset(
    records: &[HouseholdRecord],
    truth: &[Option<VulnerabilityLabel>],
    weights: &ScoreWeights,
) -> Result<(LabeledDataset, LabelSources), VulnError> {
    if records.len() != truth.len() {
        return Err(VulnError::InsufficientData(format!(
            "{} records but {} label slots",
            records.len(),
            truth.len()
        )));
    }

    let mut vectors = Vec::with_capacity(records.len());
    let mut labels = Vec::with_capacity(records.len());
    let mut sources = LabelSources::default();
    let mut counts = LabelCounts::default();

    for (record, given) in records.iter().zip(truth) {
        let v = derive(record)?;
        let l = match given {
            Some(l) => {
                sources.ground_truth += 1;
                *l
            }
            None => {
                sources.bootstrapped += 1;
                bootstrap_label(&v, weights)
            }
        };
        counts.add(l);
        vectors.push(v);
        labels.push(l);
    }

    let pct = counts.percentages();
    info!(
        rows = records.len(),
        ground_truth = sources.ground_truth,
        bootstrapped = sources.bootstrapped,
        low = pct[0],
        medium = pct[1],
        high = pct[2],
        very_high = pct[3],
        "training labels assigned"
    );

    Ok((LabeledDataset::from_vectors(&vectors, &labels)?, sources))
}

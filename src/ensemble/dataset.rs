//! Labeled training matrix.

use nalgebra::DMatrix;

use crate::domain::{LabelCounts, VulnerabilityLabel};
use crate::error::VulnError;
use crate::features::{FEATURE_NAMES, FeatureVector};

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataset {
    /// One row per household, columns in `feature_names` order.
    pub x: DMatrix<f64>,
    /// Class indices in [`VulnerabilityLabel::ALL`] order.
    pub y: Vec<usize>,
    pub feature_names: Vec<String>,
}

impl LabeledDataset {
    pub fn from_vectors(
        vectors: &[FeatureVector],
        labels: &[VulnerabilityLabel],
    ) -> Result<Self, VulnError> {
        if vectors.len() != labels.len() {
            return Err(VulnError::InsufficientData(format!(
                "{} feature vectors but {} labels",
                vectors.len(),
                labels.len()
            )));
        }
        let width = FEATURE_NAMES.len();
        let flat: Vec<f64> = vectors.iter().flat_map(|v| v.values()).collect();
        Ok(Self {
            x: DMatrix::from_row_slice(vectors.len(), width, &flat),
            y: labels.iter().map(|l| l.index()).collect(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Rows `idx` (in that order) as a new dataset.
    pub fn subset(&self, idx: &[usize]) -> Self {
        Self {
            x: self.x.select_rows(idx),
            y: idx.iter().map(|&i| self.y[i]).collect(),
            feature_names: self.feature_names.clone(),
        }
    }

    pub fn label_counts(&self) -> LabelCounts {
        let mut counts = LabelCounts::default();
        for &k in &self.y {
            if let Some(label) = VulnerabilityLabel::from_index(k) {
                counts.add(label);
            }
        }
        counts
    }

    pub fn row(&self, i: usize) -> Vec<f64> {
        self.x.row(i).iter().copied().collect()
    }
}

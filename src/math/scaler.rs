//! Per-feature standardization (`(x - mean) / scale`).
//!
//! Fitted on the training matrix and persisted inside the model bundle, so
//! inference applies exactly the transform the estimator was trained on.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::VulnError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    /// Population standard deviation; constant columns get `1.0`.
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &DMatrix<f64>) -> Result<Self, VulnError> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(VulnError::InsufficientData(
                "cannot fit a scaler on an empty matrix".to_string(),
            ));
        }
        let n = x.nrows() as f64;
        let mut mean = Vec::with_capacity(x.ncols());
        let mut scale = Vec::with_capacity(x.ncols());
        for col in x.column_iter() {
            let m = col.sum() / n;
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            let sd = var.sqrt();
            if !(m.is_finite() && sd.is_finite()) {
                return Err(VulnError::InsufficientData(
                    "non-finite value in training matrix".to_string(),
                ));
            }
            mean.push(m);
            scale.push(if sd > 0.0 { sd } else { 1.0 });
        }
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Structural check used when a bundle is loaded.
    pub fn validate(&self) -> Result<(), String> {
        if self.mean.is_empty() || self.mean.len() != self.scale.len() {
            return Err(format!(
                "scaler has {} means and {} scales",
                self.mean.len(),
                self.scale.len()
            ));
        }
        if self.mean.iter().any(|v| !v.is_finite())
            || self.scale.iter().any(|v| !(v.is_finite() && *v > 0.0))
        {
            return Err("scaler has non-finite means or non-positive scales".to_string());
        }
        Ok(())
    }

    /// Row must have `n_features()` entries (callers check the feature list first).
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn transform(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = x.clone();
        for (j, mut col) in out.column_iter_mut().enumerate() {
            let (m, s) = (self.mean[j], self.scale[j]);
            col.apply(|v| *v = (*v - m) / s);
        }
        out
    }
}

//! Score calibration against a reference tier distribution.
//!
//! The indicator weights keep their signs and relative sizes; what is fitted is
//! the part that depends on the population:
//!
//! - the income reference (`mean`, `std`) used to z-normalize income per capita
//! - the income weight and the global offset, chosen by grid search so that the
//!   induced label mix is as close as possible (L1) to the target mix
//!
//! Every grid point is evaluated independently (parallel). Selection is
//! deterministic: minimum error, ties broken by grid index.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::VulnerabilityLabel;
use crate::error::VulnError;
use crate::features::engine::FeatureVector;
use crate::features::score::{ScoreWeights, label};

/// Documented tier mix of the registry population (Low, Medium, High, VeryHigh).
pub const REFERENCE_DISTRIBUTION: [f64; VulnerabilityLabel::COUNT] = [0.016, 0.08, 0.35, 0.55];

/// Below this many vectors the induced distribution is too coarse to calibrate on.
const MIN_CALIBRATION_SAMPLES: usize = 50;

/// Search grid for `(income weight, offset)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationGrid {
    pub income_weight_min: f64,
    pub income_weight_max: f64,
    pub income_weight_steps: usize,
    pub offset_min: f64,
    pub offset_max: f64,
    pub offset_steps: usize,
}

impl Default for CalibrationGrid {
    fn default() -> Self {
        Self {
            income_weight_min: -0.70,
            income_weight_max: -0.10,
            income_weight_steps: 31,
            offset_min: -0.30,
            offset_max: 0.30,
            offset_steps: 61,
        }
    }
}

impl CalibrationGrid {
    /// All `(income_weight, offset)` pairs in row-major order.
    fn points(&self) -> Result<Vec<(f64, f64)>, VulnError> {
        let weights = linspace(self.income_weight_min, self.income_weight_max, self.income_weight_steps)?;
        let offsets = linspace(self.offset_min, self.offset_max, self.offset_steps)?;
        Ok(weights
            .iter()
            .flat_map(|&w| offsets.iter().map(move |&o| (w, o)))
            .collect())
    }
}

/// Calibration output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub weights: ScoreWeights,
    pub distribution: [f64; VulnerabilityLabel::COUNT],
    pub l1_error: f64,
    /// Distribution and error of the starting weights, for comparison.
    pub baseline_distribution: [f64; VulnerabilityLabel::COUNT],
    pub baseline_error: f64,
    pub n: usize,
}

/// Share of each tier induced by `weights` on `vectors`.
pub fn label_distribution(
    vectors: &[FeatureVector],
    weights: &ScoreWeights,
) -> [f64; VulnerabilityLabel::COUNT] {
    let mut counts = [0usize; VulnerabilityLabel::COUNT];
    for v in vectors {
        counts[label(weights.score(v)).index()] += 1;
    }
    let n = vectors.len().max(1) as f64;
    counts.map(|c| c as f64 / n)
}

/// Fit the income reference, income weight and offset of `base` to `target`.
pub fn calibrate(
    vectors: &[FeatureVector],
    base: &ScoreWeights,
    target: &[f64; VulnerabilityLabel::COUNT],
    grid: &CalibrationGrid,
) -> Result<Calibration, VulnError> {
    let n = vectors.len();
    if n < MIN_CALIBRATION_SAMPLES {
        return Err(VulnError::InsufficientData(format!(
            "calibration needs at least {MIN_CALIBRATION_SAMPLES} households, got {n}"
        )));
    }

    let (mean, std) = income_moments(vectors);
    if !(std.is_finite() && std > 0.0) {
        return Err(VulnError::InsufficientData(
            "income per capita has no spread in the calibration sample".to_string(),
        ));
    }

    let baseline_distribution = label_distribution(vectors, base);
    let baseline_error = l1(&baseline_distribution, target);

    let mut anchored = base.clone();
    anchored.income_reference_mean = mean;
    anchored.income_reference_std = std;

    let points = grid.points()?;
    let candidates: Vec<(usize, f64, [f64; VulnerabilityLabel::COUNT])> = points
        .par_iter()
        .enumerate()
        .map(|(idx, &(income_weight, offset))| {
            let mut w = anchored.clone();
            w.income_per_capita = income_weight;
            w.offset = offset;
            let dist = label_distribution(vectors, &w);
            (idx, l1(&dist, target), dist)
        })
        .collect();

    let mut best = &candidates[0];
    for c in &candidates[1..] {
        if c.1 < best.1 || (c.1 == best.1 && c.0 < best.0) {
            best = c;
        }
    }

    let (income_weight, offset) = points[best.0];
    let mut weights = anchored;
    weights.income_per_capita = income_weight;
    weights.offset = offset;

    Ok(Calibration {
        weights,
        distribution: best.2,
        l1_error: best.1,
        baseline_distribution,
        baseline_error,
        n,
    })
}

fn income_moments(vectors: &[FeatureVector]) -> (f64, f64) {
    let n = vectors.len() as f64;
    let mean = vectors.iter().map(|v| v.income_per_capita).sum::<f64>() / n;
    let var = vectors
        .iter()
        .map(|v| (v.income_per_capita - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

fn l1(a: &[f64; VulnerabilityLabel::COUNT], b: &[f64; VulnerabilityLabel::COUNT]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

fn linspace(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, VulnError> {
    if !(min.is_finite() && max.is_finite()) || steps == 0 || max < min {
        return Err(VulnError::InsufficientData(format!(
            "invalid calibration grid axis [{min}, {max}] with {steps} steps"
        )));
    }
    if steps == 1 {
        return Ok(vec![min]);
    }
    let step = (max - min) / (steps as f64 - 1.0);
    Ok((0..steps).map(|i| min + step * i as f64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{SampleConfig, generate_households};
    use crate::features::engine::derive;

    fn sample_vectors(n: usize, seed: u64) -> Vec<FeatureVector> {
        let config = SampleConfig {
            count: n,
            seed,
            ..SampleConfig::default()
        };
        generate_households(&config)
            .unwrap()
            .iter()
            .map(|r| derive(r).unwrap())
            .collect()
    }

    #[test]
    fn default_weights_reproduce_reference_mix_on_sample() {
        let vectors = sample_vectors(5000, 7);
        let dist = label_distribution(&vectors, &ScoreWeights::default());
        for (got, want) in dist.iter().zip(REFERENCE_DISTRIBUTION.iter()) {
            assert!((got - want).abs() < 0.05, "distribution {dist:?}");
        }
    }

    #[test]
    fn calibration_lands_close_to_target() {
        let vectors = sample_vectors(5000, 11);
        let cal = calibrate(
            &vectors,
            &ScoreWeights::default(),
            &REFERENCE_DISTRIBUTION,
            &CalibrationGrid::default(),
        )
        .unwrap();

        assert!(cal.l1_error < 0.08, "l1 {} dist {:?}", cal.l1_error, cal.distribution);
        assert!(cal.l1_error <= cal.baseline_error + 1e-12);
        assert!((cal.distribution.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(cal.weights.income_per_capita < 0.0);
        assert_eq!(label_distribution(&vectors, &cal.weights), cal.distribution);
    }

    #[test]
    fn calibration_is_deterministic() {
        let vectors = sample_vectors(800, 3);
        let grid = CalibrationGrid::default();
        let a = calibrate(&vectors, &ScoreWeights::default(), &REFERENCE_DISTRIBUTION, &grid).unwrap();
        let b = calibrate(&vectors, &ScoreWeights::default(), &REFERENCE_DISTRIBUTION, &grid).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn calibration_rejects_tiny_samples() {
        let vectors = sample_vectors(10, 1);
        let err = calibrate(
            &vectors,
            &ScoreWeights::default(),
            &REFERENCE_DISTRIBUTION,
            &CalibrationGrid::default(),
        )
        .unwrap_err();
        assert!(matches!(err, VulnError::InsufficientData(_)));
    }
}

//! Holdout/k-fold splitting and classification metrics.
//!
//! Splits are stratified: each class is shuffled on its own (seeded) and dealt
//! out proportionally, so rare tiers still show up in every partition.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::domain::VulnerabilityLabel;
use crate::math::mean_std;

const K: usize = VulnerabilityLabel::COUNT;

fn indices_by_class(y: &[usize], rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut by_class = vec![Vec::new(); K];
    for (i, &k) in y.iter().enumerate() {
        by_class[k].push(i);
    }
    for class in &mut by_class {
        class.shuffle(rng);
    }
    by_class
}

/// `(train, test)` row indices, both sorted.
pub fn stratified_split(y: &[usize], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(y.len());
    let mut test = Vec::new();
    for class in indices_by_class(y, &mut rng) {
        let n = class.len();
        let mut n_test = (n as f64 * test_fraction).round() as usize;
        // Keep at least one training row per class that exists.
        if n > 0 && n_test >= n {
            n_test = n - 1;
        }
        test.extend_from_slice(&class[..n_test]);
        train.extend_from_slice(&class[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// `k` disjoint folds covering every row; class members are dealt round-robin.
pub fn stratified_folds(y: &[usize], k: usize, seed: u64) -> Vec<Vec<usize>> {
    let k = k.max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds = vec![Vec::new(); k];
    let mut next = 0;
    for class in indices_by_class(y, &mut rng) {
        for i in class {
            folds[next % k].push(i);
            next += 1;
        }
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    folds
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: VulnerabilityLabel,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    /// `confusion[truth][predicted]`.
    pub confusion: [[u64; K]; K],
    pub per_class: Vec<ClassMetrics>,
    pub macro_f1: f64,
}

impl ClassificationMetrics {
    pub fn compute(truth: &[usize], predicted: &[usize]) -> Self {
        let mut confusion = [[0u64; K]; K];
        for (&t, &p) in truth.iter().zip(predicted) {
            confusion[t][p] += 1;
        }
        let total: u64 = confusion.iter().flatten().sum();
        let correct: u64 = (0..K).map(|k| confusion[k][k]).sum();

        let per_class: Vec<ClassMetrics> = VulnerabilityLabel::ALL
            .iter()
            .map(|&label| {
                let k = label.index();
                let tp = confusion[k][k] as f64;
                let support: u64 = confusion[k].iter().sum();
                let predicted_k: u64 = (0..K).map(|t| confusion[t][k]).sum();
                let precision = ratio(tp, predicted_k as f64);
                let recall = ratio(tp, support as f64);
                let f1 = ratio(2.0 * precision * recall, precision + recall);
                ClassMetrics {
                    label,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let present: Vec<f64> = per_class.iter().filter(|c| c.support > 0).map(|c| c.f1).collect();
        let macro_f1 = if present.is_empty() {
            0.0
        } else {
            present.iter().sum::<f64>() / present.len() as f64
        };

        Self {
            accuracy: ratio(correct as f64, total as f64),
            confusion,
            per_class,
            macro_f1,
        }
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvScores {
    pub folds: Vec<f64>,
    pub mean: f64,
    pub std: f64,
}

impl CvScores {
    pub fn from_folds(folds: Vec<f64>) -> Self {
        let (mean, std) = mean_std(&folds);
        Self { folds, mean, std }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<usize> {
        // 50 Low, 30 Medium, 15 High, 5 VeryHigh
        [(0, 50), (1, 30), (2, 15), (3, 5)]
            .iter()
            .flat_map(|&(k, n)| std::iter::repeat_n(k, n))
            .collect()
    }

    #[test]
    fn split_is_stratified_disjoint_and_deterministic() {
        let y = labels();
        let (train, test) = stratified_split(&y, 0.2, 42);
        assert_eq!(train.len() + test.len(), y.len());
        assert_eq!(test.len(), 20);
        assert!(train.iter().all(|i| !test.contains(i)));
        let test_high = test.iter().filter(|&&i| y[i] == 2).count();
        assert_eq!(test_high, 3);
        assert_eq!(stratified_split(&y, 0.2, 42), (train, test));
    }

    #[test]
    fn singleton_class_stays_in_training() {
        let y = vec![0, 0, 0, 0, 1];
        let (train, test) = stratified_split(&y, 0.9, 1);
        assert!(train.contains(&4));
        assert!(!test.contains(&4));
    }

    #[test]
    fn folds_partition_all_rows() {
        let y = labels();
        let folds = stratified_folds(&y, 5, 3);
        assert_eq!(folds.len(), 5);
        let mut all: Vec<usize> = folds.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..y.len()).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.len(), 20);
            assert_eq!(fold.iter().filter(|&&i| y[i] == 3).count(), 1);
        }
    }

    #[test]
    fn metrics_from_confusion() {
        let truth = [0, 0, 1, 1, 2, 2, 2, 3];
        let pred = [0, 1, 1, 1, 2, 2, 3, 3];
        let m = ClassificationMetrics::compute(&truth, &pred);
        assert_eq!(m.accuracy, 6.0 / 8.0);
        assert_eq!(m.confusion[0][1], 1);
        assert_eq!(m.confusion[2][3], 1);
        let medium = &m.per_class[1];
        assert!((medium.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(medium.recall, 1.0);
        assert_eq!(medium.support, 2);
        assert!((medium.f1 - 0.8).abs() < 1e-12);
        assert!(m.macro_f1 > 0.0 && m.macro_f1 < 1.0);
    }

    #[test]
    fn cv_scores_summary() {
        let cv = CvScores::from_folds(vec![0.8, 0.9, 1.0]);
        assert!((cv.mean - 0.9).abs() < 1e-12);
        assert!(cv.std > 0.0);
    }
}

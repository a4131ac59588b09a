//! Small numeric helpers shared by the ensembles and reports.

/// Index of the largest value; the lowest index wins ties.
pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// Scale non-negative weights to sum to 1; uniform when they sum to 0.
pub fn normalize(values: &mut [f64]) {
    let sum: f64 = values.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        values.iter_mut().for_each(|v| *v /= sum);
    } else if !values.is_empty() {
        let u = 1.0 / values.len() as f64;
        values.iter_mut().for_each(|v| *v = u);
    }
}

/// Mean and population standard deviation. `(0, 0)` for an empty slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Mean multi-class cross-entropy; probabilities are clamped away from 0.
pub fn log_loss(probabilities: &[Vec<f64>], targets: &[usize]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    let total: f64 = probabilities
        .iter()
        .zip(targets)
        .map(|(p, &k)| -p[k].max(1e-15).ln())
        .sum();
    total / targets.len() as f64
}

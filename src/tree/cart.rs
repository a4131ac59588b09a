//! Binary decision tree stored as a flat node arena.
//!
//! Nodes are appended in pre-order, so a split's children always have larger
//! indices than the split itself and the root is node 0. This makes a loaded
//! tree trivially acyclic to validate.

use nalgebra::DMatrix;
use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use crate::tree::criterion::SplitCriterion;

/// Gains at or below this are treated as "no improvement".
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: Vec<f64>,
    },
    /// `row[feature] <= threshold` goes left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Candidate features drawn per split; `None` means all.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<Node>,
    pub n_features: usize,
    /// Total split gain per feature (unnormalized).
    pub importances: Vec<f64>,
}

impl DecisionTree {
    /// Grow a tree on the rows listed in `samples` (duplicates allowed).
    pub fn fit<C, R>(
        x: &DMatrix<f64>,
        mut samples: Vec<usize>,
        criterion: &C,
        params: &TreeParams,
        rng: &mut R,
    ) -> Self
    where
        C: SplitCriterion,
        R: Rng + ?Sized,
    {
        let mut builder = Builder {
            x,
            criterion,
            params,
            nodes: Vec::new(),
            importances: vec![0.0; x.ncols()],
        };
        builder.grow(&mut samples, 0, rng);
        DecisionTree {
            nodes: builder.nodes,
            n_features: x.ncols(),
            importances: builder.importances,
        }
    }

    /// Leaf value reached by `row`.
    pub fn predict(&self, row: &[f64]) -> &[f64] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }

    /// Structural check for trees read from disk.
    pub fn validate(&self, n_features: usize, leaf_len: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        if self.n_features != n_features || self.importances.len() != n_features {
            return Err(format!(
                "tree expects {} features, bundle has {n_features}",
                self.n_features
            ));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } => {
                    if value.len() != leaf_len || value.iter().any(|v| !v.is_finite()) {
                        return Err(format!("node {i}: malformed leaf"));
                    }
                }
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features || !threshold.is_finite() {
                        return Err(format!("node {i}: bad split on feature {feature}"));
                    }
                    if *left <= i || *right <= i || *left >= self.nodes.len() || *right >= self.nodes.len() {
                        return Err(format!("node {i}: child index out of order"));
                    }
                }
            }
        }
        Ok(())
    }
}

struct Builder<'a, C> {
    x: &'a DMatrix<f64>,
    criterion: &'a C,
    params: &'a TreeParams,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl<C: SplitCriterion> Builder<'_, C> {
    fn stats(&self, samples: &[usize]) -> Vec<f64> {
        let mut stats = vec![0.0; self.criterion.stats_len()];
        for &s in samples {
            self.criterion.accumulate(&mut stats, s);
        }
        stats
    }

    fn grow<R: Rng + ?Sized>(&mut self, samples: &mut [usize], depth: usize, rng: &mut R) -> usize {
        let stats = self.stats(samples);
        let idx = self.nodes.len();

        let min_leaf = self.params.min_samples_leaf.max(1);
        let splittable = depth < self.params.max_depth
            && samples.len() >= 2 * min_leaf
            && !self.criterion.is_pure(&stats);

        let best = if splittable {
            self.best_split(samples, &stats, min_leaf, rng)
        } else {
            None
        };

        let Some(best) = best else {
            self.nodes.push(Node::Leaf {
                value: self.criterion.leaf_value(&stats),
            });
            return idx;
        };

        self.importances[best.feature] += best.gain;
        // Placeholder, patched once both children exist.
        self.nodes.push(Node::Leaf { value: Vec::new() });

        let mid = partition(samples, |s| self.x[(s, best.feature)] <= best.threshold);
        let (left_samples, right_samples) = samples.split_at_mut(mid);
        let left = self.grow(left_samples, depth + 1, rng);
        let right = self.grow(right_samples, depth + 1, rng);

        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split<R: Rng + ?Sized>(
        &self,
        samples: &[usize],
        parent: &[f64],
        min_leaf: usize,
        rng: &mut R,
    ) -> Option<BestSplit> {
        let n_features = self.x.ncols();
        let features: Vec<usize> = match self.params.max_features {
            Some(k) if k < n_features => {
                let mut f = index::sample(rng, n_features, k.max(1)).into_vec();
                f.sort_unstable();
                f
            }
            _ => (0..n_features).collect(),
        };

        let parent_quality = self.criterion.quality(parent);
        let n = samples.len();
        let mut best: Option<BestSplit> = None;
        let mut sorted: Vec<(f64, usize)> = Vec::with_capacity(n);

        for feature in features {
            sorted.clear();
            sorted.extend(samples.iter().map(|&s| (self.x[(s, feature)], s)));
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
            if sorted[0].0 == sorted[n - 1].0 {
                continue;
            }

            let mut left = vec![0.0; parent.len()];
            let mut right = vec![0.0; parent.len()];
            for i in 0..n - 1 {
                self.criterion.accumulate(&mut left, sorted[i].1);
                let n_left = i + 1;
                if n_left < min_leaf {
                    continue;
                }
                if n - n_left < min_leaf {
                    break;
                }
                let (lo, hi) = (sorted[i].0, sorted[i + 1].0);
                if lo == hi {
                    continue;
                }

                for (r, (p, l)) in right.iter_mut().zip(parent.iter().zip(&left)) {
                    *r = p - l;
                }
                let gain = self.criterion.quality(&left) + self.criterion.quality(&right) - parent_quality;
                if gain > MIN_GAIN && best.as_ref().is_none_or(|b| gain > b.gain) {
                    let mid = lo + (hi - lo) / 2.0;
                    best = Some(BestSplit {
                        feature,
                        threshold: if mid < hi { mid } else { lo },
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Reorder so that elements satisfying `pred` come first; returns their count.
fn partition(samples: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..samples.len() {
        if pred(samples[i]) {
            samples.swap(i, mid);
            mid += 1;
        }
    }
    mid
}

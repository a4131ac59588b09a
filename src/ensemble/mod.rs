//! Tree ensembles and their training utilities.
//!
//! - `bagging`: classifier A (bootstrap-aggregated trees, hard vote)
//! - `boosting`: classifier B (softmax gradient boosting, early stopping)
//! - `estimator`: both behind one serializable enum
//! - `dataset` / `validation`: training matrix, splits, metrics

pub mod bagging;
pub mod boosting;
pub mod dataset;
pub mod estimator;
pub mod validation;

pub use bagging::BaggingForest;
pub use boosting::BoostedTrees;
pub use dataset::LabeledDataset;
pub use estimator::Estimator;
pub use validation::{ClassMetrics, ClassificationMetrics, CvScores, stratified_folds, stratified_split};

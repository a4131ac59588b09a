//! Trained classifiers: bundles, training, the shared inference context.

pub mod bundle;
pub mod compare;
pub mod context;
pub mod train;
pub mod tune;

pub use bundle::{BUNDLE_FORMAT_VERSION, RawBundle, TrainedModelBundle, TrainingMetrics};
pub use compare::{ModelComparison, ModelSummary, compare, summarize};
pub use context::ModelContext;
pub use train::{MIN_TRAINING_ROWS, train};
pub use tune::{BaggingGrid, TuningCandidate, TuningResult, tune_bagging};

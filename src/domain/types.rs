//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between pipeline stages without conversion
//! - printed as JSON from the CLI
//! - persisted inside model bundles and batch reports

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::NarrativeFailure;

/// Upper bound accepted for a person's age.
pub const MAX_AGE: u16 = 130;
/// Highest education level on the 0–5 scale (0 = no schooling, 5 = higher education).
pub const MAX_EDUCATION: u8 = 5;
/// Highest employment status (0 = unemployed, 1 = informal, 2 = formal).
pub const MAX_EMPLOYMENT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[value(name = "f", alias = "female")]
    F,
    #[value(name = "m", alias = "male")]
    M,
}

impl Sex {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "f" | "female" | "fem" => Some(Sex::F),
            "m" | "male" | "masc" => Some(Sex::M),
            _ => None,
        }
    }
}

/// Dwelling tenure, coded 1–4 as in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HousingType {
    Owned,
    Rented,
    Ceded,
    Occupied,
}

impl HousingType {
    pub const ALL: [HousingType; 4] = [
        HousingType::Owned,
        HousingType::Rented,
        HousingType::Ceded,
        HousingType::Occupied,
    ];

    pub fn code(self) -> u8 {
        match self {
            HousingType::Owned => 1,
            HousingType::Rented => 2,
            HousingType::Ceded => 3,
            HousingType::Occupied => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.code() == code)
    }
}

/// Identifier partitioning input rows (an IBGE municipality code in practice).
///
/// Construction goes through [`RegionCode::parse`], so a `RegionCode` is never
/// blank or a placeholder such as `0` / `nan`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionCode(String);

impl RegionCode {
    /// Parse a raw region value. Returns `None` for missing/unrecognized codes.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = raw.trim().trim_matches('"').trim();
        if cleaned.is_empty() {
            return None;
        }
        if matches!(
            cleaned.to_ascii_lowercase().as_str(),
            "nan" | "null" | "none" | "na" | "-" | "unknown"
        ) {
            return None;
        }
        // Spreadsheet exports turn integer codes into "3550308.0".
        let cleaned = cleaned.strip_suffix(".0").unwrap_or(cleaned);
        if cleaned.is_empty()
            || !cleaned
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        // "0" and "0000000" are registry placeholders.
        if cleaned.chars().all(|c| c == '0') {
            return None;
        }
        Some(RegionCode(cleaned.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One canonical household snapshot.
///
/// Fields are public and unvalidated on purpose: validation happens in
/// [`crate::features::derive`], which is the single gate every record passes
/// through before reaching a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdRecord {
    pub age: u16,
    pub sex: Sex,
    /// Ordinal 0–5.
    pub education: u8,
    pub family_income: f64,
    /// `None` when the source row did not provide it.
    pub household_size: Option<u32>,
    pub disability: bool,
    /// Ordinal 0–2.
    pub employment: u8,
    pub housing_type: HousingType,
    pub water_access: bool,
    pub sewage_access: bool,
    pub benefit: bool,
    pub region: Option<RegionCode>,
}

/// Ordinal vulnerability tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VulnerabilityLabel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl VulnerabilityLabel {
    pub const COUNT: usize = 4;

    /// Fixed class order used by every probability distribution.
    pub const ALL: [VulnerabilityLabel; 4] = [
        VulnerabilityLabel::Low,
        VulnerabilityLabel::Medium,
        VulnerabilityLabel::High,
        VulnerabilityLabel::VeryHigh,
    ];

    pub fn index(self) -> usize {
        match self {
            VulnerabilityLabel::Low => 0,
            VulnerabilityLabel::Medium => 1,
            VulnerabilityLabel::High => 2,
            VulnerabilityLabel::VeryHigh => 3,
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn display_name(self) -> &'static str {
        match self {
            VulnerabilityLabel::Low => "Low",
            VulnerabilityLabel::Medium => "Medium",
            VulnerabilityLabel::High => "High",
            VulnerabilityLabel::VeryHigh => "VeryHigh",
        }
    }

    /// Accepts display names (any case, `very_high`/`very high` too) or a class index.
    pub fn parse(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match norm.as_str() {
            "low" | "0" => Some(VulnerabilityLabel::Low),
            "medium" | "1" => Some(VulnerabilityLabel::Medium),
            "high" | "2" => Some(VulnerabilityLabel::High),
            "veryhigh" | "3" => Some(VulnerabilityLabel::VeryHigh),
            _ => None,
        }
    }
}

impl fmt::Display for VulnerabilityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Per-label counters in the fixed class order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounts(pub [u64; VulnerabilityLabel::COUNT]);

impl LabelCounts {
    pub fn add(&mut self, label: VulnerabilityLabel) {
        self.0[label.index()] += 1;
    }

    pub fn get(&self, label: VulnerabilityLabel) -> u64 {
        self.0[label.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Share of each label in percent; all zeros when empty.
    pub fn percentages(&self) -> [f64; VulnerabilityLabel::COUNT] {
        let total = self.total();
        let mut out = [0.0; VulnerabilityLabel::COUNT];
        if total == 0 {
            return out;
        }
        for (slot, &count) in out.iter_mut().zip(self.0.iter()) {
            *slot = 100.0 * count as f64 / total as f64;
        }
        out
    }
}

/// Which ensemble produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Classifier A.
    Bagging,
    /// Classifier B.
    Boosting,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Bagging, ModelKind::Boosting];

    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Bagging => "Bagging (random forest)",
            ModelKind::Boosting => "Boosting (gradient-boosted trees)",
        }
    }

    /// File stem used when bundles are written to a model directory.
    pub fn file_stem(self) -> &'static str {
        match self {
            ModelKind::Bagging => "bagging",
            ModelKind::Boosting => "boosting",
        }
    }
}

/// One classifier's output for one household.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierPrediction {
    pub model: ModelKind,
    pub label: VulnerabilityLabel,
    /// Probabilities in [`VulnerabilityLabel::ALL`] order.
    pub probabilities: [f64; VulnerabilityLabel::COUNT],
}

impl ClassifierPrediction {
    pub fn probability(&self, label: VulnerabilityLabel) -> f64 {
        self.probabilities[label.index()]
    }

    /// Probability assigned to the predicted label.
    pub fn confidence(&self) -> f64 {
        self.probability(self.label)
    }
}

/// Whether and how a narrative was obtained for a combined result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum NarrativeStatus {
    NotRequested,
    Generated,
    Unavailable(NarrativeFailure),
}

/// When the combiner asks the narrative collaborator for text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NarrativePolicy {
    Never,
    /// Only when the two classifiers disagree.
    Divergent,
    Always,
}

/// Merged output of both classifiers for one household.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedResult {
    pub prediction_a: ClassifierPrediction,
    pub prediction_b: ClassifierPrediction,
    /// `prediction_a.label != prediction_b.label`.
    pub divergent: bool,
    /// Divergent results need a qualitative look from an analyst.
    pub review_required: bool,
    pub narrative: Option<String>,
    pub narrative_status: NarrativeStatus,
    pub record: HouseholdRecord,
}

/// Bagging hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaggingParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Consider `sqrt(n_features)` candidate features per split instead of all.
    pub sqrt_features: bool,
    pub seed: u64,
}

impl Default for BaggingParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 16,
            min_samples_leaf: 1,
            sqrt_features: true,
            seed: 42,
        }
    }
}

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub max_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Stop after this many rounds without validation-loss improvement.
    pub early_stopping_rounds: usize,
    /// Share of the training rows held back to drive early stopping.
    pub validation_fraction: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            max_rounds: 100,
            learning_rate: 0.1,
            max_depth: 6,
            min_samples_leaf: 1,
            early_stopping_rounds: 10,
            validation_fraction: 0.1,
            seed: 42,
        }
    }
}

/// Offline training configuration shared by both ensembles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub holdout_fraction: f64,
    pub cv_folds: usize,
    pub cross_validate: bool,
    pub seed: u64,
    pub bagging: BaggingParams,
    pub boosting: BoostingParams,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            holdout_fraction: 0.2,
            cv_folds: 5,
            cross_validate: true,
            seed: 42,
            bagging: BaggingParams::default(),
            boosting: BoostingParams::default(),
        }
    }
}

/// A data row that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based line in the source file (header is line 1).
    pub line: u64,
    pub message: String,
}

/// Batch classification + aggregation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Stop after this many data rows (valid or not).
    pub max_rows: Option<u64>,
    /// Rows classified in parallel before being folded into the aggregates.
    pub chunk_size: usize,
    pub narrative_policy: NarrativePolicy,
    /// How many row errors to keep verbatim for diagnostics (all are counted).
    pub max_row_errors_kept: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rows: None,
            chunk_size: 1024,
            narrative_policy: NarrativePolicy::Never,
            max_row_errors_kept: 20,
        }
    }
}

//! Synthetic registry-like household generation.
//!
//! Used for demos, calibration and training when no source file is at hand.
//! Distributions are skewed the way social-registry populations are: low
//! schooling, mostly informal or no work, a quarter of families without income,
//! patchy water/sewage coverage.

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Exp;

use crate::domain::{HouseholdRecord, HousingType, RegionCode, Sex};
use crate::error::VulnError;

const EDUCATION_WEIGHTS: [f64; 6] = [0.20, 0.25, 0.20, 0.15, 0.12, 0.08];
const EMPLOYMENT_WEIGHTS: [f64; 3] = [0.40, 0.40, 0.20];
/// Household sizes 1..=8.
const SIZE_WEIGHTS: [f64; 8] = [0.12, 0.18, 0.20, 0.18, 0.12, 0.10, 0.06, 0.04];
const MAX_SAMPLE_AGE: u16 = 80;
const ZERO_INCOME_PROB: f64 = 0.25;
const MEAN_FAMILY_INCOME: f64 = 400.0;
const DISABILITY_PROB: f64 = 0.15;
const WATER_PROB: f64 = 0.65;
const SEWAGE_PROB: f64 = 0.50;
const BENEFIT_PROB: f64 = 0.60;

/// Default municipalities sampled into `region` (IBGE codes).
pub const DEFAULT_REGIONS: [&str; 6] = [
    "3550308", // São Paulo
    "3304557", // Rio de Janeiro
    "2927408", // Salvador
    "2611606", // Recife
    "3205309", // Vitória
    "3205200", // Vila Velha
];

#[derive(Debug, Clone, PartialEq)]
pub struct SampleConfig {
    pub count: usize,
    pub seed: u64,
    pub regions: Vec<String>,
    /// Probability that a row carries no region code.
    pub missing_region_prob: f64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            count: 1000,
            seed: 42,
            regions: DEFAULT_REGIONS.iter().map(|s| s.to_string()).collect(),
            missing_region_prob: 0.02,
        }
    }
}

/// Generate `config.count` households deterministically from `config.seed`.
pub fn generate_households(config: &SampleConfig) -> Result<Vec<HouseholdRecord>, VulnError> {
    if !(0.0..=1.0).contains(&config.missing_region_prob) {
        return Err(VulnError::validation(
            "missing_region_prob",
            format!("must be in [0, 1], got {}", config.missing_region_prob),
        ));
    }

    let regions: Vec<RegionCode> = config
        .regions
        .iter()
        .filter_map(|r| RegionCode::parse(r))
        .collect();

    let education = weighted(&EDUCATION_WEIGHTS)?;
    let employment = weighted(&EMPLOYMENT_WEIGHTS)?;
    let size = weighted(&SIZE_WEIGHTS)?;
    let income = Exp::new(1.0 / MEAN_FAMILY_INCOME)
        .map_err(|e| VulnError::InsufficientData(format!("income distribution error: {e}")))?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut out = Vec::with_capacity(config.count);

    for _ in 0..config.count {
        let age = rng.gen_range(0..=MAX_SAMPLE_AGE);
        let sex = if rng.gen_bool(0.5) { Sex::F } else { Sex::M };
        let education = education.sample(&mut rng) as u8;
        let employment = employment.sample(&mut rng) as u8;
        let household_size = size.sample(&mut rng) as u32 + 1;
        let family_income = if rng.gen_bool(ZERO_INCOME_PROB) {
            0.0
        } else {
            income.sample(&mut rng)
        };
        let housing_type = HousingType::ALL[rng.gen_range(0..HousingType::ALL.len())];

        let region = if regions.is_empty() || rng.gen_bool(config.missing_region_prob) {
            None
        } else {
            regions.choose(&mut rng).cloned()
        };

        out.push(HouseholdRecord {
            age,
            sex,
            education,
            family_income,
            household_size: Some(household_size),
            disability: rng.gen_bool(DISABILITY_PROB),
            employment,
            housing_type,
            water_access: rng.gen_bool(WATER_PROB),
            sewage_access: rng.gen_bool(SEWAGE_PROB),
            benefit: rng.gen_bool(BENEFIT_PROB),
            region,
        });
    }

    Ok(out)
}

fn weighted(weights: &[f64]) -> Result<WeightedIndex<f64>, VulnError> {
    WeightedIndex::new(weights)
        .map_err(|e| VulnError::InsufficientData(format!("invalid sampling weights: {e}")))
}

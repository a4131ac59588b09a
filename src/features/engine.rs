//! Household record → feature vector.
//!
//! `derive` is the single validation gate for raw records: anything that reaches
//! a classifier has gone through it. The function is pure, so deriving the same
//! record twice yields bit-identical vectors.

use serde::{Deserialize, Serialize};

use crate::domain::{HouseholdRecord, MAX_AGE, MAX_EDUCATION, MAX_EMPLOYMENT};
use crate::error::VulnError;

/// Version tag of the ordered model-input list below. Bump whenever the list changes.
pub const FEATURE_SCHEMA_VERSION: &str = "household-v1";

/// Ordered model inputs. Bundles persist this list and classifiers compare
/// incoming rows against it before predicting.
pub const FEATURE_NAMES: [&str; 15] = [
    "age",
    "education",
    "income_per_capita",
    "household_size",
    "disability",
    "employment",
    "housing_type",
    "water_access",
    "sewage_access",
    "age_vulnerability",
    "infra_adequate",
    "low_education",
    "precarious_employment",
    "overcrowding",
    "benefit_flag",
];

/// Derived indicators, in their canonical order.
pub const DERIVED_FEATURES: [&str; 7] = [
    "income_per_capita",
    "age_vulnerability",
    "infra_adequate",
    "low_education",
    "precarious_employment",
    "overcrowding",
    "benefit_flag",
];

/// Age bounds outside which a person counts as age-vulnerable.
const MIN_ADULT_AGE: u16 = 18;
const MAX_WORKING_AGE: u16 = 65;
/// Education levels at or below this count as low education.
const LOW_EDUCATION_MAX: u8 = 2;
/// Employment codes at or below this (unemployed, informal) are precarious.
const PRECARIOUS_EMPLOYMENT_MAX: u8 = 1;
/// Households larger than this are overcrowded.
const OVERCROWDING_SIZE: u32 = 5;

/// Derived features plus the raw fields passed through as model inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub income_per_capita: f64,
    pub age_vulnerability: u8,
    pub infra_adequate: u8,
    pub low_education: u8,
    pub precarious_employment: u8,
    pub overcrowding: u8,
    pub benefit_flag: u8,

    pub age: u16,
    pub education: u8,
    pub household_size: u32,
    pub disability: u8,
    pub employment: u8,
    pub housing_type: u8,
    pub water_access: u8,
    pub sewage_access: u8,
}

impl FeatureVector {
    /// Model inputs in [`FEATURE_NAMES`] order.
    pub fn values(&self) -> [f64; FEATURE_NAMES.len()] {
        [
            f64::from(self.age),
            f64::from(self.education),
            self.income_per_capita,
            f64::from(self.household_size),
            f64::from(self.disability),
            f64::from(self.employment),
            f64::from(self.housing_type),
            f64::from(self.water_access),
            f64::from(self.sewage_access),
            f64::from(self.age_vulnerability),
            f64::from(self.infra_adequate),
            f64::from(self.low_education),
            f64::from(self.precarious_employment),
            f64::from(self.overcrowding),
            f64::from(self.benefit_flag),
        ]
    }

    /// The seven derived indicators in [`DERIVED_FEATURES`] order.
    pub fn derived(&self) -> [f64; DERIVED_FEATURES.len()] {
        [
            self.income_per_capita,
            f64::from(self.age_vulnerability),
            f64::from(self.infra_adequate),
            f64::from(self.low_education),
            f64::from(self.precarious_employment),
            f64::from(self.overcrowding),
            f64::from(self.benefit_flag),
        ]
    }

    pub fn to_row(&self) -> FeatureRow<'static> {
        FeatureRow {
            names: FEATURE_NAMES.to_vec(),
            values: self.values().to_vec(),
        }
    }
}

/// A named, ordered model input as handed to a classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow<'a> {
    pub names: Vec<&'a str>,
    pub values: Vec<f64>,
}

/// Validate a record and compute its feature vector.
pub fn derive(record: &HouseholdRecord) -> Result<FeatureVector, VulnError> {
    let household_size = validate(record)?;
    let income_per_capita = record.family_income / f64::from(household_size);

    Ok(FeatureVector {
        income_per_capita,
        age_vulnerability: flag(record.age < MIN_ADULT_AGE || record.age > MAX_WORKING_AGE),
        infra_adequate: flag(record.water_access && record.sewage_access),
        low_education: flag(record.education <= LOW_EDUCATION_MAX),
        precarious_employment: flag(record.employment <= PRECARIOUS_EMPLOYMENT_MAX),
        overcrowding: flag(household_size > OVERCROWDING_SIZE),
        benefit_flag: flag(record.benefit),

        age: record.age,
        education: record.education,
        household_size,
        disability: flag(record.disability),
        employment: record.employment,
        housing_type: record.housing_type.code(),
        water_access: flag(record.water_access),
        sewage_access: flag(record.sewage_access),
    })
}

/// `family_income / household_size`, with the same validation as [`derive`].
pub fn income_per_capita(record: &HouseholdRecord) -> Result<f64, VulnError> {
    let size = validate(record)?;
    Ok(record.family_income / f64::from(size))
}

/// Check the record invariants and return the (present, positive) household size.
pub fn validate(record: &HouseholdRecord) -> Result<u32, VulnError> {
    let size = record
        .household_size
        .ok_or_else(|| VulnError::validation("household_size", "not provided"))?;
    if size < 1 {
        return Err(VulnError::validation(
            "household_size",
            format!("must be >= 1, got {size}"),
        ));
    }
    if record.age > MAX_AGE {
        return Err(VulnError::validation(
            "age",
            format!("must be in [0, {MAX_AGE}], got {}", record.age),
        ));
    }
    if !record.family_income.is_finite() || record.family_income < 0.0 {
        return Err(VulnError::validation(
            "family_income",
            format!("must be a finite value >= 0, got {}", record.family_income),
        ));
    }
    if record.education > MAX_EDUCATION {
        return Err(VulnError::validation(
            "education",
            format!("must be in [0, {MAX_EDUCATION}], got {}", record.education),
        ));
    }
    if record.employment > MAX_EMPLOYMENT {
        return Err(VulnError::validation(
            "employment",
            format!("must be in [0, {MAX_EMPLOYMENT}], got {}", record.employment),
        ));
    }
    Ok(size)
}

fn flag(b: bool) -> u8 {
    u8::from(b)
}

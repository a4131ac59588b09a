//! Error types.
//!
//! Two layers:
//!
//! - [`VulnError`] is what the library returns. Each variant is one failure kind
//!   callers are expected to tell apart (bad input vs. wrong feature shape vs.
//!   missing model, ...).
//! - [`AppError`] is the binary's view: a message plus a process exit code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ModelKind;

/// Why the narrative collaborator could not produce text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeFailure {
    #[error("narrative service timed out")]
    Timeout,
    #[error("narrative service quota exhausted")]
    Quota,
    #[error("narrative service not configured")]
    NotConfigured,
    #[error("narrative service unavailable: {0}")]
    Unavailable(String),
}

/// Library error type.
#[derive(Debug, Error)]
pub enum VulnError {
    /// A raw household field is missing or outside its legal range.
    #[error("validation error: {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// The feature row handed to a classifier does not match its ordered feature list.
    #[error("feature shape mismatch: expected [{}], got [{}]", .expected.join(", "), .actual.join(", "))]
    ShapeMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    /// Inference was requested from a classifier whose parameters are not loaded.
    #[error("{} model is not loaded", .0.display_name())]
    ModelUnavailable(ModelKind),

    /// A persisted model bundle is incomplete or inconsistent.
    #[error("invalid model bundle: {0}")]
    InvalidBundle(String),

    #[error(transparent)]
    NarrativeUnavailable(#[from] NarrativeFailure),

    /// Not enough (or not varied enough) data to train or calibrate.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VulnError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Exit code used when this error reaches the binary.
    ///
    /// - 2: bad input, configuration, or file
    /// - 3: insufficient data or models missing
    /// - 4: internal / external-service failure
    pub fn exit_code(&self) -> u8 {
        match self {
            VulnError::Validation { .. }
            | VulnError::InvalidBundle(_)
            | VulnError::Io(_)
            | VulnError::Csv(_)
            | VulnError::Json(_) => 2,
            VulnError::ModelUnavailable(_) | VulnError::InsufficientData(_) => 3,
            VulnError::ShapeMismatch { .. } | VulnError::NarrativeUnavailable(_) => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<VulnError> for AppError {
    fn from(err: VulnError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

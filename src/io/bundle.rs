//! Read/write model bundle JSON files.
//!
//! One file per classifier inside a model directory: `bagging.json` and
//! `boosting.json`. Reading always validates; a bundle that loads is usable.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::domain::ModelKind;
use crate::error::VulnError;
use crate::models::bundle::TrainedModelBundle;

pub fn bundle_path(dir: &Path, kind: ModelKind) -> PathBuf {
    dir.join(format!("{}.json", kind.file_stem()))
}

/// Write a bundle, creating parent directories as needed.
pub fn write_bundle(path: &Path, bundle: &TrainedModelBundle) -> Result<(), VulnError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path).map_err(|e| {
        VulnError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create bundle '{}': {e}", path.display()),
        ))
    })?;
    serde_json::to_writer_pretty(file, bundle)?;
    Ok(())
}

pub fn read_bundle(path: &Path) -> Result<TrainedModelBundle, VulnError> {
    let file = File::open(path).map_err(|e| {
        VulnError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open bundle '{}': {e}", path.display()),
        ))
    })?;
    TrainedModelBundle::from_reader(BufReader::new(file))
        .map_err(|e| VulnError::InvalidBundle(format!("{}: {e}", path.display())))
}

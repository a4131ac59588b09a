//! Loaded classifiers, shared read-only by every inference call.
//!
//! A `ModelContext` is built once (usually from a model directory) and then
//! passed around by reference. Nothing in it is mutable after construction,
//! so concurrent batch workers need no locking.

use std::path::Path;

use tracing::{info, warn};

use crate::combine::MetaCombiner;
use crate::domain::{ClassifierPrediction, CombinedResult, HouseholdRecord, ModelKind};
use crate::error::VulnError;
use crate::features::{FeatureVector, derive};
use crate::io::bundle::{bundle_path, read_bundle};
use crate::models::bundle::TrainedModelBundle;

#[derive(Debug, Clone, Default)]
pub struct ModelContext {
    bagging: Option<TrainedModelBundle>,
    boosting: Option<TrainedModelBundle>,
}

impl ModelContext {
    /// Each bundle must match the slot it is placed in.
    pub fn new(
        bagging: Option<TrainedModelBundle>,
        boosting: Option<TrainedModelBundle>,
    ) -> Result<Self, VulnError> {
        for (slot, bundle) in [(ModelKind::Bagging, &bagging), (ModelKind::Boosting, &boosting)] {
            if let Some(b) = bundle {
                if b.model_kind != slot {
                    return Err(VulnError::InvalidBundle(format!(
                        "{:?} bundle placed in the {:?} slot",
                        b.model_kind, slot
                    )));
                }
            }
        }
        Ok(Self { bagging, boosting })
    }

    /// Load `bagging.json` / `boosting.json` from `dir`. A missing file leaves
    /// its slot empty; a present but invalid file is an error.
    pub fn load_dir(dir: &Path) -> Result<Self, VulnError> {
        let mut slots = [None, None];
        for (slot, kind) in slots.iter_mut().zip(ModelKind::ALL) {
            let path = bundle_path(dir, kind);
            if path.exists() {
                let bundle = read_bundle(&path)?;
                info!(model = kind.file_stem(), path = %path.display(), "model loaded");
                *slot = Some(bundle);
            } else {
                warn!(model = kind.file_stem(), path = %path.display(), "model file not found");
            }
        }
        let [bagging, boosting] = slots;
        Self::new(bagging, boosting)
    }

    pub fn get(&self, kind: ModelKind) -> Result<&TrainedModelBundle, VulnError> {
        let slot = match kind {
            ModelKind::Bagging => &self.bagging,
            ModelKind::Boosting => &self.boosting,
        };
        slot.as_ref().ok_or(VulnError::ModelUnavailable(kind))
    }

    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        self.get(kind).is_ok()
    }

    pub fn predict(&self, kind: ModelKind, vector: &FeatureVector) -> Result<ClassifierPrediction, VulnError> {
        self.get(kind)?.predict(vector)
    }

    /// Run both classifiers on the same vector, in parallel.
    pub fn predict_both(
        &self,
        vector: &FeatureVector,
    ) -> Result<(ClassifierPrediction, ClassifierPrediction), VulnError> {
        let a = self.get(ModelKind::Bagging)?;
        let b = self.get(ModelKind::Boosting)?;
        let (pa, pb) = rayon::join(|| a.predict(vector), || b.predict(vector));
        Ok((pa?, pb?))
    }

    /// Full per-household path: derive, classify with both models, combine.
    pub fn classify(
        &self,
        record: &HouseholdRecord,
        combiner: &MetaCombiner,
    ) -> Result<CombinedResult, VulnError> {
        let vector = derive(record)?;
        let (a, b) = self.predict_both(&vector)?;
        Ok(combiner.combine(a, b, record))
    }
}

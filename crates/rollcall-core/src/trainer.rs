//! Model retraining: refit the k-NN model from every stored sample and swap
//! it into the shared [`ModelSlot`], persisting the artifact alongside.

use crate::classifier::{KnnModel, ModelSlot};
use crate::samples::{SampleError, SampleStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub const DEFAULT_NEIGHBORS: usize = 5;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("no face samples stored for any identity")]
    NoSamples,
    #[error(transparent)]
    Samples(#[from] SampleError),
    #[error("model artifact {path}: {reason}")]
    Artifact { path: PathBuf, reason: String },
}

/// Summary of a successful retrain.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub identities: usize,
    pub samples: usize,
}

pub struct ModelTrainer {
    samples: SampleStore,
    slot: Arc<ModelSlot>,
    artifact: PathBuf,
    neighbors: usize,
    // Serializes retrains; readers of `slot` are never blocked by a refit.
    refit: Mutex<()>,
}

impl ModelTrainer {
    pub fn new(
        samples: SampleStore,
        slot: Arc<ModelSlot>,
        artifact: impl Into<PathBuf>,
        neighbors: usize,
    ) -> Self {
        Self {
            samples,
            slot,
            artifact: artifact.into(),
            neighbors,
            refit: Mutex::new(()),
        }
    }

    /// Load a previously persisted model into the slot.
    ///
    /// A missing artifact is the valid untrained state and returns `Ok(false)`.
    pub fn load_artifact(&self) -> Result<bool, TrainError> {
        let bytes = match std::fs::read(&self.artifact) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %self.artifact.display(),
                    "no model artifact; classifier untrained"
                );
                return Ok(false);
            }
            Err(e) => return Err(self.artifact_error(e)),
        };
        let model: KnnModel = serde_json::from_slice(&bytes).map_err(|e| self.artifact_error(e))?;
        model.validate().map_err(|e| self.artifact_error(e))?;
        tracing::info!(
            path = %self.artifact.display(),
            samples = model.sample_count(),
            "model artifact loaded"
        );
        self.slot.replace(Some(model));
        Ok(true)
    }

    /// Refit from all stored samples and atomically replace the current model.
    ///
    /// With zero samples this fails with `NoSamples` and leaves the current
    /// model untouched.
    pub fn retrain(&self) -> Result<TrainReport, TrainError> {
        let _refit = self.refit.lock().unwrap_or_else(PoisonError::into_inner);

        let samples = self.samples.load_all()?;
        let model = KnnModel::fit(samples, self.neighbors).ok_or(TrainError::NoSamples)?;
        let report = TrainReport {
            identities: model.identities().len(),
            samples: model.sample_count(),
        };

        self.persist(&model)?;
        self.slot.replace(Some(model));

        tracing::info!(identities = report.identities, samples = report.samples, "model retrained");
        Ok(report)
    }

    /// Drop the current model and its artifact.
    pub fn mark_untrained(&self) -> Result<(), TrainError> {
        let _refit = self.refit.lock().unwrap_or_else(PoisonError::into_inner);
        match std::fs::remove_file(&self.artifact) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.artifact_error(e)),
        }
        self.slot.replace(None);
        tracing::info!("classifier marked untrained");
        Ok(())
    }

    pub fn samples(&self) -> &SampleStore {
        &self.samples
    }

    pub fn slot(&self) -> &Arc<ModelSlot> {
        &self.slot
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    /// Write the artifact to a temp file then rename it over the old one.
    fn persist(&self, model: &KnnModel) -> Result<(), TrainError> {
        if let Some(parent) = self.artifact.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.artifact_error(e))?;
        }
        let tmp = self.artifact.with_extension("tmp");
        let bytes = serde_json::to_vec(model).map_err(|e| self.artifact_error(e))?;
        std::fs::write(&tmp, bytes).map_err(|e| self.artifact_error(e))?;
        std::fs::rename(&tmp, &self.artifact).map_err(|e| self.artifact_error(e))?;
        Ok(())
    }

    fn artifact_error(&self, e: impl std::fmt::Display) -> TrainError {
        TrainError::Artifact {
            path: self.artifact.clone(),
            reason: e.to_string(),
        }
    }
}

//! Face classifier: a k-nearest-neighbours model over normalized face pixels,
//! held in a [`ModelSlot`] that is swapped atomically on retrain.

use crate::face::{FaceCrop, FACE_SIZE};
use crate::types::Identity;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("no trained model; enroll at least one identity first")]
    ModelUnavailable,
    #[error("face crop has {actual} pixels, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Maps a normalized face to an enrolled identity.
pub trait Classifier {
    /// Whether a model is loaded. Sessions check this before opening a device.
    fn is_ready(&self) -> bool;

    fn classify(&self, face: &FaceCrop) -> Result<Identity, ClassifierError>;
}

/// One labeled training sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledSample {
    pub identity: Identity,
    pub pixels: Vec<u8>,
}

/// A fitted k-NN model. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnModel {
    pub neighbors: usize,
    pub dimension: usize,
    samples: Vec<LabeledSample>,
}

impl KnnModel {
    /// Fit a model. Returns `None` if there are no samples.
    pub fn fit(samples: Vec<LabeledSample>, neighbors: usize) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        Some(Self {
            neighbors: neighbors.max(1),
            dimension: (FACE_SIZE * FACE_SIZE) as usize,
            samples,
        })
    }

    /// Check a deserialized model: every sample must be a full-size face.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let expected = (FACE_SIZE * FACE_SIZE) as usize;
        if self.dimension != expected {
            return Err(ClassifierError::DimensionMismatch {
                expected,
                actual: self.dimension,
            });
        }
        if self.samples.is_empty() {
            return Err(ClassifierError::ModelUnavailable);
        }
        match self.samples.iter().find(|s| s.pixels.len() != expected) {
            Some(bad) => Err(ClassifierError::DimensionMismatch {
                expected,
                actual: bad.pixels.len(),
            }),
            None => Ok(()),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Distinct identities the model can predict, ordered by roll id.
    pub fn identities(&self) -> Vec<Identity> {
        let mut ids: Vec<Identity> = Vec::new();
        for s in &self.samples {
            if !ids.contains(&s.identity) {
                ids.push(s.identity.clone());
            }
        }
        ids.sort_by_key(|id| id.roll_id);
        ids
    }

    /// Majority vote among the `k` nearest samples by Euclidean distance.
    ///
    /// Ties go to the tied identity whose closest member is nearest.
    pub fn predict(&self, pixels: &[u8]) -> Result<Identity, ClassifierError> {
        if pixels.len() != self.dimension {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.dimension,
                actual: pixels.len(),
            });
        }

        let mut ranked: Vec<(u64, &Identity)> = self
            .samples
            .iter()
            .map(|s| (squared_distance(pixels, &s.pixels), &s.identity))
            .collect();
        ranked.sort_by_key(|(d, _)| *d);
        ranked.truncate(self.neighbors.min(ranked.len()));

        // (identity, votes) in order of first (nearest) appearance
        let mut votes: Vec<(&Identity, usize)> = Vec::new();
        for (_, id) in &ranked {
            match votes.iter_mut().find(|(v, _)| v.roll_id == id.roll_id) {
                Some((_, n)) => *n += 1,
                None => votes.push((id, 1)),
            }
        }

        let mut best: Option<(&Identity, usize)> = None;
        for (id, n) in votes {
            if best.map_or(true, |(_, b)| n > b) {
                best = Some((id, n));
            }
        }
        best.map(|(id, _)| id.clone())
            .ok_or(ClassifierError::ModelUnavailable)
    }
}

fn squared_distance(a: &[u8], b: &[u8]) -> u64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = x as i64 - y as i64;
            (d * d) as u64
        })
        .sum()
}

/// The process-wide current model. Readers take a cheap `Arc` snapshot, so a
/// retrain never exposes a half-built model; the swap itself is a single
/// pointer replacement under the write lock.
#[derive(Debug, Default)]
pub struct ModelSlot {
    current: RwLock<Option<Arc<KnnModel>>>,
}

impl ModelSlot {
    pub fn new(model: Option<KnnModel>) -> Self {
        Self {
            current: RwLock::new(model.map(Arc::new)),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<KnnModel>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current model, returning the previous one.
    pub fn replace(&self, model: Option<KnnModel>) -> Option<Arc<KnnModel>> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, model.map(Arc::new))
    }
}

impl Classifier for ModelSlot {
    fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    fn classify(&self, face: &FaceCrop) -> Result<Identity, ClassifierError> {
        let model = self.snapshot().ok_or(ClassifierError::ModelUnavailable)?;
        model.predict(face.pixels())
    }
}

impl<C: Classifier + ?Sized> Classifier for Arc<C> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn classify(&self, face: &FaceCrop) -> Result<Identity, ClassifierError> {
        (**self).classify(face)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    const DIM: usize = (FACE_SIZE * FACE_SIZE) as usize;

    fn sample(name: &str, roll: u32, value: u8) -> LabeledSample {
        LabeledSample {
            identity: Identity::new(name, roll),
            pixels: vec![value; DIM],
        }
    }

    fn face(value: u8) -> FaceCrop {
        FaceCrop::normalize(GrayImage::from_pixel(FACE_SIZE, FACE_SIZE, Luma([value])))
    }

    #[test]
    fn test_fit_empty_is_none() {
        assert!(KnnModel::fit(vec![], 5).is_none());
    }

    #[test]
    fn test_predict_majority_vote() {
        let model = KnnModel::fit(
            vec![
                sample("ada", 1, 10),
                sample("ada", 1, 12),
                sample("ada", 1, 14),
                sample("bob", 2, 200),
                sample("bob", 2, 210),
            ],
            3,
        )
        .unwrap();
        assert_eq!(model.predict(&vec![11; DIM]).unwrap().roll_id, 1);
        assert_eq!(model.predict(&vec![205; DIM]).unwrap().roll_id, 2);
    }

    #[test]
    fn test_predict_k_capped_at_sample_count() {
        // k = 5 with only 2 samples: 1 vote each, nearest wins the tie.
        let model = KnnModel::fit(vec![sample("ada", 1, 10), sample("bob", 2, 200)], 5).unwrap();
        assert_eq!(model.predict(&vec![190; DIM]).unwrap().roll_id, 2);
        assert_eq!(model.predict(&vec![20; DIM]).unwrap().roll_id, 1);
    }

    #[test]
    fn test_predict_dimension_mismatch() {
        let model = KnnModel::fit(vec![sample("ada", 1, 10)], 5).unwrap();
        assert!(matches!(
            model.predict(&[1, 2, 3]),
            Err(ClassifierError::DimensionMismatch { expected: DIM, actual: 3 })
        ));
    }

    #[test]
    fn test_validate_rejects_short_sample() {
        let mut short = sample("bob", 2, 200);
        short.pixels.truncate(10);
        let model = KnnModel::fit(vec![sample("ada", 1, 10), short], 5).unwrap();
        assert!(matches!(
            model.validate(),
            Err(ClassifierError::DimensionMismatch { expected: DIM, actual: 10 })
        ));
        assert!(KnnModel::fit(vec![sample("ada", 1, 10)], 5).unwrap().validate().is_ok());
    }

    #[test]
    fn test_identities_are_distinct_and_ordered() {
        let model = KnnModel::fit(
            vec![sample("bob", 2, 1), sample("ada", 1, 2), sample("bob", 2, 3)],
            5,
        )
        .unwrap();
        let rolls: Vec<u32> = model.identities().iter().map(|i| i.roll_id).collect();
        assert_eq!(rolls, vec![1, 2]);
    }

    #[test]
    fn test_empty_slot_is_model_unavailable() {
        let slot = ModelSlot::default();
        assert!(!slot.is_ready());
        assert!(matches!(slot.classify(&face(0)), Err(ClassifierError::ModelUnavailable)));
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let slot = ModelSlot::new(KnnModel::fit(vec![sample("ada", 1, 10)], 5));
        let before = slot.snapshot().unwrap();
        slot.replace(KnnModel::fit(vec![sample("bob", 2, 10)], 5));

        // A reader holding the old snapshot keeps a complete model.
        assert_eq!(before.predict(&vec![10; DIM]).unwrap().roll_id, 1);
        assert_eq!(slot.classify(&face(10)).unwrap().roll_id, 2);
    }
}

//! Enrollment session: collect a quota of face samples for a new identity,
//! then retrain the model so the identity is recognisable immediately.

use super::{CancelToken, OverlayHint, SessionError, SessionEvent, SessionObserver};
use crate::face::FaceCrop;
use crate::locator::FaceLocator;
use crate::trainer::{ModelTrainer, TrainReport};
use crate::types::Identity;
use rollcall_hw::{CameraError, CaptureDevice, FrameSource};
use serde::Serialize;

pub const DEFAULT_QUOTA: usize = 10;
pub const DEFAULT_SAMPLE_EVERY: usize = 5;
pub const DEFAULT_ENROLL_MAX_FRAMES: usize = 1500;

#[derive(Debug, Clone, Copy)]
pub struct EnrollmentConfig {
    /// Samples to collect.
    pub quota: usize,
    /// Keep every Nth frame that contains a face.
    pub sample_every: usize,
    /// Frame budget; an empty scene cannot hold the device forever.
    pub max_frames: usize,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            sample_every: DEFAULT_SAMPLE_EVERY,
            max_frames: DEFAULT_ENROLL_MAX_FRAMES,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentReport {
    pub identity: Identity,
    pub samples: usize,
    pub frames: usize,
    pub training: TrainReport,
}

pub struct EnrollmentSession<'a, D, L> {
    device: &'a D,
    locator: &'a mut L,
    trainer: &'a ModelTrainer,
    config: EnrollmentConfig,
}

impl<'a, D, L> EnrollmentSession<'a, D, L>
where
    D: CaptureDevice,
    L: FaceLocator,
{
    pub fn new(
        device: &'a D,
        locator: &'a mut L,
        trainer: &'a ModelTrainer,
        config: EnrollmentConfig,
    ) -> Self {
        Self {
            device,
            locator,
            trainer,
            config,
        }
    }

    /// Enroll `identity`. Partial samples are left on disk when the quota is
    /// not met; the caller decides whether to discard them.
    pub fn run(
        self,
        identity: &Identity,
        cancel: &CancelToken,
        observer: &mut dyn SessionObserver,
    ) -> Result<EnrollmentReport, SessionError> {
        identity.validate()?;
        let store = self.trainer.samples();
        if store.find(identity.roll_id)?.is_some() {
            return Err(SessionError::DuplicateIdentity(identity.roll_id));
        }

        let mut source = self.device.open().map_err(SessionError::from_open)?;
        store.create(identity)?;
        tracing::info!(
            device = self.device.name(),
            roll = identity.roll_id,
            name = %identity.display_name,
            quota = self.config.quota,
            "enrollment session started"
        );

        let trainer = self.trainer;
        let quota = self.config.quota;
        let collected = self.collect(&mut source, identity, cancel, observer);
        drop(source);
        let (captured, frames) = collected?;

        if captured < quota {
            tracing::warn!(roll = identity.roll_id, captured, quota, "enrollment incomplete");
            return Err(SessionError::InsufficientSamples { captured, quota });
        }

        let training = trainer.retrain()?;
        tracing::info!(roll = identity.roll_id, samples = captured, frames, "enrollment complete");
        Ok(EnrollmentReport {
            identity: identity.clone(),
            samples: captured,
            frames,
            training,
        })
    }

    /// Returns `(samples captured, frames read)`.
    fn collect<S: FrameSource>(
        self,
        source: &mut S,
        identity: &Identity,
        cancel: &CancelToken,
        observer: &mut dyn SessionObserver,
    ) -> Result<(usize, usize), SessionError> {
        let store = self.trainer.samples();
        let every = self.config.sample_every.max(1);
        let mut face_frames = 0usize;
        let mut captured = 0usize;
        let mut frames = 0usize;

        while captured < self.config.quota && frames < self.config.max_frames {
            if cancel.is_cancelled() {
                tracing::info!(roll = identity.roll_id, captured, "enrollment cancelled");
                break;
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!(frames, captured, "frame source exhausted");
                    break;
                }
                Err(CameraError::MalformedFrame(reason)) => {
                    frames += 1;
                    tracing::warn!(frame = frames, %reason, "malformed frame; skipping");
                    continue;
                }
                Err(e) => return Err(SessionError::Capture(e)),
            };
            frames += 1;

            let region = match self.locator.locate(&frame) {
                Ok(regions) => regions.into_iter().next(),
                Err(e) => {
                    tracing::warn!(
                        frame = frames,
                        error = %e,
                        "face locator failed; skipping frame"
                    );
                    None
                }
            };
            let Some(region) = region else {
                observer.on_event(&SessionEvent {
                    frame: &frame,
                    hint: OverlayHint::Searching,
                });
                continue;
            };

            face_frames += 1;
            if face_frames % every != 0 {
                continue;
            }
            let Some(face) = FaceCrop::from_frame(&frame, &region) else {
                continue;
            };
            let path = store.write(identity, captured, &face)?;
            captured += 1;
            tracing::debug!(path = %path.display(), captured, "sample saved");
            observer.on_event(&SessionEvent {
                frame: &frame,
                hint: OverlayHint::Sampled {
                    region,
                    captured,
                    quota: self.config.quota,
                },
            });
        }

        Ok((captured, frames))
    }
}

//! Recognition session: read frames until one identity is seen on enough
//! consecutive frames, then commit it to today's ledger.
//!
//! ```text
//! Idle ──open──▶ Scanning ──face──▶ Confirming ──streak──▶ Committed
//!                   ▲  ◀──no face / bad frame──┘                │
//!                   └── frame budget spent ─▶ TimedOut           ▼
//!        cancel at any point ─▶ Aborted        Recorded | AlreadyMarked
//! ```

use super::{Debounce, OverlayHint, SessionContext, SessionError, SessionEvent, SessionObserver};
use crate::classifier::Classifier;
use crate::face::FaceCrop;
use crate::ledger::{AttendanceLedger, CommitOutcome, LedgerBook};
use crate::locator::FaceLocator;
use crate::types::{BoundingBox, Identity};
use rollcall_hw::{CameraError, CaptureDevice, Frame, FrameSource};
use serde::Serialize;

pub const DEFAULT_CONFIRM_FRAMES: u32 = 30;
pub const DEFAULT_MAX_FRAMES: usize = 300;

#[derive(Debug, Clone, Copy)]
pub struct RecognitionConfig {
    /// Consecutive same-identity frames required before committing.
    pub confirm_frames: u32,
    /// Frame budget before giving up with `NoFaceConfirmed`.
    pub max_frames: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            confirm_frames: DEFAULT_CONFIRM_FRAMES,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

/// How a recognition session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "identity")]
pub enum RecognitionOutcome {
    /// A new attendance record was written.
    Recorded(Identity),
    /// The identity was confirmed but already had a record today.
    AlreadyMarked(Identity),
    /// The frame budget ran out (or the source ended) without a confirmation.
    NoFaceConfirmed,
    /// The operator cancelled the session.
    Cancelled,
}

pub struct RecognitionSession<'a, D, L, C> {
    device: &'a D,
    locator: &'a mut L,
    classifier: &'a C,
    ledgers: &'a LedgerBook,
    config: RecognitionConfig,
}

impl<'a, D, L, C> RecognitionSession<'a, D, L, C>
where
    D: CaptureDevice,
    L: FaceLocator,
    C: Classifier,
{
    pub fn new(
        device: &'a D,
        locator: &'a mut L,
        classifier: &'a C,
        ledgers: &'a LedgerBook,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            device,
            locator,
            classifier,
            ledgers,
            config,
        }
    }

    /// Run the session to a terminal outcome.
    ///
    /// Preconditions (trained model, ledger readable, device openable) are
    /// checked before any frame is read. The frame source is dropped on every
    /// return path.
    pub fn run(
        self,
        ctx: &SessionContext,
        observer: &mut dyn SessionObserver,
    ) -> Result<RecognitionOutcome, SessionError> {
        if !self.classifier.is_ready() {
            return Err(SessionError::ModelUnavailable);
        }
        let ledger = self.ledgers.ledger(ctx.today)?;
        let mut source = self.device.open().map_err(SessionError::from_open)?;
        tracing::info!(
            device = self.device.name(),
            date = %ctx.today,
            "recognition session started"
        );

        let outcome = self.scan(&mut source, &ledger, ctx, observer);
        drop(source);

        match &outcome {
            Ok(o) => tracing::info!(outcome = ?o, "recognition session finished"),
            Err(e) => tracing::error!(error = %e, "recognition session aborted"),
        }
        outcome
    }

    fn scan<S: FrameSource>(
        mut self,
        source: &mut S,
        ledger: &AttendanceLedger,
        ctx: &SessionContext,
        observer: &mut dyn SessionObserver,
    ) -> Result<RecognitionOutcome, SessionError> {
        let mut debounce = Debounce::new(self.config.confirm_frames);

        for frame_no in 1..=self.config.max_frames {
            if ctx.cancel.is_cancelled() {
                return Ok(RecognitionOutcome::Cancelled);
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!(frame = frame_no, "frame source exhausted");
                    return Ok(RecognitionOutcome::NoFaceConfirmed);
                }
                Err(CameraError::MalformedFrame(reason)) => {
                    tracing::warn!(
                        frame = frame_no,
                        %reason,
                        "malformed frame; treating as no face"
                    );
                    debounce.reset();
                    continue;
                }
                Err(e) => return Err(SessionError::Capture(e)),
            };

            let Some((region, identity)) = self.identify(&frame, frame_no) else {
                // Face lost: no carry-over across the gap.
                debounce.reset();
                emit(observer, &frame, OverlayHint::Searching);
                continue;
            };

            if let Some(confirmed) = debounce.observe(&identity) {
                let confirmed = confirmed.clone();
                tracing::info!(frame = frame_no, roll = confirmed.roll_id, "identity confirmed");
                let time = ctx.clock.now().time();
                let (outcome, hint) = match ledger.commit(&confirmed, time)? {
                    CommitOutcome::Recorded(_) => (
                        RecognitionOutcome::Recorded(confirmed.clone()),
                        OverlayHint::Recorded(confirmed),
                    ),
                    CommitOutcome::AlreadyPresent(_) => (
                        RecognitionOutcome::AlreadyMarked(confirmed.clone()),
                        OverlayHint::AlreadyMarked(confirmed),
                    ),
                };
                emit(observer, &frame, hint);
                return Ok(outcome);
            }

            tracing::debug!(
                frame = frame_no,
                roll = identity.roll_id,
                streak = debounce.streak(),
                "tracking"
            );
            emit(
                observer,
                &frame,
                OverlayHint::Tracking {
                    region,
                    identity,
                    streak: debounce.streak(),
                    threshold: debounce.threshold(),
                },
            );
        }

        tracing::info!(
            max_frames = self.config.max_frames,
            "frame budget spent without confirmation"
        );
        Ok(RecognitionOutcome::NoFaceConfirmed)
    }

    /// Scanning and the classify half of Confirming for one frame. `None`
    /// means no usable face, including detector and classifier failures.
    fn identify(&mut self, frame: &Frame, frame_no: usize) -> Option<(BoundingBox, Identity)> {
        let region = match self.locator.locate(frame) {
            Ok(regions) => regions.into_iter().next()?,
            Err(e) => {
                tracing::warn!(
                    frame = frame_no,
                    error = %e,
                    "face locator failed; treating as no face"
                );
                return None;
            }
        };
        let face = FaceCrop::from_frame(frame, &region)?;
        match self.classifier.classify(&face) {
            Ok(identity) => Some((region, identity)),
            Err(e) => {
                tracing::warn!(
                    frame = frame_no,
                    error = %e,
                    "classification failed; treating as no face"
                );
                None
            }
        }
    }
}

fn emit(observer: &mut dyn SessionObserver, frame: &Frame, hint: OverlayHint) {
    observer.on_event(&SessionEvent { frame, hint });
}

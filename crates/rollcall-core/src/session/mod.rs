//! Capture sessions: recognition (take attendance) and enrollment (collect
//! samples for a new identity), plus the context and events they share.

mod debounce;
pub mod enrollment;
pub mod recognition;

pub use debounce::Debounce;
pub use enrollment::{EnrollmentConfig, EnrollmentReport, EnrollmentSession};
pub use recognition::{RecognitionConfig, RecognitionOutcome, RecognitionSession};

use crate::ledger::LedgerError;
use crate::samples::SampleError;
use crate::trainer::TrainError;
use crate::types::{BoundingBox, Identity, InvalidIdentity};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_hw::{CameraError, Frame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(CameraError),
    #[error("capture device busy")]
    DeviceBusy,
    #[error("no trained model; enroll at least one identity first")]
    ModelUnavailable,
    #[error("identity with roll id {0} already exists")]
    DuplicateIdentity(u32),
    #[error("no identity with roll id {0}")]
    NotFound(u32),
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] InvalidIdentity),
    #[error("captured only {captured} of {quota} samples")]
    InsufficientSamples { captured: usize, quota: usize },
    #[error("no face samples stored for any identity")]
    NoSamples,
    #[error("frame capture failed mid-session: {0}")]
    Capture(CameraError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Samples(SampleError),
    #[error(transparent)]
    Training(TrainError),
}

impl SessionError {
    /// Map a device `open` failure to the precondition taxonomy.
    pub(crate) fn from_open(e: CameraError) -> Self {
        match e {
            CameraError::DeviceBusy => Self::DeviceBusy,
            other => Self::DeviceUnavailable(other),
        }
    }

    /// Stable kind name for clients that only see the error text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeviceUnavailable(_) => "DeviceUnavailable",
            Self::DeviceBusy => "DeviceBusy",
            Self::ModelUnavailable => "ModelUnavailable",
            Self::DuplicateIdentity(_) => "DuplicateIdentity",
            Self::NotFound(_) => "NotFound",
            Self::InvalidIdentity(_) => "InvalidIdentity",
            Self::InsufficientSamples { .. } => "InsufficientSamples",
            Self::NoSamples => "NoSamples",
            Self::Capture(_) => "Capture",
            Self::Ledger(_) => "Ledger",
            Self::Samples(_) => "Samples",
            Self::Training(_) => "Training",
        }
    }
}

impl From<SampleError> for SessionError {
    fn from(e: SampleError) -> Self {
        match e {
            SampleError::DuplicateIdentity(roll) => Self::DuplicateIdentity(roll),
            SampleError::NotFound(roll) => Self::NotFound(roll),
            other => Self::Samples(other),
        }
    }
}

impl From<TrainError> for SessionError {
    fn from(e: TrainError) -> Self {
        match e {
            TrainError::NoSamples => Self::NoSamples,
            TrainError::Samples(s) => s.into(),
            other => Self::Training(other),
        }
    }
}

/// Cooperative cancellation flag shared between a session and its operator.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Source of the commit timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in the local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Explicit per-session context: the ledger date, the clock and the cancel flag.
#[derive(Clone)]
pub struct SessionContext {
    pub today: NaiveDate,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancelToken,
}

impl SessionContext {
    /// Context for a live session: today's local date and the wall clock.
    pub fn live(cancel: CancelToken) -> Self {
        let clock = SystemClock;
        Self {
            today: clock.now().date(),
            clock: Arc::new(clock),
            cancel,
        }
    }
}

/// What an overlay should draw for a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayHint {
    /// No face in this frame.
    Searching,
    /// A face is being tracked towards confirmation.
    Tracking {
        region: BoundingBox,
        identity: Identity,
        streak: u32,
        threshold: u32,
    },
    Recorded(Identity),
    AlreadyMarked(Identity),
    /// An enrollment sample was just saved.
    Sampled {
        region: BoundingBox,
        captured: usize,
        quota: usize,
    },
}

/// One processed frame and its overlay hint.
pub struct SessionEvent<'a> {
    pub frame: &'a Frame,
    pub hint: OverlayHint,
}

/// Display sink for session progress. Never required for correctness.
pub trait SessionObserver {
    fn on_event(&mut self, event: &SessionEvent<'_>);
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_event(&mut self, _event: &SessionEvent<'_>) {}
}

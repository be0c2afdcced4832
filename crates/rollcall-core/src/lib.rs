//! rollcall-core: face recognition attendance engine.
//!
//! Locates faces with SCRFD (ONNX Runtime), identifies them with a k-NN
//! classifier over normalized grayscale crops, and records at most one
//! attendance entry per identity per day.

pub mod classifier;
pub mod detector;
pub mod face;
pub mod ledger;
pub mod locator;
pub mod samples;
pub mod service;
pub mod session;
pub mod trainer;
pub mod types;

#[cfg(test)]
mod testing;

pub use classifier::{Classifier, ClassifierError, KnnModel, ModelSlot};
pub use detector::{DetectorError, ScrfdLocator};
pub use face::FaceCrop;
pub use ledger::{AttendanceLedger, CommitOutcome, LedgerBook, LedgerError};
pub use locator::{FaceLocator, LocatorError};
pub use samples::{SampleError, SampleStore};
pub use service::{AttendanceService, ServiceConfig};
pub use session::{
    CancelToken, Clock, EnrollmentConfig, EnrollmentReport, NoopObserver, OverlayHint,
    RecognitionConfig, RecognitionOutcome, SessionContext, SessionError, SessionEvent,
    SessionObserver, SystemClock,
};
pub use trainer::{ModelTrainer, TrainError, TrainReport};
pub use types::{AttendanceRecord, BoundingBox, DayStats, Identity, InvalidIdentity};

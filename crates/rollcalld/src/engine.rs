use crate::config::Config;
use chrono::NaiveDate;
use rollcall_core::detector::DetectorError;
use rollcall_core::{
    AttendanceRecord, AttendanceService, CancelToken, DayStats, EnrollmentReport, Identity,
    LedgerBook, LedgerError, ModelSlot, ModelTrainer, OverlayHint, RecognitionOutcome,
    SampleError, SampleStore, ScrfdLocator, SessionContext, SessionError, SessionEvent,
    SessionObserver, TrainError, TrainReport,
};
use rollcall_hw::V4lDevice;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub type Service = AttendanceService<V4lDevice, ScrfdLocator>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Samples(#[from] SampleError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Model(#[from] TrainError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("invalid date {0:?}; expected YYYY-MM-DD")]
    BadDate(String),
    #[error("engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Stable kind prefix for D-Bus error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(e) => e.kind(),
            Self::BadDate(_) => "InvalidArgument",
            Self::Detector(_)
            | Self::Samples(_)
            | Self::Ledger(_)
            | Self::Model(_)
            | Self::Task(_) => "Internal",
        }
    }
}

/// Cancel tokens of the sessions currently running.
#[derive(Clone, Default)]
struct ActiveSessions {
    tokens: Arc<Mutex<HashMap<u64, CancelToken>>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl ActiveSessions {
    /// Once closed, new sessions start already cancelled.
    fn register(&self) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new();
        let mut tokens = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            token.cancel();
        }
        tokens.insert(id, token.clone());
        drop(tokens);
        SessionGuard {
            id,
            token,
            sessions: self.clone(),
        }
    }

    /// Trip every registered token. Returns whether any session was running.
    fn cancel_all(&self) -> bool {
        let tokens = self.lock();
        for token in tokens.values() {
            token.cancel();
        }
        !tokens.is_empty()
    }

    /// Cancel everything running and refuse to start anything new.
    fn close(&self) -> bool {
        let tokens = self.lock();
        self.closed.store(true, Ordering::SeqCst);
        for token in tokens.values() {
            token.cancel();
        }
        !tokens.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, CancelToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deregisters its token when the session finishes.
struct SessionGuard {
    id: u64,
    token: CancelToken,
    sessions: ActiveSessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.lock().remove(&self.id);
    }
}

/// Logs session progress at debug level.
struct TraceObserver;

impl SessionObserver for TraceObserver {
    fn on_event(&mut self, event: &SessionEvent<'_>) {
        match &event.hint {
            OverlayHint::Searching => {}
            OverlayHint::Tracking {
                identity,
                streak,
                threshold,
                ..
            } => {
                tracing::debug!(
                    frame = event.frame.sequence,
                    roll = identity.roll_id,
                    streak,
                    threshold,
                    "tracking"
                )
            }
            OverlayHint::Sampled { captured, quota, .. } => {
                tracing::debug!(frame = event.frame.sequence, captured, quota, "sample captured")
            }
            OverlayHint::Recorded(identity) | OverlayHint::AlreadyMarked(identity) => {
                tracing::debug!(
                    frame = event.frame.sequence,
                    roll = identity.roll_id,
                    hint = ?event.hint,
                    "confirmed"
                )
            }
        }
    }
}

/// Clone-safe handle to the attendance service.
///
/// Every command runs on tokio's blocking pool so D-Bus dispatch is never
/// stalled by a capture session.
#[derive(Clone)]
pub struct EngineHandle {
    service: Arc<Service>,
    sessions: ActiveSessions,
}

impl EngineHandle {
    pub fn new(service: Service) -> Self {
        Self {
            service: Arc::new(service),
            sessions: ActiveSessions::default(),
        }
    }

    /// Run one recognition session against today's ledger.
    pub async fn take_attendance(&self) -> Result<RecognitionOutcome, EngineError> {
        let session = self.sessions.register();
        self.blocking(move |service| {
            let ctx = SessionContext::live(session.token.clone());
            service.start_recognition_session(&ctx, &mut TraceObserver)
        })
        .await
    }

    pub async fn enroll(
        &self,
        display_name: String,
        roll_id: u32,
    ) -> Result<EnrollmentReport, EngineError> {
        let session = self.sessions.register();
        self.blocking(move |service| {
            service.start_enrollment_session(
                &display_name,
                roll_id,
                &session.token,
                &mut TraceObserver,
            )
        })
        .await
    }

    pub async fn delete_identity(&self, roll_id: u32) -> Result<Identity, EngineError> {
        self.blocking(move |service| service.delete_identity(roll_id)).await
    }

    pub async fn retrain(&self) -> Result<TrainReport, EngineError> {
        self.blocking(|service| service.retrain()).await
    }

    /// Cancel whatever session is running. Returns false when idle.
    pub fn cancel(&self) -> bool {
        let cancelled = self.sessions.cancel_all();
        tracing::info!(cancelled, "cancel requested");
        cancelled
    }

    /// Process shutdown: cancel the running session and any that a late
    /// D-Bus call might still start.
    pub fn shutdown(&self) -> bool {
        let cancelled = self.sessions.close();
        tracing::info!(cancelled, "cancelling sessions for shutdown");
        cancelled
    }

    pub async fn stats(&self) -> Result<DayStats, EngineError> {
        self.blocking(|service| service.today_stats(today())).await
    }

    pub async fn list_identities(&self) -> Result<Vec<Identity>, EngineError> {
        self.blocking(|service| service.list_identities()).await
    }

    /// Records for a `YYYY-MM-DD` date.
    pub async fn attendance(&self, date: &str) -> Result<Vec<AttendanceRecord>, EngineError> {
        let date = parse_date(date)?;
        self.blocking(move |service| service.attendance(date)).await
    }

    pub async fn status(&self) -> Result<serde_json::Value, EngineError> {
        let identities = self.blocking(|service| service.total_identities()).await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.service.device_name(),
            "busy": self.service.is_busy(),
            "model_ready": self.service.model_ready(),
            "identities": identities,
        }))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Service) -> Result<T, SessionError> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        Ok(tokio::task::spawn_blocking(move || f(&service)).await??)
    }
}

/// Build the service from configuration.
///
/// Loads the detector and any persisted model synchronously so startup
/// fails fast. The camera is opened per session, not here.
pub fn build_service(config: &Config) -> Result<Service, EngineError> {
    let detector_path = config.detector_model();
    let locator = ScrfdLocator::load(&detector_path)?;
    tracing::info!(path = %detector_path.display(), "SCRFD detector loaded");

    let samples = SampleStore::open(config.faces_dir())?;
    let ledgers = LedgerBook::open(config.attendance_dir())?;
    let trainer = ModelTrainer::new(
        samples,
        Arc::new(ModelSlot::default()),
        config.model_path(),
        config.knn_neighbors,
    );
    if !trainer.load_artifact()? {
        tracing::warn!("no trained model yet; enroll an identity before taking attendance");
    }

    tracing::info!(device = %config.camera_device, "capture device configured");
    Ok(AttendanceService::new(
        V4lDevice::new(config.camera_device.clone()),
        locator,
        trainer,
        ledgers,
        config.service_config(),
    ))
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn parse_date(date: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::BadDate(date.to_string()))
}

//! Attendance service: the command and query surface over one capture
//! device, one face locator, the sample store, the model and the ledgers.
//!
//! All methods take `&self` and may be called from several threads. Capture
//! sessions are mutually exclusive through the device lease; a session that
//! starts while another holds the device fails with `DeviceBusy`.

use crate::classifier::Classifier;
use crate::ledger::LedgerBook;
use crate::locator::FaceLocator;
use crate::session::{
    CancelToken, EnrollmentConfig, EnrollmentReport, EnrollmentSession, RecognitionConfig,
    RecognitionOutcome, RecognitionSession, SessionContext, SessionError, SessionObserver,
};
use crate::trainer::{ModelTrainer, TrainError, TrainReport};
use crate::types::{AttendanceRecord, DayStats, Identity};
use chrono::NaiveDate;
use rollcall_hw::{CaptureDevice, ExclusiveDevice};
use std::sync::{Mutex, MutexGuard, TryLockError};

#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceConfig {
    pub recognition: RecognitionConfig,
    pub enrollment: EnrollmentConfig,
}

pub struct AttendanceService<D, L> {
    device: ExclusiveDevice<D>,
    locator: Mutex<L>,
    trainer: ModelTrainer,
    ledgers: LedgerBook,
    config: ServiceConfig,
}

impl<D, L> AttendanceService<D, L>
where
    D: CaptureDevice,
    L: FaceLocator,
{
    pub fn new(
        device: D,
        locator: L,
        trainer: ModelTrainer,
        ledgers: LedgerBook,
        config: ServiceConfig,
    ) -> Self {
        Self {
            device: ExclusiveDevice::new(device),
            locator: Mutex::new(locator),
            trainer,
            ledgers,
            config,
        }
    }

    /// Run one recognition session against today's ledger.
    pub fn start_recognition_session(
        &self,
        ctx: &SessionContext,
        observer: &mut dyn SessionObserver,
    ) -> Result<RecognitionOutcome, SessionError> {
        let mut locator = self.lock_locator()?;
        let classifier = self.trainer.slot();
        RecognitionSession::new(
            &self.device,
            &mut *locator,
            classifier,
            &self.ledgers,
            self.config.recognition,
        )
        .run(ctx, observer)
    }

    /// Enroll a new identity and retrain.
    ///
    /// If the session fails after creating the identity, for any reason, the
    /// partial identity is removed again so the roll id can be enrolled afresh.
    /// An identity that existed beforehand is never touched.
    pub fn start_enrollment_session(
        &self,
        display_name: &str,
        roll_id: u32,
        cancel: &CancelToken,
        observer: &mut dyn SessionObserver,
    ) -> Result<EnrollmentReport, SessionError> {
        let identity = Identity::new(display_name, roll_id);
        let mut locator = self.lock_locator()?;
        // Holding the locator keeps other enrollments out until we are done.
        let existed = self.trainer.samples().find(roll_id)?.is_some();
        let result = EnrollmentSession::new(
            &self.device,
            &mut *locator,
            &self.trainer,
            self.config.enrollment,
        )
        .run(&identity, cancel, observer);

        if let Err(e) = &result {
            if !existed {
                self.discard_partial(roll_id, e);
            }
        }
        result
    }

    /// Delete an identity and its samples, then retrain on what remains (or
    /// mark the classifier untrained when nothing remains).
    pub fn delete_identity(&self, roll_id: u32) -> Result<Identity, SessionError> {
        let identity = self.trainer.samples().remove(roll_id)?;
        tracing::info!(roll = roll_id, name = %identity.display_name, "identity deleted");

        match self.trainer.retrain() {
            Ok(_) => {}
            Err(TrainError::NoSamples) => self.trainer.mark_untrained()?,
            Err(e) => return Err(e.into()),
        }
        Ok(identity)
    }

    pub fn retrain(&self) -> Result<TrainReport, SessionError> {
        Ok(self.trainer.retrain()?)
    }

    pub fn total_identities(&self) -> Result<usize, SessionError> {
        Ok(self.trainer.samples().identities()?.len())
    }

    /// Attendance summary for `today`.
    pub fn today_stats(&self, today: NaiveDate) -> Result<DayStats, SessionError> {
        let total = self.total_identities()?;
        let present = self.ledgers.ledger(today)?.present_count();
        Ok(DayStats::new(today, present, total))
    }

    /// Enrolled identities ordered by roll id.
    pub fn list_identities(&self) -> Result<Vec<Identity>, SessionError> {
        Ok(self.trainer.samples().identities()?)
    }

    /// Records for `date` in commit order.
    pub fn attendance(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, SessionError> {
        Ok(self.ledgers.list(date)?)
    }

    pub fn is_busy(&self) -> bool {
        self.device.is_held()
    }

    pub fn model_ready(&self) -> bool {
        self.trainer.slot().is_ready()
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    // The locator is only ever held by a running session.
    fn discard_partial(&self, roll_id: u32, reason: &SessionError) {
        let samples = self.trainer.samples();
        match samples.find(roll_id) {
            Ok(None) => {}
            Ok(Some(_)) => {
                tracing::info!(roll = roll_id, %reason, "discarding partial identity");
                if let Err(e) = samples.remove(roll_id) {
                    tracing::warn!(
                        roll = roll_id,
                        error = %e,
                        "failed to discard partial identity"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(roll = roll_id, error = %e, "failed to look up partial identity");
            }
        }
    }

    fn lock_locator(&self) -> Result<MutexGuard<'_, L>, SessionError> {
        match self.locator.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(SessionError::DeviceBusy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ModelSlot;
    use crate::samples::SampleStore;
    use crate::session::{NoopObserver, OverlayHint, SessionEvent};
    use crate::testing::*;
    use std::path::Path;
    use std::sync::Arc;

    const ADA: u8 = 40;
    const BOB: u8 = 200;

    fn service(root: &Path, device: ScriptedDevice) -> TestService {
        let store = SampleStore::open(root.join("faces")).unwrap();
        let slot = Arc::new(ModelSlot::default());
        let trainer = ModelTrainer::new(store, slot, root.join("model.json"), 5);
        let ledgers = LedgerBook::open(root.join("attendance")).unwrap();
        let locator = ScriptedLocator::default();
        AttendanceService::new(device, locator, trainer, ledgers, ServiceConfig::default())
    }

    type TestService = AttendanceService<ScriptedDevice, ScriptedLocator>;

    fn enroll(svc: &TestService, name: &str, roll: u32) -> Result<EnrollmentReport, SessionError> {
        svc.start_enrollment_session(name, roll, &CancelToken::new(), &mut NoopObserver)
    }

    fn recognize(svc: &TestService) -> RecognitionOutcome {
        svc.start_recognition_session(&context(CancelToken::new()), &mut NoopObserver)
            .unwrap()
    }

    #[test]
    fn test_enroll_then_recognize_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice::scenes(vec![
            vec![ADA; 60],
            vec![BOB; 60],
            vec![BOB; 40],
            vec![BOB; 40],
        ]);
        let svc = service(dir.path(), device);

        enroll(&svc, "ada", 1).unwrap();
        let report = enroll(&svc, "bob", 2).unwrap();
        assert_eq!(report.training.identities, 2);
        assert_eq!(report.training.samples, 20);

        assert_eq!(recognize(&svc), RecognitionOutcome::Recorded(Identity::new("bob", 2)));
        assert_eq!(recognize(&svc), RecognitionOutcome::AlreadyMarked(Identity::new("bob", 2)));

        let records = svc.attendance(test_date()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity.roll_id, 2);
        assert!(!svc.is_busy());
    }

    #[test]
    fn test_recognition_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice::new(vec![ADA; 40]);
        let counters = Arc::clone(&device.counters);
        let svc = service(dir.path(), device);

        let err = svc
            .start_recognition_session(&context(CancelToken::new()), &mut NoopObserver)
            .unwrap_err();
        assert!(matches!(err, SessionError::ModelUnavailable));
        assert_eq!(counters.opens(), 0);
    }

    #[test]
    fn test_insufficient_enrollment_discards_partial_identity() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice::scenes(vec![vec![ADA; 30], vec![ADA; 60]]);
        let svc = service(dir.path(), device);

        let err = enroll(&svc, "ada", 1).unwrap_err();
        assert!(matches!(err, SessionError::InsufficientSamples { captured: 6, quota: 10 }));
        assert_eq!(svc.total_identities().unwrap(), 0);
        assert!(!svc.model_ready());

        // The roll id is free again.
        enroll(&svc, "ada", 1).unwrap();
        assert_eq!(svc.total_identities().unwrap(), 1);
    }

    /// Puts a directory where a later sample image will be written.
    struct BlockSample(std::path::PathBuf);

    impl SessionObserver for BlockSample {
        fn on_event(&mut self, event: &SessionEvent<'_>) {
            if matches!(event.hint, OverlayHint::Sampled { captured: 1, .. }) {
                std::fs::create_dir(&self.0).unwrap();
            }
        }
    }

    #[test]
    fn test_failed_sample_write_discards_partial_identity() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice::scenes(vec![vec![ADA; 60], vec![ADA; 60]]);
        let svc = service(dir.path(), device);
        let mut blocker = BlockSample(dir.path().join("faces").join("ada_1").join("ada_3.jpg"));

        let err = svc
            .start_enrollment_session("ada", 1, &CancelToken::new(), &mut blocker)
            .unwrap_err();
        assert!(matches!(err, SessionError::Samples(_)));
        assert_eq!(svc.total_identities().unwrap(), 0);
        assert_eq!(svc.today_stats(test_date()).unwrap().total_registered, 0);
        assert!(!svc.model_ready());

        enroll(&svc, "ada", 1).unwrap();
        assert_eq!(svc.list_identities().unwrap(), vec![Identity::new("ada", 1)]);
    }

    #[test]
    fn test_duplicate_enrollment_keeps_existing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), ScriptedDevice::new(vec![ADA; 60]));
        enroll(&svc, "ada", 1).unwrap();

        let err = enroll(&svc, "bob", 1).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateIdentity(1)));
        assert_eq!(svc.list_identities().unwrap(), vec![Identity::new("ada", 1)]);
    }

    #[test]
    fn test_delete_cascades_to_retrain_then_untrained() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice::scenes(vec![vec![ADA; 60], vec![BOB; 60], vec![ADA; 40]]);
        let svc = service(dir.path(), device);
        enroll(&svc, "ada", 1).unwrap();
        enroll(&svc, "bob", 2).unwrap();

        assert_eq!(svc.delete_identity(1).unwrap(), Identity::new("ada", 1));
        assert!(svc.model_ready());
        // Only bob remains in the model, so even an ada-like face maps to bob.
        assert_eq!(recognize(&svc), RecognitionOutcome::Recorded(Identity::new("bob", 2)));

        svc.delete_identity(2).unwrap();
        assert!(!svc.model_ready());
        assert!(!dir.path().join("model.json").exists());
        assert!(matches!(svc.delete_identity(2), Err(SessionError::NotFound(2))));
    }

    #[test]
    fn test_today_stats() {
        let dir = tempfile::tempdir().unwrap();
        let device = ScriptedDevice::scenes(vec![vec![ADA; 60], vec![BOB; 60], vec![ADA; 40]]);
        let svc = service(dir.path(), device);

        let empty = svc.today_stats(test_date()).unwrap();
        assert_eq!(empty.total_registered, 0);
        assert_eq!(empty.attendance_rate, 0.0);

        enroll(&svc, "ada", 1).unwrap();
        enroll(&svc, "bob", 2).unwrap();
        recognize(&svc);

        let stats = svc.today_stats(test_date()).unwrap();
        assert_eq!(stats.present_count, 1);
        assert_eq!(stats.total_registered, 2);
        assert_eq!(stats.attendance_rate, 50.0);
        assert_eq!(stats.date_label, "17-October-2026");
    }

    #[test]
    fn test_retrain_without_samples() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), ScriptedDevice::new(Vec::new()));
        assert!(matches!(svc.retrain(), Err(SessionError::NoSamples)));
    }

    #[test]
    fn test_concurrent_session_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), ScriptedDevice::new(vec![ADA; 60]));
        enroll(&svc, "ada", 1).unwrap();

        let _running = svc.locator.lock().unwrap();
        let err = svc
            .start_recognition_session(&context(CancelToken::new()), &mut NoopObserver)
            .unwrap_err();
        assert!(matches!(err, SessionError::DeviceBusy));
        assert!(matches!(enroll(&svc, "bob", 2), Err(SessionError::DeviceBusy)));
    }
}

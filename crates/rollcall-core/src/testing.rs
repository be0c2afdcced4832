//! Scripted collaborators for session tests.
//!
//! A scene is one byte per frame: `NO_FACE` means the locator finds nothing,
//! `LOCATOR_FAULT` makes the locator fail, and any other value is a face whose
//! pixels all carry that value.

use crate::classifier::{Classifier, ClassifierError};
use crate::face::FaceCrop;
use crate::locator::{FaceLocator, LocatorError};
use crate::session::{
    CancelToken, Clock, OverlayHint, SessionContext, SessionEvent, SessionObserver,
};
use crate::types::{BoundingBox, Identity};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rollcall_hw::{CameraError, CaptureDevice, Frame, FrameSource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const NO_FACE: u8 = 0;
pub const LOCATOR_FAULT: u8 = 255;
const FRAME_SIZE: u32 = 8;

#[derive(Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub releases: AtomicUsize,
    pub reads: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

pub struct ScriptedDevice {
    /// One scene per `open`; the last one repeats.
    scenes: Vec<Vec<u8>>,
    fail_open: bool,
    /// Frame index at which `next_frame` returns a capture error.
    fault_at: Option<usize>,
    /// Frame index that is read but does not decode.
    malformed_at: Option<usize>,
    /// Cancel this token when the frame at the given index is read.
    cancel_at: Option<(usize, CancelToken)>,
    pub counters: Arc<Counters>,
}

impl ScriptedDevice {
    pub fn new(scene: Vec<u8>) -> Self {
        Self::scenes(vec![scene])
    }

    pub fn scenes(scenes: Vec<Vec<u8>>) -> Self {
        Self {
            scenes,
            fail_open: false,
            fault_at: None,
            malformed_at: None,
            cancel_at: None,
            counters: Arc::default(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn fault_at(mut self, index: usize) -> Self {
        self.fault_at = Some(index);
        self
    }

    pub fn malformed_at(mut self, index: usize) -> Self {
        self.malformed_at = Some(index);
        self
    }

    pub fn cancel_at(mut self, index: usize, token: CancelToken) -> Self {
        self.cancel_at = Some((index, token));
        self
    }
}

pub struct ScriptedSource {
    scene: Vec<u8>,
    next: usize,
    fault_at: Option<usize>,
    malformed_at: Option<usize>,
    cancel_at: Option<(usize, CancelToken)>,
    counters: Arc<Counters>,
}

impl CaptureDevice for ScriptedDevice {
    type Source = ScriptedSource;

    fn open(&self) -> Result<ScriptedSource, CameraError> {
        if self.fail_open {
            return Err(CameraError::DeviceNotFound("scripted".into()));
        }
        let opened = self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let scene = self
            .scenes
            .get(opened)
            .or_else(|| self.scenes.last())
            .cloned()
            .unwrap_or_default();
        Ok(ScriptedSource {
            scene,
            next: 0,
            fault_at: self.fault_at,
            malformed_at: self.malformed_at,
            cancel_at: self.cancel_at.clone(),
            counters: Arc::clone(&self.counters),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let index = self.next;
        if self.fault_at == Some(index) {
            return Err(CameraError::CaptureFailed("scripted fault".into()));
        }
        let Some(&value) = self.scene.get(index) else {
            return Ok(None);
        };
        self.next += 1;
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if let Some((at, token)) = &self.cancel_at {
            if *at == index {
                token.cancel();
            }
        }
        if self.malformed_at == Some(index) {
            return Err(CameraError::MalformedFrame("scripted".into()));
        }
        Ok(Some(Frame::filled(FRAME_SIZE, FRAME_SIZE, value, index as u32)))
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Finds one full-frame face unless the scene byte says otherwise.
#[derive(Default)]
pub struct ScriptedLocator {
    pub calls: usize,
}

impl FaceLocator for ScriptedLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, LocatorError> {
        self.calls += 1;
        match frame.data.first().copied() {
            None | Some(NO_FACE) => Ok(Vec::new()),
            Some(LOCATOR_FAULT) => Err(LocatorError::MalformedFrame("scripted".into())),
            Some(_) => Ok(vec![
                BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: frame.width as f32,
                    height: frame.height as f32,
                    confidence: 0.9,
                },
                BoundingBox {
                    x: 1.0,
                    y: 1.0,
                    width: 2.0,
                    height: 2.0,
                    confidence: 0.99,
                },
            ]),
        }
    }
}

/// Labels a face by the identity whose scene value is closest to its pixels.
pub struct ScriptedClassifier {
    table: Vec<(u8, Identity)>,
}

impl ScriptedClassifier {
    pub fn new(table: Vec<(u8, Identity)>) -> Self {
        Self { table }
    }

    pub fn untrained() -> Self {
        Self::new(Vec::new())
    }
}

impl Classifier for ScriptedClassifier {
    fn is_ready(&self) -> bool {
        !self.table.is_empty()
    }

    fn classify(&self, face: &FaceCrop) -> Result<Identity, ClassifierError> {
        let value = face.pixels().first().copied().unwrap_or(0);
        self.table
            .iter()
            .min_by_key(|(v, _)| (*v as i32 - value as i32).abs())
            .map(|(_, id)| id.clone())
            .ok_or(ClassifierError::ModelUnavailable)
    }
}

pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

pub fn context(cancel: CancelToken) -> SessionContext {
    let now = test_date().and_time(NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    SessionContext {
        today: test_date(),
        clock: Arc::new(FixedClock(now)),
        cancel,
    }
}

/// Records every overlay hint it sees.
#[derive(Default)]
pub struct RecordingObserver {
    pub hints: Vec<OverlayHint>,
}

impl SessionObserver for RecordingObserver {
    fn on_event(&mut self, event: &SessionEvent<'_>) {
        self.hints.push(event.hint.clone());
    }
}

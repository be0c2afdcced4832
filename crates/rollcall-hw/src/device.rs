//! Frame source abstraction and exclusive device leasing.
//!
//! A [`CaptureDevice`] opens a [`FrameSource`]; dropping the source releases
//! the device. [`ExclusiveDevice`] wraps any device so that at most one
//! source is open at a time; a second `open` fails with
//! [`CameraError::DeviceBusy`] until the first source is dropped.

use crate::camera::CameraError;
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A live producer of frames.
pub trait FrameSource {
    /// Pull the next frame. Blocks for at most one device frame interval.
    ///
    /// `Ok(None)` means the source is exhausted and will never yield again.
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

/// Something that can be opened into a [`FrameSource`].
pub trait CaptureDevice {
    type Source: FrameSource;

    /// Open the device for capture. The device is released when the returned
    /// source is dropped.
    fn open(&self) -> Result<Self::Source, CameraError>;

    /// Human-readable device name for logs.
    fn name(&self) -> &str;
}

/// Wraps a device so only one source may be open at a time.
pub struct ExclusiveDevice<D> {
    inner: D,
    held: Arc<AtomicBool>,
}

impl<D: CaptureDevice> ExclusiveDevice<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a source is currently open.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl<D: CaptureDevice> CaptureDevice for ExclusiveDevice<D> {
    type Source = Leased<D::Source>;

    fn open(&self) -> Result<Self::Source, CameraError> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(device = self.inner.name(), "device already leased");
            return Err(CameraError::DeviceBusy);
        }

        match self.inner.open() {
            Ok(source) => Ok(Leased {
                source: Some(source),
                held: Arc::clone(&self.held),
            }),
            Err(e) => {
                self.held.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// A source leased from an [`ExclusiveDevice`].
///
/// The inner source is dropped before the lease flag is cleared, so a new
/// lease never overlaps a device that is still closing.
pub struct Leased<S> {
    source: Option<S>,
    held: Arc<AtomicBool>,
}

impl<S: FrameSource> FrameSource for Leased<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.source.as_mut() {
            Some(source) => source.next_frame(),
            None => Ok(None),
        }
    }
}

impl<S> Drop for Leased<S> {
    fn drop(&mut self) {
        drop(self.source.take());
        self.held.store(false, Ordering::Release);
    }
}

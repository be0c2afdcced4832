//! rollcall-hw: hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access behind the [`FrameSource`] and
//! [`CaptureDevice`] traits, plus exclusive leasing so only one session
//! holds a camera at a time.

pub mod camera;
pub mod device;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, PixelFormat, V4lDevice};
pub use device::{CaptureDevice, ExclusiveDevice, FrameSource, Leased};
pub use frame::Frame;

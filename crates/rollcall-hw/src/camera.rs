//! V4L2 camera capture via the `v4l` crate.

use crate::device::{CaptureDevice, FrameSource};
use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    /// A buffer was dequeued but could not be decoded; the device is fine.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
    /// Motion JPEG, decoded per frame.
    Mjpeg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

/// A V4L2 camera addressed by path, opened once per session.
#[derive(Debug, Clone)]
pub struct V4lDevice {
    path: String,
}

impl V4lDevice {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl CaptureDevice for V4lDevice {
    type Source = CameraStream;

    fn open(&self) -> Result<CameraStream, CameraError> {
        Camera::open(&self.path)?.stream()
    }

    fn name(&self) -> &str {
        &self.path
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; drivers that only offer GREY, Y16 or MJPG negotiate those instead.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, Y16 or MJPG)"
            ))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "opened camera"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start streaming. The returned stream owns the camera.
    pub fn stream(self) -> Result<CameraStream, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(CameraStream {
            stream,
            camera: self,
        })
    }

    fn to_frame(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        decode_buffer(self.pixel_format, self.width, self.height, buf, sequence)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Convert a raw buffer to a grayscale frame based on the negotiated format.
/// Bytes that do not decode are a [`CameraError::MalformedFrame`].
fn decode_buffer(
    format: PixelFormat,
    width: u32,
    height: u32,
    buf: &[u8],
    sequence: u32,
) -> Result<Frame, CameraError> {
    let convert = |e: frame::FrameError| CameraError::MalformedFrame(e.to_string());
    let (data, width, height) = match format {
        PixelFormat::Grey => {
            let pixels = (width * height) as usize;
            if buf.len() < pixels {
                return Err(CameraError::MalformedFrame(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            (buf[..pixels].to_vec(), width, height)
        }
        PixelFormat::Y16 => (
            frame::y16_to_grayscale(buf, width, height).map_err(convert)?,
            width,
            height,
        ),
        PixelFormat::Yuyv => (
            frame::yuyv_to_grayscale(buf, width, height).map_err(convert)?,
            width,
            height,
        ),
        PixelFormat::Mjpeg => frame::mjpeg_to_grayscale(buf).map_err(convert)?,
    };
    Frame::from_gray(data, width, height, sequence).map_err(convert)
}

/// An open, streaming camera. Dropping it stops the stream and closes the device.
pub struct CameraStream {
    stream: MmapStream<'static>,
    camera: Camera,
}

impl FrameSource for CameraStream {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        self.camera.to_frame(buf, meta.sequence).map(Some)
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        tracing::debug!(device = %self.camera.device_path, "camera released");
    }
}

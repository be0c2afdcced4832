//! Frame type and pixel-format conversion to grayscale.

use image::GrayImage;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Build a frame from raw grayscale bytes, checking the length against the dimensions.
    pub fn from_gray(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = (width * height) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// A frame where every pixel has the same value.
    pub fn filled(width: u32, height: u32, value: u8, sequence: u32) -> Self {
        Self {
            data: vec![value; (width * height) as usize],
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        }
    }

    /// Borrow the pixels as an `image` buffer for cropping and resizing.
    pub fn to_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale little-endian 16-bit grayscale to 8 bits by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    if y16.len() < pixels * 2 {
        return Err(FrameError::InvalidLength {
            expected: pixels * 2,
            actual: y16.len(),
        });
    }
    Ok(y16[..pixels * 2].chunks_exact(2).map(|px| px[1]).collect())
}

/// Decode a motion-JPEG buffer and convert it to grayscale.
///
/// Returns the decoded dimensions, which some UVC cameras report differently
/// from the negotiated format.
pub fn mjpeg_to_grayscale(jpeg: &[u8]) -> Result<(Vec<u8>, u32, u32), FrameError> {
    let decoded = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_luma8();
    let (width, height) = decoded.dimensions();
    Ok((decoded.into_raw(), width, height))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // Two pixels: 0x1234 and 0xff00, little-endian
        let y16 = vec![0x34, 0x12, 0x00, 0xff];
        let gray = y16_to_grayscale(&y16, 2, 1).unwrap();
        assert_eq!(gray, vec![0x12, 0xff]);
    }

    #[test]
    fn test_mjpeg_roundtrip_dimensions() {
        let img = GrayImage::from_pixel(8, 4, image::Luma([90u8]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let (gray, w, h) = mjpeg_to_grayscale(&jpeg).unwrap();
        assert_eq!((w, h), (8, 4));
        assert_eq!(gray.len(), 32);
    }

    #[test]
    fn test_mjpeg_garbage_is_decode_error() {
        assert!(matches!(
            mjpeg_to_grayscale(&[0, 1, 2, 3]),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn test_from_gray_checks_length() {
        assert!(Frame::from_gray(vec![0; 5], 2, 2, 0).is_err());
        let frame = Frame::from_gray(vec![7; 4], 2, 2, 3).unwrap();
        assert_eq!(frame.sequence, 3);
        assert_eq!(frame.to_image().unwrap().get_pixel(1, 1).0, [7]);
    }
}

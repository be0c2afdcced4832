//! Face normalization: crop a detected region and resize it to the fixed
//! sample size used for both enrollment storage and classification.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use rollcall_hw::Frame;

/// Side length of a normalized face crop, in pixels.
pub const FACE_SIZE: u32 = 50;

/// A normalized `FACE_SIZE` × `FACE_SIZE` grayscale face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceCrop {
    image: GrayImage,
}

impl FaceCrop {
    /// Crop `region` out of `frame` and resize to the normalized size.
    ///
    /// Returns `None` when the region lies entirely outside the frame.
    pub fn from_frame(frame: &Frame, region: &BoundingBox) -> Option<Self> {
        let (x, y, w, h) = region.clamp_to(frame.width, frame.height)?;
        let full = frame.to_image()?;
        let crop = imageops::crop_imm(&full, x, y, w, h).to_image();
        Some(Self::normalize(crop))
    }

    /// Resize an arbitrary grayscale image to the normalized size.
    pub fn normalize(image: GrayImage) -> Self {
        if image.dimensions() == (FACE_SIZE, FACE_SIZE) {
            return Self { image };
        }
        Self {
            image: imageops::resize(&image, FACE_SIZE, FACE_SIZE, FilterType::Triangle),
        }
    }

    /// Raw pixels, row-major, `FACE_SIZE * FACE_SIZE` bytes.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_is_normalized_size() {
        let frame = Frame::filled(120, 80, 77, 0);
        let region = BoundingBox { x: 10.0, y: 10.0, width: 30.0, height: 40.0, confidence: 0.9 };
        let crop = FaceCrop::from_frame(&frame, &region).unwrap();
        assert_eq!(crop.image().dimensions(), (FACE_SIZE, FACE_SIZE));
        assert_eq!(crop.pixels().len(), (FACE_SIZE * FACE_SIZE) as usize);
        assert!(crop.pixels().iter().all(|&p| p == 77));
    }

    #[test]
    fn test_region_outside_frame() {
        let frame = Frame::filled(20, 20, 0, 0);
        let region = BoundingBox { x: 30.0, y: 30.0, width: 5.0, height: 5.0, confidence: 0.9 };
        assert!(FaceCrop::from_frame(&frame, &region).is_none());
    }
}

//! SCRFD face locator via ONNX Runtime.
//!
//! Letterboxes the grayscale frame into the 640×640 model input, decodes the
//! three anchor-free stride heads and suppresses overlaps with NMS. Landmark
//! heads are ignored; only boxes are needed for cropping.

use crate::locator::{FaceLocator, LocatorError};
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_hw::Frame;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("unexpected model layout: {0}")]
    BadModel(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox placement of the frame inside the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).min(INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).min(INPUT_SIZE);
        Self {
            scale,
            pad_x: (INPUT_SIZE - new_w) / 2,
            pad_y: (INPUT_SIZE - new_h) / 2,
        }
    }

    /// Map a model-space point back to frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// SCRFD-based [`FaceLocator`].
pub struct ScrfdLocator {
    session: Session,
    /// `(score, bbox)` output indices per stride.
    heads: [(usize, usize); 3],
}

impl ScrfdLocator {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::BadModel(format!(
                "expected score and bbox heads for 3 strides, got {} outputs",
                names.len()
            )));
        }
        let heads = output_heads(&names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            ?heads,
            "loaded SCRFD model"
        );

        Ok(Self { session, heads })
    }

    fn preprocess(frame: &Frame) -> Result<(Array4<f32>, Letterbox), LocatorError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(LocatorError::MalformedFrame("zero-sized frame".into()));
        }
        let gray = frame.to_image().ok_or_else(|| {
            LocatorError::MalformedFrame(format!(
                "{} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            ))
        })?;

        let letterbox = Letterbox::fit(frame.width, frame.height);
        let new_w = INPUT_SIZE - 2 * letterbox.pad_x;
        let new_h = INPUT_SIZE - 2 * letterbox.pad_y;
        let resized = imageops::resize(&gray, new_w, new_h, FilterType::Triangle);

        let size = INPUT_SIZE as usize;
        // Padding is the mean so it normalizes to zero.
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let v = (pixel.0[0] as f32 - PIXEL_MEAN) / PIXEL_STD;
            let (tx, ty) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = v;
            }
        }

        Ok((tensor, letterbox))
    }
}

impl FaceLocator for ScrfdLocator {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, LocatorError> {
        let (input, letterbox) = Self::preprocess(frame)?;

        let tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| LocatorError::InferenceFailed(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| LocatorError::InferenceFailed(e.to_string()))?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in STRIDES.iter().zip(self.heads.iter()) {
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                LocatorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, boxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                LocatorError::InferenceFailed(format!("boxes stride {stride}: {e}"))
            })?;
            candidates.extend(decode_stride(scores, boxes, stride, &letterbox));
        }

        Ok(nms(candidates, NMS_THRESHOLD))
    }
}

/// Map stride heads to output indices, by name (`score_8`, `bbox_8`, …) when
/// the export names them, otherwise by the standard positional layout.
fn output_heads(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<(usize, usize)>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named {
        Some(heads) => [heads[0], heads[1], heads[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Decode the boxes above threshold for a single stride level.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE as usize / stride;
    let s = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score > CONFIDENCE_THRESHOLD)
        .filter_map(|(idx, &score)| {
            let off = idx * 4;
            let d = boxes.get(off..off + 4)?;
            let cell = idx / ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * s;
            let cy = (cell / grid_w) as f32 * s;

            let (x1, y1) = letterbox.unmap(cx - d[0] * s, cy - d[1] * s);
            let (x2, y2) = letterbox.unmap(cx + d[2] * s, cy + d[3] * s);
            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
            })
        })
        .collect()
}

/// Non-maximum suppression. Output is ordered by descending confidence.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

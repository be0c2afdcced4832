//! Face locator capability interface.

use crate::types::BoundingBox;
use rollcall_hw::Frame;
use thiserror::Error;

/// A detector failure on one frame. Sessions treat it as "no face this frame".
#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Finds candidate face regions in a frame.
pub trait FaceLocator {
    /// Return detected regions in the detector's own order; the caller uses
    /// the first one and never re-sorts. An empty vector means no face.
    fn locate(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, LocatorError>;
}

impl<L: FaceLocator + ?Sized> FaceLocator for Box<L> {
    fn locate(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, LocatorError> {
        (**self).locate(frame)
    }
}

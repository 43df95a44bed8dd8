use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FaceIdError;

/// Face rectangle in pixel coordinates of the source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl From<[i32; 4]> for BoundingBox {
    /// Builds a box from `[x, y, width, height]`; negative sizes clamp to 0.
    fn from([x, y, w, h]: [i32; 4]) -> Self {
        Self {
            x,
            y,
            width: w.max(0) as u32,
            height: h.max(0) as u32,
        }
    }
}

/// One detected face.
#[derive(Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    /// JPEG-encoded crop of the face, if the detector produced one.
    pub crop: Option<Vec<u8>>,
}

impl fmt::Debug for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detection")
            .field("bbox", &self.bbox)
            .field("dim", &self.embedding.len())
            .field("crop_bytes", &self.crop.as_ref().map(|c| c.len()))
            .finish()
    }
}

/// A captured frame. `data` is opaque to this crate and only interpreted
/// by the [`FaceDetector`] paired with the [`FrameSource`] that produced it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub captured_at: DateTime<Utc>,
    pub data: Vec<u8>,
}

/// Produces frames until the source is exhausted.
pub trait FrameSource {
    /// Returns the next frame, or `None` at end of stream.
    /// An error means capture failed and no further frames will come.
    fn next_frame(&mut self) -> Result<Option<Frame>, FaceIdError>;
}

/// Finds faces in a frame and computes their embeddings.
pub trait FaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, FaceIdError>;
}

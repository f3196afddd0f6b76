//! Embedding engine
//!
//! - `FaceRecognizer`: the detection / extraction / embedding capability
//! - `WorkerPool`: fixed set of threads, each owning one initialized recognizer
//! - OpenVINO-backed recognizer (SCRFD detector + ArcFace embedder)

pub mod detector;
#[cfg(feature = "openvino")]
pub mod inference;
pub mod pool;
pub mod preprocess;
pub mod worker;

use image::{DynamicImage, GenericImageView};

use crate::error::EmbeddingError;

pub use pool::{Job, JobResult, ResponseSlot, WorkerPool};

#[cfg(feature = "openvino")]
pub use inference::OpenVinoRecognizer;

/// Fixed-length face embedding produced by the model.
pub type EmbeddingVector = Vec<f32>;

/// Pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Face region given by its top-left and bottom-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub top_left: Point,
    pub bottom_right: Point,
}

impl BoundingBox {
    pub fn new(top_left: Point, bottom_right: Point) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    /// Build a box from wire corners, where a missing corner or any zero
    /// coordinate means "no box supplied".
    pub fn from_corners(top_left: Option<Point>, bottom_right: Option<Point>) -> Option<Self> {
        let (top_left, bottom_right) = (top_left?, bottom_right?);
        let sentinel = [top_left.x, top_left.y, bottom_right.x, bottom_right.y]
            .iter()
            .any(|&c| c == 0);
        if sentinel {
            None
        } else {
            Some(Self::new(top_left, bottom_right))
        }
    }

    pub fn width(&self) -> i32 {
        self.bottom_right.x - self.top_left.x
    }

    pub fn height(&self) -> i32 {
        self.bottom_right.y - self.top_left.y
    }

    /// Clamp to the image, failing when nothing of the box remains.
    pub fn clamp_to(&self, image: &DynamicImage) -> Result<(u32, u32, u32, u32), EmbeddingError> {
        let (w, h) = image.dimensions();
        let clamp = |v: i32, max: u32| v.clamp(0, max as i32) as u32;
        let x1 = clamp(self.top_left.x, w);
        let y1 = clamp(self.top_left.y, h);
        let x2 = clamp(self.bottom_right.x, w);
        let y2 = clamp(self.bottom_right.y, h);
        if x2 <= x1 || y2 <= y1 {
            return Err(EmbeddingError::InvalidRegion(format!(
                "top_left({}, {}), bottom_right({}, {}) in {}x{} image",
                self.top_left.x, self.top_left.y, self.bottom_right.x, self.bottom_right.y, w, h
            )));
        }
        Ok((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Face recognition capability owned by one worker.
///
/// Implementations hold expensive model state and are never shared between
/// threads; every method takes `&mut self`.
pub trait FaceRecognizer {
    /// Locate the face to authenticate in the full image.
    fn detect_face(&mut self, image: &DynamicImage) -> Result<BoundingBox, EmbeddingError>;

    /// Cut the face region out of the image.
    fn extract_face(
        &mut self,
        image: &DynamicImage,
        region: &BoundingBox,
    ) -> Result<DynamicImage, EmbeddingError> {
        let (x, y, w, h) = region.clamp_to(image)?;
        Ok(image.crop_imm(x, y, w, h))
    }

    /// Embed an extracted face.
    fn generate_embedding(&mut self, face: &DynamicImage) -> Result<EmbeddingVector, EmbeddingError>;
}

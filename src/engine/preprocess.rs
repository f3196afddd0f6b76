//! Image preprocessing for the detector and embedder models

use image::{imageops, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;

use super::detector::Candidate;
use super::{BoundingBox, Point};

/// Standard input size for face detection (SCRFD)
pub const DETECTOR_INPUT_SIZE: (u32, u32) = (640, 640);

/// Standard input size for face embedding (ArcFace)
pub const EMBEDDER_INPUT_SIZE: (u32, u32) = (112, 112);

/// How an image was scaled and padded into the detector input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub fn new(original: (u32, u32), target: (u32, u32)) -> Self {
        let (orig_w, orig_h) = original;
        let (target_w, target_h) = target;
        let scale = f32::min(
            target_w as f32 / orig_w.max(1) as f32,
            target_h as f32 / orig_h.max(1) as f32,
        );
        let new_w = ((orig_w as f32 * scale) as u32).clamp(1, target_w);
        let new_h = ((orig_h as f32 * scale) as u32).clamp(1, target_h);
        Self {
            scale,
            offset_x: (target_w - new_w) / 2,
            offset_y: (target_h - new_h) / 2,
        }
    }

    /// Map a detector-space point back to the original image.
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }

    /// Map a detection back to an integer box inside an image of `size`.
    pub fn to_original_box(&self, candidate: &Candidate, size: (u32, u32)) -> BoundingBox {
        let (w, h) = (size.0 as f32, size.1 as f32);
        let (x1, y1) = self.to_original(candidate.x1, candidate.y1);
        let (x2, y2) = self.to_original(candidate.x2, candidate.y2);
        BoundingBox::new(
            Point {
                x: x1.clamp(0.0, w).round() as i32,
                y: y1.clamp(0.0, h).round() as i32,
            },
            Point {
                x: x2.clamp(0.0, w).round() as i32,
                y: y2.clamp(0.0, h).round() as i32,
            },
        )
    }
}

/// Resize keeping the aspect ratio and pad with black to `target`.
pub fn letterbox(image: &DynamicImage, target: (u32, u32)) -> (DynamicImage, Letterbox) {
    let layout = Letterbox::new(image.dimensions(), target);
    let new_w = target.0 - 2 * layout.offset_x;
    let new_h = target.1 - 2 * layout.offset_y;
    let resized = image.resize_exact(new_w, new_h, imageops::FilterType::Triangle).to_rgb8();

    let mut canvas = RgbImage::from_pixel(target.0, target.1, Rgb([0, 0, 0]));
    imageops::overlay(&mut canvas, &resized, layout.offset_x as i64, layout.offset_y as i64);
    (DynamicImage::ImageRgb8(canvas), layout)
}

/// NCHW tensor in BGR order, scaled to roughly [-1, 1] as InsightFace models expect.
pub fn to_nchw(image: &DynamicImage) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = (pixel[2] as f32 - 127.5) / 128.0;
        tensor[[0, 1, y, x]] = (pixel[1] as f32 - 127.5) / 128.0;
        tensor[[0, 2, y, x]] = (pixel[0] as f32 - 127.5) / 128.0;
    }

    tensor
}

//! SCRFD output decoding
//!
//! SCRFD emits, per feature-map stride, one score tensor and one box tensor
//! (plus keypoints, which we do not need). Boxes are distances from the anchor
//! center to each side, in units of the stride.

/// A detection in detector input space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// Output arrangement of an SCRFD export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrfdLayout {
    pub strides: &'static [u32],
    pub anchors: usize,
}

impl ScrfdLayout {
    /// Infer the layout from how many output tensors the model has.
    pub fn from_output_count(count: usize) -> Option<Self> {
        const THREE: &[u32] = &[8, 16, 32];
        const FIVE: &[u32] = &[8, 16, 32, 64, 128];
        match count {
            6 | 9 => Some(Self {
                strides: THREE,
                anchors: 2,
            }),
            10 | 15 => Some(Self {
                strides: FIVE,
                anchors: 1,
            }),
            _ => None,
        }
    }
}

/// Turn raw score / box outputs into candidates above `threshold`.
///
/// `outputs` holds every output tensor flattened, in model order: all score
/// tensors first, then all box tensors.
pub fn decode_scrfd(
    outputs: &[Vec<f32>],
    layout: ScrfdLayout,
    input_size: (u32, u32),
    threshold: f32,
) -> Vec<Candidate> {
    let levels = layout.strides.len();
    let anchors = layout.anchors;
    let mut found = Vec::new();

    for (level, &stride) in layout.strides.iter().enumerate() {
        let (Some(scores), Some(boxes)) = (outputs.get(level), outputs.get(level + levels)) else {
            continue;
        };
        let cols = input_size.0 / stride;
        let rows = input_size.1 / stride;
        let stride = stride as f32;

        let centers = (0..rows).flat_map(move |y| {
            (0..cols).flat_map(move |x| {
                std::iter::repeat((x as f32 * stride, y as f32 * stride)).take(anchors)
            })
        });

        for (i, (cx, cy)) in centers.enumerate() {
            let Some(&score) = scores.get(i) else {
                break;
            };
            if score < threshold {
                continue;
            }
            let Some(d) = boxes.get(i * 4..i * 4 + 4) else {
                break;
            };
            found.push(Candidate {
                x1: cx - d[0] * stride,
                y1: cy - d[1] * stride,
                x2: cx + d[2] * stride,
                y2: cy + d[3] * stride,
                score,
            });
        }
    }

    found
}

/// Intersection over union
pub fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let overlap = Candidate {
        x1: a.x1.max(b.x1),
        y1: a.y1.max(b.y1),
        x2: a.x2.min(b.x2),
        y2: a.y2.min(b.y2),
        score: 0.0,
    };
    let intersection = overlap.area();
    let union = a.area() + b.area() - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression. Result is sorted by score, best first.
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

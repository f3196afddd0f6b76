//! OpenVINO face recognizer
//!
//! SCRFD (det_10g) for detection, ArcFace (w600k_r50) for embeddings. Each
//! worker owns one `OpenVinoRecognizer`, so both compiled models and their
//! inference requests live on a single thread.

use std::fmt::Display;
use std::path::Path;
use std::time::Instant;

use image::{imageops, DynamicImage, GenericImageView};
use ndarray::Array4;
use openvino::{CompiledModel, Core, ElementType, InferRequest, Shape, Tensor};
use tracing::{debug, info};

use super::detector::{decode_scrfd, nms, ScrfdLayout};
use super::preprocess::{letterbox, to_nchw, DETECTOR_INPUT_SIZE, EMBEDDER_INPUT_SIZE};
use super::{BoundingBox, EmbeddingVector, FaceRecognizer};
use crate::config::ModelsConfig;
use crate::error::EmbeddingError;
use crate::utils::math::l2_normalize;

const NMS_IOU: f32 = 0.4;
const MAX_OUTPUTS: usize = 20;

fn inference_error(context: &str, e: impl Display) -> EmbeddingError {
    EmbeddingError::Inference(format!("{}: {}", context, e))
}

pub struct OpenVinoRecognizer {
    _core: Core,
    detector: InferRequest,
    /// Known after the first detection run.
    detector_layout: Option<ScrfdLayout>,
    embedder: InferRequest,
    confidence: f32,
}

impl OpenVinoRecognizer {
    /// Read and compile both models for `device`.
    pub fn load(models: &ModelsConfig, device: &str) -> Result<Self, EmbeddingError> {
        let mut core = Core::new().map_err(|e| inference_error("OpenVINO core", e))?;

        let detector = compile(&mut core, &models.detector_path(), device)?
            .create_infer_request()
            .map_err(|e| inference_error("detector request", e))?;
        let embedder = compile(&mut core, &models.embedder_path(), device)?
            .create_infer_request()
            .map_err(|e| inference_error("embedder request", e))?;

        Ok(Self {
            _core: core,
            detector,
            detector_layout: None,
            embedder,
            confidence: models.detection_confidence,
        })
    }

    fn layout(&mut self) -> Result<ScrfdLayout, EmbeddingError> {
        if let Some(layout) = self.detector_layout {
            return Ok(layout);
        }
        let outputs = (0..MAX_OUTPUTS)
            .take_while(|&i| self.detector.get_output_tensor_by_index(i).is_ok())
            .count();
        let layout = ScrfdLayout::from_output_count(outputs).ok_or_else(|| {
            EmbeddingError::Inference(format!("unsupported SCRFD export with {} outputs", outputs))
        })?;
        info!("SCRFD model has {} outputs", outputs);
        self.detector_layout = Some(layout);
        Ok(layout)
    }
}

fn compile(core: &mut Core, path: &Path, device: &str) -> Result<CompiledModel, EmbeddingError> {
    let path = path.to_string_lossy();
    info!("Loading model from {}", path);
    let start = Instant::now();
    let model = core
        .read_model_from_file(&path, "")
        .map_err(|e| inference_error(&path, e))?;
    let compiled = core
        .compile_model(&model, device.into())
        .map_err(|e| inference_error(&path, e))?;
    info!("Model {} compiled for {} in {:?}", path, device, start.elapsed());
    Ok(compiled)
}

/// Feed one NCHW tensor and run the request.
fn run(request: &mut InferRequest, input: &Array4<f32>) -> Result<(), EmbeddingError> {
    let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
    let shape = Shape::new(&dims).map_err(|e| inference_error("input shape", e))?;
    let mut tensor =
        Tensor::new(ElementType::F32, &shape).map_err(|e| inference_error("input tensor", e))?;

    let data = tensor
        .get_data_mut::<f32>()
        .map_err(|e| inference_error("input tensor", e))?;
    for (dst, src) in data.iter_mut().zip(input.iter()) {
        *dst = *src;
    }

    request
        .set_input_tensor(&tensor)
        .map_err(|e| inference_error("set input", e))?;
    request.infer().map_err(|e| inference_error("infer", e))
}

fn read_output(request: &InferRequest, index: usize) -> Result<Vec<f32>, EmbeddingError> {
    let tensor = request
        .get_output_tensor_by_index(index)
        .map_err(|e| inference_error("output tensor", e))?;
    let data = tensor
        .get_data::<f32>()
        .map_err(|e| inference_error("output tensor", e))?;
    Ok(data.to_vec())
}

impl FaceRecognizer for OpenVinoRecognizer {
    fn detect_face(&mut self, image: &DynamicImage) -> Result<BoundingBox, EmbeddingError> {
        let (padded, layout) = letterbox(image, DETECTOR_INPUT_SIZE);
        run(&mut self.detector, &to_nchw(&padded))?;
        let detector_layout = self.layout()?;

        // Scores and boxes only; keypoint outputs are ignored.
        let wanted = detector_layout.strides.len() * 2;
        let outputs = (0..wanted)
            .map(|i| read_output(&self.detector, i))
            .collect::<Result<Vec<_>, _>>()?;

        let candidates = decode_scrfd(&outputs, detector_layout, DETECTOR_INPUT_SIZE, self.confidence);
        let kept = nms(candidates, NMS_IOU);
        debug!("Detected {} faces after NMS", kept.len());

        let best = kept.first().ok_or(EmbeddingError::NoFace)?;
        let region = layout.to_original_box(best, image.dimensions());
        if region.width() <= 0 || region.height() <= 0 {
            return Err(EmbeddingError::NoFace);
        }
        Ok(region)
    }

    fn generate_embedding(&mut self, face: &DynamicImage) -> Result<EmbeddingVector, EmbeddingError> {
        let (w, h) = EMBEDDER_INPUT_SIZE;
        let resized = face.resize_exact(w, h, imageops::FilterType::Lanczos3);
        run(&mut self.embedder, &to_nchw(&resized))?;

        let mut vector = read_output(&self.embedder, 0)?;
        if vector.is_empty() {
            return Err(EmbeddingError::Inference("embedder returned no output".to_string()));
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

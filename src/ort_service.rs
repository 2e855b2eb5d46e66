use crate::{
    config::{Backend, ModelConfig, ModelSource, OutputNames},
    detection::{BoundingBox, Detection, DetectionResult},
    labels::LabelTable,
    model_service::{DetectError, Detector, LoadError, ModelLoader},
    runtime::execution_providers,
    tensor::{PixelTensor, Size},
};
use async_trait::async_trait;
use ndarray::Axis;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{Arc, Mutex};

/// Post-processing thresholds applied to raw SSD outputs.
#[derive(Debug, Clone, Copy)]
pub struct DecodeSettings {
    pub min_score: f32,
    pub max_boxes: usize,
    pub iou_threshold: f32,
}

impl From<&ModelConfig> for DecodeSettings {
    fn from(model_config: &ModelConfig) -> Self {
        Self {
            min_score: model_config.min_score,
            max_boxes: model_config.max_boxes,
            iou_threshold: model_config.iou_threshold,
        }
    }
}

/// Flattened outputs of an SSD graph for a batch of one.
#[derive(Debug, Default)]
pub(crate) struct SsdOutputs {
    /// `[ymin, xmin, ymax, xmax]` per detection, normalised to `[0, 1]`.
    pub(crate) boxes: Vec<f32>,
    pub(crate) classes: Vec<f32>,
    pub(crate) scores: Vec<f32>,
    pub(crate) num_detections: usize,
}

/// Converts raw SSD outputs into pixel-space detections for a tensor of
/// `size`.
///
/// Results come back in descending confidence, which is the order SSD graphs
/// already emit them in, so model output order is kept for well-formed
/// outputs.
pub(crate) fn decode_ssd_outputs(
    raw: &SsdOutputs,
    size: Size,
    labels: &LabelTable,
    settings: &DecodeSettings,
) -> Vec<Detection> {
    let count = raw
        .num_detections
        .min(raw.scores.len())
        .min(raw.classes.len())
        .min(raw.boxes.len() / 4);
    let width = size.width as f32;
    let height = size.height as f32;

    let mut detections = Vec::with_capacity(count);
    for index in 0..count {
        let score = raw.scores[index];
        if score < settings.min_score {
            continue;
        }

        let ymin = raw.boxes[4 * index].clamp(0.0, 1.0);
        let xmin = raw.boxes[4 * index + 1].clamp(0.0, 1.0);
        let ymax = raw.boxes[4 * index + 2].clamp(0.0, 1.0);
        let xmax = raw.boxes[4 * index + 3].clamp(0.0, 1.0);
        let class_id = raw.classes[index] as u32;

        tracing::trace!(
            "det class {} with score {} at {},{} - {},{}",
            class_id,
            score,
            xmin,
            ymin,
            xmax,
            ymax
        );

        detections.push(Detection {
            class_id,
            label: labels.label(class_id),
            confidence: score,
            bbox: BoundingBox::new(
                xmin * width,
                ymin * height,
                (xmax - xmin) * width,
                (ymax - ymin) * height,
            ),
        });
    }

    non_max_suppression(detections, settings.iou_threshold, settings.max_boxes)
}

fn non_max_suppression(
    mut boxes: Vec<Detection>,
    iou_threshold: f32,
    max_boxes: usize,
) -> Vec<Detection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() && result.len() < max_boxes {
        let best = boxes.remove(0);
        boxes.retain(|other| best.bbox.iou(&other.bbox) < iou_threshold);
        result.push(best);
    }

    result
}

fn build_session(
    source: &ModelSource,
    backend: Backend,
    num_threads: Option<usize>,
) -> Result<Session, ort::Error> {
    let mut builder = Session::builder()?
        .with_execution_providers(execution_providers(backend))?
        .with_optimization_level(GraphOptimizationLevel::Level3)?;
    if let Some(threads) = num_threads {
        builder = builder.with_intra_threads(threads)?;
    }

    match source {
        ModelSource::File(path) => builder.commit_from_file(path),
        ModelSource::Url(url) => builder.commit_from_url(url),
    }
}

#[derive(Clone)]
pub struct OrtModelLoader {
    model_config: ModelConfig,
    labels: Arc<LabelTable>,
}

impl OrtModelLoader {
    pub fn new(model_config: &ModelConfig, labels: Arc<LabelTable>) -> Self {
        Self {
            model_config: model_config.clone(),
            labels,
        }
    }
}

#[async_trait]
impl ModelLoader for OrtModelLoader {
    type Detector = OrtDetector;

    async fn load(&self, backend: Backend) -> Result<OrtDetector, LoadError> {
        let source = self.model_config.source();
        let num_threads = self.model_config.num_threads;
        tracing::info!("Loading model from {:?}", source);

        let session = tokio::task::spawn_blocking(move || {
            build_session(&source, backend, num_threads)
        })
        .await
        .map_err(|e| LoadError::Task(e.to_string()))??;

        tracing::info!("Created ONNX session on {} backend", backend.as_str());

        Ok(OrtDetector {
            session: Mutex::new(session),
            labels: self.labels.clone(),
            outputs: self.model_config.outputs.clone(),
            settings: DecodeSettings::from(&self.model_config),
            input_size: self.model_config.input_size,
        })
    }
}

pub struct OrtDetector {
    session: Mutex<Session>,
    labels: Arc<LabelTable>,
    outputs: OutputNames,
    settings: DecodeSettings,
    input_size: Option<Size>,
}

impl OrtDetector {
    fn run_inference(&self, tensor: &PixelTensor<u8>) -> Result<SsdOutputs, DetectError> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| DetectError::Inference(format!("session mutex poisoned: {}", e)))?;

        let batched = tensor.view().insert_axis(Axis(0));
        let owned_buffer;
        let input_view = if batched.is_standard_layout() {
            batched
        } else {
            owned_buffer = batched.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| DetectError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectError::Inference(e.to_string()))?;

        let extract = |name: &str| -> Result<Vec<f32>, DetectError> {
            let value = outputs
                .get(name)
                .ok_or_else(|| DetectError::MissingOutput(name.to_string()))?;
            let (_, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::MalformedOutput(format!("{}: {}", name, e)))?;
            Ok(data.to_vec())
        };

        let boxes = extract(&self.outputs.boxes)?;
        let classes = extract(&self.outputs.classes)?;
        let scores = extract(&self.outputs.scores)?;
        let num_detections = extract(&self.outputs.num_detections)?
            .first()
            .map(|n| *n as usize)
            .unwrap_or(scores.len());

        if boxes.len() % 4 != 0 {
            return Err(DetectError::MalformedOutput(format!(
                "{} holds {} values, expected a multiple of 4",
                self.outputs.boxes,
                boxes.len()
            )));
        }

        Ok(SsdOutputs {
            boxes,
            classes,
            scores,
            num_detections,
        })
    }
}

#[async_trait]
impl Detector for OrtDetector {
    async fn detect(&self, tensor: &PixelTensor<u8>) -> Result<DetectionResult, DetectError> {
        let size = tensor.size();
        if let Some(expected) = self.input_size {
            if expected != size {
                return Err(DetectError::ShapeMismatch {
                    expected,
                    actual: size,
                });
            }
        }

        let raw = self.run_inference(tensor)?;
        let detections = decode_ssd_outputs(&raw, size, &self.labels, &self.settings);

        tracing::debug!("Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: label={}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.label,
                detection.confidence,
                detection.bbox.x,
                detection.bbox.y,
                detection.bbox.width,
                detection.bbox.height
            );
        }

        Ok(DetectionResult::new(detections))
    }
}

impl Drop for OrtDetector {
    fn drop(&mut self) {
        tracing::debug!("Disposing detector session");
    }
}

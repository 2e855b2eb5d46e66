use async_trait::async_trait;
use thiserror::Error;

use crate::{
    config::Backend,
    detection::DetectionResult,
    tensor::{PixelTensor, Size},
};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to build inference session: {0}")]
    Session(#[from] ort::Error),
    #[error("Failed to load labels: {0}")]
    Labels(#[from] std::io::Error),
    #[error("Model loader task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Input tensor is {actual}, detector expects {expected}")]
    ShapeMismatch { expected: Size, actual: Size },
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Model output `{0}` is missing")]
    MissingOutput(String),
    #[error("Model output is malformed: {0}")]
    MalformedOutput(String),
}

/// Handle to a loaded object-detection model.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    /// Runs inference without mutating `tensor`.
    async fn detect(&self, tensor: &PixelTensor<u8>) -> Result<DetectionResult, DetectError>;
}

/// Fetches pretrained weights and instantiates a [`Detector`].
#[async_trait]
pub trait ModelLoader: Send + Sync {
    type Detector: Detector;

    async fn load(&self, backend: Backend) -> Result<Self::Detector, LoadError>;
}

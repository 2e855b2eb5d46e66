//! Load -> detect -> render orchestration.
//!
//! The pipeline is a single sequential async chain with four suspension
//! points: runtime readiness, model load, asset fetch and inference. Each
//! stage reports a typed error which is recorded as `Failed { stage, .. }`
//! instead of being swallowed. Tensors are released as soon as the next
//! stage no longer needs them; error paths release them on drop.

use std::sync::Arc;

use crate::{
    config::ImageConfig,
    detection::DetectionResult,
    labels::LabelTable,
    model_service::{Detector, ModelLoader},
    preprocess::{cast_to_int, decode, load_asset, resize},
    render::{render, Canvas},
    runtime::Runtime,
    state::{PipelineState, Stage, StateMachine},
    tensor::TensorLedger,
};

#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    cause: String,
}

fn fail<E: std::fmt::Display>(stage: Stage) -> impl FnOnce(E) -> StageFailure {
    move |err| StageFailure {
        stage,
        cause: err.to_string(),
    }
}

pub struct Pipeline<R: Runtime, L: ModelLoader> {
    runtime: R,
    loader: L,
    image_config: ImageConfig,
    labels: Arc<LabelTable>,
    ledger: TensorLedger,
    state: StateMachine,
}

impl<R: Runtime, L: ModelLoader> Pipeline<R, L> {
    pub fn new(
        runtime: R,
        loader: L,
        image_config: &ImageConfig,
        labels: Arc<LabelTable>,
        ledger: TensorLedger,
    ) -> Self {
        Self {
            runtime,
            loader,
            image_config: image_config.clone(),
            labels,
            ledger,
            state: StateMachine::new(),
        }
    }

    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    pub fn ledger(&self) -> &TensorLedger {
        &self.ledger
    }

    /// Runs the pipeline once and returns the terminal state.
    ///
    /// A pipeline that has already left `Idle` does nothing and returns its
    /// current state.
    pub async fn run<C: Canvas>(&mut self, canvas: &mut C) -> PipelineState {
        if self.state.current() != PipelineState::Idle {
            tracing::warn!("Pipeline already ran, keeping {:?}", self.state.kind());
            return self.state.current();
        }

        let next = match self.execute(canvas).await {
            Ok(result) => {
                tracing::info!("Detected {} objects: {}", result.len(), result.summarize());
                PipelineState::Done { result }
            }
            Err(failure) => {
                tracing::error!("Pipeline failed during {}: {}", failure.stage, failure.cause);
                PipelineState::Failed {
                    stage: failure.stage,
                    cause: failure.cause,
                }
            }
        };

        if let Err(e) = self.state.transition(next) {
            tracing::error!("{}", e);
        }
        if self.ledger.live() != 0 {
            tracing::warn!("{} tensors still alive after run", self.ledger.live());
        }
        self.state.current()
    }

    async fn execute<C: Canvas>(&mut self, canvas: &mut C) -> Result<DetectionResult, StageFailure> {
        self.state
            .transition(PipelineState::ModelLoading)
            .map_err(fail(Stage::Runtime))?;

        let backend = self.runtime.ready().await.map_err(fail(Stage::Runtime))?;
        let detector = self
            .loader
            .load(backend)
            .await
            .map_err(fail(Stage::ModelLoad))?;

        self.state
            .transition(PipelineState::Detecting)
            .map_err(fail(Stage::AssetFetch))?;

        let bytes = load_asset(&self.image_config.asset_path)
            .await
            .map_err(fail(Stage::AssetFetch))?;
        let decoded = decode(&bytes, &self.ledger).map_err(fail(Stage::Decode))?;

        let input = match self.image_config.resize {
            Some(target) => {
                let resized =
                    resize(&decoded, target, &self.ledger).map_err(fail(Stage::Preprocess))?;
                decoded.release();
                let cast = cast_to_int(&resized, &self.ledger);
                resized.release();
                cast
            }
            None => decoded,
        };

        let tensor_size = input.size();
        let result = detector
            .detect(&input)
            .await
            .map_err(fail(Stage::Inference))?;
        input.release();
        drop(detector);

        render(&result, canvas, tensor_size, &self.labels);
        Ok(result)
    }
}

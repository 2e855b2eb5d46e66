use crate::{
    config::Config,
    labels::LabelTable,
    ort_service::OrtModelLoader,
    pipeline::Pipeline,
    render::ImageCanvas,
    runtime::OrtRuntime,
    state::PipelineState,
    tensor::TensorLedger,
};

use std::{error::Error, sync::Arc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Detection(String),
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let labels = match LabelTable::from_config(config.labels.as_ref()) {
        Ok(labels) => Arc::new(labels),
        Err(e) => {
            tracing::error!("Failed to load labels: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let asset = match tokio::fs::read(&config.image.asset_path).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!(
                "Asset {:?} unreadable ({}), drawing on a blank canvas",
                config.image.asset_path,
                e
            );
            None
        }
    };
    let mut canvas = ImageCanvas::from_config(asset.as_deref(), &config.render)?;

    let runtime = OrtRuntime::new(&config.runtime);
    let loader = OrtModelLoader::new(&config.model, labels.clone());
    let mut pipeline = Pipeline::new(runtime, loader, &config.image, labels, TensorLedger::new());

    let mut status = pipeline.state().subscribe();
    // The watch channel keeps only the latest state, so quick successive
    // states may be skipped here; the full history is logged after the run.
    let status_handle = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let state = status.borrow_and_update().clone();
            println!("{}", state.status_text());
            if state.is_terminal() {
                break;
            }
        }
    });

    let state = pipeline.run(&mut canvas).await;
    tracing::info!("State history: {:?}", pipeline.state().history());

    drop(pipeline);
    if let Err(e) = status_handle.await {
        tracing::warn!("Status printer task failed: {:?}", e);
    }

    match state {
        PipelineState::Done { .. } => {
            canvas.save(&config.render.output_path, config.render.overlay_path.as_deref())?;
            Ok(())
        }
        other => Err(Box::new(AppError::Detection(other.status_text()))),
    }
}

use async_trait::async_trait;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use thiserror::Error;

use crate::config::{Backend, RuntimeConfig};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("Execution provider `{}` is not available on this host", .0.as_str())]
    Unavailable(Backend),
}

/// Readies the numerical backend before any tensor or model operation.
#[async_trait]
pub trait Runtime: Send + Sync {
    async fn ready(&self) -> Result<Backend, RuntimeError>;
}

#[derive(Debug, Clone)]
pub struct OrtRuntime {
    backend: Backend,
}

impl OrtRuntime {
    pub fn new(runtime_config: &RuntimeConfig) -> Self {
        Self {
            backend: runtime_config.backend,
        }
    }
}

#[async_trait]
impl Runtime for OrtRuntime {
    async fn ready(&self) -> Result<Backend, RuntimeError> {
        let available = match self.backend {
            Backend::Cpu => true,
            Backend::Cuda => CUDAExecutionProvider::default().is_available()?,
            Backend::TensorRt => TensorRTExecutionProvider::default().is_available()?,
        };
        if !available {
            tracing::error!("Execution provider {} unavailable", self.backend.as_str());
            return Err(RuntimeError::Unavailable(self.backend));
        }

        tracing::info!("Runtime ready on {} backend", self.backend.as_str());
        Ok(self.backend)
    }
}

/// Providers registered on every session. Registration failures are fatal.
pub fn execution_providers(backend: Backend) -> Vec<ExecutionProviderDispatch> {
    match backend {
        Backend::Cpu => vec![CPUExecutionProvider::default().build()],
        Backend::Cuda => vec![CUDAExecutionProvider::default().build().error_on_failure()],
        Backend::TensorRt => vec![TensorRTExecutionProvider::default()
            .with_engine_cache(true)
            .build()
            .error_on_failure()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cpu_backend_is_always_ready() {
        let runtime = OrtRuntime::new(&RuntimeConfig::default());
        assert_eq!(runtime.ready().await.unwrap(), Backend::Cpu);
    }

    #[test]
    fn test_one_provider_per_backend() {
        assert_eq!(execution_providers(Backend::Cpu).len(), 1);
        assert_eq!(execution_providers(Backend::TensorRt).len(), 1);
    }
}

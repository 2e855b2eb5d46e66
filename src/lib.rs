pub mod app;
pub mod config;
pub mod detection;
pub mod labels;
pub mod model_service;
pub mod ort_service;
pub mod pipeline;
pub mod preprocess;
pub mod render;
pub mod runtime;
pub mod state;
pub mod tensor;

pub use app::start_app;

use serde::Deserialize;
use std::path::PathBuf;

use crate::tensor::Size;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub labels: Option<LabelsConfig>,
    pub image: ImageConfig,
    pub render: RenderConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

fn deserialize_backend<'de, D>(deserializer: D) -> Result<Backend, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

pub trait Validatable {
    fn get_path(&self) -> PathBuf;

    fn validate(&self) -> Result<(), String> {
        if !self.get_path().exists() {
            return Err(format!("File not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RuntimeConfig {
    #[serde(default, deserialize_with = "deserialize_backend")]
    pub backend: Backend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_max_boxes")]
    pub max_boxes: usize,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default)]
    pub num_threads: Option<usize>,
    #[serde(default)]
    pub input_size: Option<Size>,
    #[serde(default)]
    pub outputs: OutputNames,
}

fn default_min_score() -> f32 {
    0.5
}

fn default_max_boxes() -> usize {
    20
}

fn default_iou_threshold() -> f32 {
    0.5
}

/// Where the pretrained weights come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    File(PathBuf),
    Url(String),
}

impl ModelConfig {
    pub fn source(&self) -> ModelSource {
        match &self.url {
            Some(url) => ModelSource::Url(url.clone()),
            None => ModelSource::File(self.get_path()),
        }
    }
}

impl Validatable for ModelConfig {
    fn get_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(format!("min_score must be within [0, 1], got {}", self.min_score));
        }
        if self.url.is_none() && !self.get_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_path()));
        }
        Ok(())
    }
}

/// Tensor names of an SSD-style detection graph.
#[derive(Debug, Deserialize, Clone)]
pub struct OutputNames {
    pub boxes: String,
    pub classes: String,
    pub scores: String,
    pub num_detections: String,
}

impl Default for OutputNames {
    fn default() -> Self {
        Self {
            boxes: "detection_boxes:0".to_string(),
            classes: "detection_classes:0".to_string(),
            scores: "detection_scores:0".to_string(),
            num_detections: "num_detections:0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelsConfig {
    pub labels_file: String,
    pub labels_dir: PathBuf,
}

impl Validatable for LabelsConfig {
    fn get_path(&self) -> PathBuf {
        self.labels_dir.join(&self.labels_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageConfig {
    pub asset_path: PathBuf,
    #[serde(default = "default_target_size")]
    pub resize: Option<Size>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    pub output_path: PathBuf,
    #[serde(default)]
    pub overlay_path: Option<PathBuf>,
    pub font_path: PathBuf,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default = "default_line_width")]
    pub line_width: u32,
    #[serde(default = "default_target_size")]
    pub display: Option<Size>,
}

fn default_target_size() -> Option<Size> {
    Some(Size::new(300, 300))
}

fn default_font_size() -> f32 {
    16.0
}

fn default_line_width() -> u32 {
    2
}

/// ONNX Runtime execution provider selected at start-up.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    #[default]
    Cpu,
    Cuda,
    TensorRt,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Cpu => "cpu",
            Backend::Cuda => "cuda",
            Backend::TensorRt => "tensorrt",
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "tensorrt" => Ok(Self::TensorRt),
            other => Err(format!(
                "{} is not a supported backend. Use either `cpu`, `cuda` or `tensorrt`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().map_err(|e| {
        config::ConfigError::Message(format!("Failed to determine the current directory: {}", e))
    })?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    let validation = config.model.validate().and_then(|_| match &config.labels {
        Some(labels) => labels.validate(),
        None => Ok(()),
    });
    if let Err(e) = validation {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_config(url: Option<&str>) -> ModelConfig {
        ModelConfig {
            model_dir: PathBuf::from("./models"),
            onnx_file: "ssd_mobilenet_v1.onnx".to_string(),
            url: url.map(str::to_string),
            min_score: default_min_score(),
            max_boxes: default_max_boxes(),
            iou_threshold: default_iou_threshold(),
            num_threads: None,
            input_size: None,
            outputs: OutputNames::default(),
        }
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!(Backend::try_from("CPU".to_string()), Ok(Backend::Cpu));
        assert_eq!(Backend::try_from("tensorrt".to_string()), Ok(Backend::TensorRt));
        assert!(Backend::try_from("metal".to_string()).is_err());
    }

    #[test]
    fn test_log_level_parsing() {
        assert!(matches!(LogLevel::try_from("Debug".to_string()), Ok(LogLevel::Debug)));
        assert!(LogLevel::try_from("trace".to_string()).is_err());
    }

    #[test]
    fn test_model_source_prefers_url() {
        let local = model_config(None);
        assert_eq!(
            local.source(),
            ModelSource::File(PathBuf::from("./models/ssd_mobilenet_v1.onnx"))
        );

        let remote = model_config(Some("https://example.com/ssd.onnx"));
        assert_eq!(
            remote.source(),
            ModelSource::Url("https://example.com/ssd.onnx".to_string())
        );
        assert!(remote.validate().is_ok());
    }

    #[test]
    fn test_missing_model_file_fails_validation() {
        let mut config = model_config(None);
        config.model_dir = PathBuf::from("./does_not_exist");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_score_out_of_range_fails_validation() {
        let mut config = model_config(Some("https://example.com/ssd.onnx"));
        config.min_score = 1.5;
        assert!(config.validate().is_err());
    }
}

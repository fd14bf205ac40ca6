use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub alert: Option<AlertConfig>,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigValidationError {
    #[error("Model file not found: {0:?}")]
    ModelNotFound(PathBuf),
    #[error("min_confidence must be strictly between 0 and 1, got {0}")]
    MinConfidenceOutOfRange(f32),
    #[error("nms_iou_threshold must be within (0, 1], got {0}")]
    NmsThresholdOutOfRange(f32),
    #[error("jpeg_quality must be within 1..=100, got {0}")]
    JpegQualityOutOfRange(i32),
}

pub trait Validatable {
    fn validate(&self) -> Result<(), ConfigValidationError>;
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: i32,
    /// Play a recorded video instead of a capture device.
    #[serde(default)]
    pub video_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Faces within ~2 meters of the camera.
    ShortRange,
    /// Faces within ~5 meters of the camera.
    FullRange,
}

#[derive(Clone, Deserialize, Debug)]
pub struct DetectorConfig {
    pub model_dir: PathBuf,
    #[serde(default = "default_model_variant")]
    pub model_variant: ModelVariant,
    #[serde(default = "default_short_range_file")]
    pub short_range_file: String,
    #[serde(default = "default_full_range_file")]
    pub full_range_file: String,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_nms_iou_threshold")]
    pub nms_iou_threshold: f32,
}

fn default_model_variant() -> ModelVariant {
    ModelVariant::ShortRange
}

fn default_short_range_file() -> String {
    "blazeface_short_range.onnx".into()
}

fn default_full_range_file() -> String {
    "blazeface_full_range.onnx".into()
}

fn default_min_confidence() -> f32 {
    0.5
}

fn default_nms_iou_threshold() -> f32 {
    0.3
}

impl DetectorConfig {
    pub fn get_model_path(&self) -> PathBuf {
        match self.model_variant {
            ModelVariant::ShortRange => self.model_dir.join(&self.short_range_file),
            ModelVariant::FullRange => self.model_dir.join(&self.full_range_file),
        }
    }

    fn validate_thresholds(&self) -> Result<(), ConfigValidationError> {
        if !(self.min_confidence > 0.0 && self.min_confidence < 1.0) {
            return Err(ConfigValidationError::MinConfidenceOutOfRange(
                self.min_confidence,
            ));
        }
        if !(self.nms_iou_threshold > 0.0 && self.nms_iou_threshold <= 1.0) {
            return Err(ConfigValidationError::NmsThresholdOutOfRange(
                self.nms_iou_threshold,
            ));
        }
        Ok(())
    }
}

impl Validatable for DetectorConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        self.validate_thresholds()?;
        let path = self.get_model_path();
        if !path.exists() {
            return Err(ConfigValidationError::ModelNotFound(path));
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct EncoderConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
}

fn default_jpeg_quality() -> i32 {
    95
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Validatable for EncoderConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigValidationError::JpegQualityOutOfRange(
                self.jpeg_quality,
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct AlertConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    #[serde(default = "default_alert_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub send_test_on_startup: bool,
    #[serde(default)]
    pub test_destination: Option<String>,
}

fn default_alert_api_base() -> String {
    "https://api.twilio.com".into()
}

impl AlertConfig {
    pub fn get_messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        )
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
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("current directory: {}", e)))?;
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
            config::Environment::with_prefix("FS")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    for result in [config.detector.validate(), config.encoder.validate()] {
        if let Err(e) = result {
            tracing::error!("Configuration validation failed: {}", e);
            return Err(config::ConfigError::Message(e.to_string()));
        }
    }

    Ok(config)
}

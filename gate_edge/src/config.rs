use crate::gate::GateMode;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub validation: ValidationConfig,
    pub crop: CropConfig,
    pub enhancement: EnhancementConfig,
    pub recognition: RecognitionConfig,
    pub gate: GateConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

fn deserialize_gate_mode<'de, D>(deserializer: D) -> Result<GateMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    pub index: i32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_frame_skip")]
    pub process_every_n_frames: u64,
}

fn default_frame_skip() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    Ort,
    Dnn,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    pub backend: DetectorBackend,
    pub model_path: PathBuf,
    #[serde(default = "default_input_size")]
    pub input_size: i32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn default_input_size() -> i32 {
    640
}

fn default_confidence_threshold() -> f32 {
    0.4
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.model_path.exists() {
            return Err(format!("model file not found: {:?}", self.model_path));
        }
        Ok(())
    }
}

/// Geometric priors used to reject detector false positives.
#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    #[serde(default = "default_min_aspect_ratio")]
    pub min_aspect_ratio: f32,
    #[serde(default = "default_max_aspect_ratio")]
    pub max_aspect_ratio: f32,
    #[serde(default = "default_min_plate_width")]
    pub min_width: f32,
    #[serde(default = "default_min_plate_height")]
    pub min_height: f32,
}

fn default_min_aspect_ratio() -> f32 {
    3.5
}

fn default_max_aspect_ratio() -> f32 {
    7.0
}

fn default_min_plate_width() -> f32 {
    50.0
}

fn default_min_plate_height() -> f32 {
    10.0
}

/// Padding and legibility floor applied when extracting the plate region.
#[derive(Debug, Deserialize, Clone)]
pub struct CropConfig {
    #[serde(default = "default_padding_ratio")]
    pub padding_ratio: f32,
    #[serde(default = "default_floor_width")]
    pub min_width: i32,
    #[serde(default = "default_floor_height")]
    pub min_height: i32,
}

fn default_padding_ratio() -> f32 {
    0.15
}

fn default_floor_width() -> i32 {
    100
}

fn default_floor_height() -> i32 {
    32
}

/// Knobs of the OCR enhancement pipeline. The stage order and the sharpen
/// kernel are fixed; the recognition model was tuned against this exact
/// output, so only the values below are safe to adjust per site.
#[derive(Debug, Deserialize, Clone)]
pub struct EnhancementConfig {
    #[serde(default = "default_target_height")]
    pub target_height: i32,
    #[serde(default = "default_threshold_window")]
    pub threshold_window: i32,
    #[serde(default = "default_threshold_bias")]
    pub threshold_bias: f64,
}

fn default_target_height() -> i32 {
    64
}

fn default_threshold_window() -> i32 {
    11
}

fn default_threshold_bias() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecognitionConfig {
    pub url: String,
    #[serde(default = "default_recognition_timeout_secs")]
    pub timeout_secs: u64,
    pub lot_id: u32,
}

fn default_recognition_timeout_secs() -> u64 {
    10
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    #[serde(deserialize_with = "deserialize_gate_mode")]
    pub mode: GateMode,
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
    #[serde(default)]
    pub gpio_enabled: bool,
    #[serde(default = "default_relay_line")]
    pub relay_line: u32,
}

fn default_open_duration_secs() -> u64 {
    5
}

fn default_relay_line() -> u32 {
    17
}

impl GateConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration_secs)
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
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("EDGE")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    if let Err(e) = config.detector.validate() {
        tracing::error!("Configuration validation failed: {}", e);
        return Err(config::ConfigError::Message(e));
    }

    Ok(config)
}

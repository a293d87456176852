//! Application configuration options

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::DeployError;
use crate::inference::model::ModelArtifacts;
use crate::models::deployment::{DeploymentConfig, DeploymentType, InputType, VideoSourceType};
use crate::mqtt::topics::MqttTopics;
use crate::storage::layout::StorageLayout;
use crate::workers::mqtt;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Project output directories
    pub layout: StorageLayout,

    /// Model to deploy
    pub model: ModelOptions,

    /// Initial deployment configuration
    pub deployment: DeploymentConfig,

    /// Frame source selection
    pub source: SourceOptions,

    /// Enable the MQTT control plane
    pub enable_mqtt_worker: bool,

    /// MQTT worker options
    pub mqtt_worker: mqtt::Options,

    pub topics: MqttTopics,

    /// Shared QoS level for every topic
    pub qos: u8,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout: StorageLayout::default(),
            model: ModelOptions::default(),
            deployment: DeploymentConfig::default(),
            source: SourceOptions::default(),
            enable_mqtt_worker: true,
            mqtt_worker: mqtt::Options::default(),
            topics: MqttTopics::default(),
            qos: 1,
        }
    }
}

/// Lifecycle options for the runtime
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Keep running after the frame source is exhausted, until a signal
    pub is_persistent: bool,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            is_persistent: false,
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Model to deploy
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub task: DeploymentType,
    pub artifacts: ModelArtifacts,
    /// Class names in output order; read from the label map when empty
    pub class_names: Vec<String>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            task: DeploymentType::ObjectDetection,
            artifacts: ModelArtifacts::default(),
            class_names: Vec::new(),
        }
    }
}

/// Which frame source to deploy over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceChoice {
    Camera,
    /// Uploaded video file
    Video(PathBuf),
    /// Directory of uploaded images
    Images(PathBuf),
    Mqtt,
}

impl SourceChoice {
    /// Source implied by the deployment configuration
    pub fn from_config(config: &DeploymentConfig) -> Option<Self> {
        match (config.input_type, config.video_type) {
            (InputType::Video, VideoSourceType::Camera) => Some(SourceChoice::Camera),
            (_, VideoSourceType::Mqtt) => Some(SourceChoice::Mqtt),
            _ => None,
        }
    }
}

impl FromStr for SourceChoice {
    type Err = DeployError;

    /// Parses `camera` and `mqtt`; file sources need a path and are built
    /// from `--video=` / `--images=`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "camera" => Ok(SourceChoice::Camera),
            "mqtt" => Ok(SourceChoice::Mqtt),
            other => Err(DeployError::ConfigError(format!(
                "Unknown source '{}', expected camera or mqtt",
                other
            ))),
        }
    }
}

/// Frame source options
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// `None` falls back to the deployment configuration
    pub choice: Option<SourceChoice>,

    /// Delete an uploaded video once it has been processed
    pub delete_uploaded_video: bool,

    /// How long to wait for a camera's first frame
    pub camera_open_timeout: Duration,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            choice: None,
            delete_uploaded_video: false,
            camera_open_timeout: Duration::from_secs(10),
        }
    }
}

impl SourceOptions {
    pub fn resolve(&self, config: &DeploymentConfig) -> Result<SourceChoice, DeployError> {
        self.choice
            .clone()
            .or_else(|| SourceChoice::from_config(config))
            .ok_or_else(|| {
                DeployError::ConfigError(
                    "No frame source: pass --video=<file>, --images=<dir> or --source=camera|mqtt"
                        .to_string(),
                )
            })
    }
}

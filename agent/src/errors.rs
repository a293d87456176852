//! Error types for the deployment runtime

use thiserror::Error;

/// Main error type for the deployment runtime
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("MQTT error: {0}")]
    MqttError(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Camera error: {0}")]
    CameraError(String),

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Resource error: {0}")]
    ResourceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid transition: {0}")]
    TransitionError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether the error only spoils the current frame.
    ///
    /// The deployment loop logs and skips transient errors; anything else
    /// ends the session.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeployError::InferenceError(_) | DeployError::ImageError(_) | DeployError::VideoError(_)
        )
    }
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}

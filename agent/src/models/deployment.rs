//! Deployment models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::utils::parse_timezone;

/// Computer-vision task a deployment serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    ImageClassification,
    ObjectDetection,
    InstanceSegmentation,
    SemanticSegmentation,
}

impl DeploymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentType::ImageClassification => "image_classification",
            DeploymentType::ObjectDetection => "object_detection",
            DeploymentType::InstanceSegmentation => "instance_segmentation",
            DeploymentType::SemanticSegmentation => "semantic_segmentation",
        }
    }

    /// Whether results carry a `classes_found` list instead of per-entity names
    pub fn is_segmentation(&self) -> bool {
        matches!(
            self,
            DeploymentType::InstanceSegmentation | DeploymentType::SemanticSegmentation
        )
    }
}

impl fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentType {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace([' ', '-'], "_").as_str() {
            "image_classification" | "classification" => Ok(DeploymentType::ImageClassification),
            "object_detection" | "detection" | "object_detection_with_bounding_boxes" => {
                Ok(DeploymentType::ObjectDetection)
            }
            "instance_segmentation" | "semantic_segmentation_with_masks" => {
                Ok(DeploymentType::InstanceSegmentation)
            }
            "semantic_segmentation" | "segmentation" | "semantic_segmentation_with_polygons" => {
                Ok(DeploymentType::SemanticSegmentation)
            }
            _ => Err(DeployError::ValidationError(format!(
                "Unknown deployment type: {}",
                s
            ))),
        }
    }
}

/// Whether the session processes still images or a continuous video
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Image,
    Video,
}

/// Where video frames come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSourceType {
    #[default]
    Uploaded,
    Camera,
    Mqtt,
}

/// Camera identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CameraSource {
    /// Local USB camera by device index (`/dev/video<index>`)
    Usb { index: u32 },

    /// Network camera serving JPEG snapshots over HTTP
    Ip { address: String },
}

impl Default for CameraSource {
    fn default() -> Self {
        CameraSource::Usb { index: 0 }
    }
}

impl fmt::Display for CameraSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraSource::Usb { index } => write!(f, "USB camera {}", index),
            CameraSource::Ip { address } => write!(f, "IP camera {}", address),
        }
    }
}

/// Container used when recording output frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    /// Concatenated JPEG frames (`.mjpeg`)
    #[default]
    Mjpeg,

    /// Animated GIF (`.gif`)
    Gif,
}

impl RecordingFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RecordingFormat::Mjpeg => "mjpeg",
            RecordingFormat::Gif => "gif",
        }
    }
}

/// Configuration snapshot for a single deployment session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// IANA timezone used for result timestamps and CSV date partitions
    pub timezone: String,

    pub input_type: InputType,

    pub video_type: VideoSourceType,

    pub camera: CameraSource,

    /// Camera title attached to every result as its `view`
    pub camera_title: String,

    /// Width of frames for display purposes
    pub display_width: u32,

    /// Days a CSV log directory is kept
    pub retention_period: u32,

    /// Publish inference results over MQTT
    pub publishing: bool,

    /// Publish encoded output frames over MQTT
    pub publish_frame: bool,

    /// Detection score threshold for results and drawing
    pub confidence_threshold: f32,

    /// Leave background pixels untouched when blending segmentation masks
    pub ignore_background: bool,

    /// Annotate output frames with predictions
    pub draw_result: bool,

    /// Include normalized box corners in detection results
    pub include_bbox: bool,

    pub recording_format: RecordingFormat,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Singapore".to_string(),
            input_type: InputType::Image,
            video_type: VideoSourceType::Uploaded,
            camera: CameraSource::default(),
            camera_title: String::new(),
            display_width: 640,
            retention_period: 7,
            publishing: true,
            publish_frame: false,
            confidence_threshold: 0.7,
            ignore_background: false,
            draw_result: true,
            include_bbox: false,
            recording_format: RecordingFormat::Mjpeg,
        }
    }
}

impl DeploymentConfig {
    /// Check the invariants every accepted configuration must hold
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.retention_period < 1 {
            return Err(DeployError::ValidationError(
                "Retention period must be at least 1 day".to_string(),
            ));
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(DeployError::ValidationError(format!(
                "Confidence threshold must be within (0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.display_width == 0 {
            return Err(DeployError::ValidationError(
                "Display width must be positive".to_string(),
            ));
        }
        if let CameraSource::Ip { address } = &self.camera {
            if address.trim().is_empty() {
                return Err(DeployError::ValidationError(
                    "IP camera address cannot be empty".to_string(),
                ));
            }
        }
        parse_timezone(&self.timezone)?;
        Ok(())
    }

    /// Retention period from a day/week/month form, as the config screen takes it
    pub fn retention_from_parts(days: u32, weeks: u32, months: u32) -> u32 {
        days + 7 * weeks + 30 * months
    }
}

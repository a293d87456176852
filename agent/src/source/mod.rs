//! Frame sources feeding the deployment loop

pub mod camera;
pub mod file;
pub mod images;
pub mod mqtt;

use std::fmt;

use async_trait::async_trait;
use image::RgbImage;

use crate::errors::DeployError;

/// Result of asking a source for its next frame
#[derive(Debug)]
pub enum FrameEvent {
    Frame(RgbImage),
    /// The source is exhausted
    EndOfStream,
    /// A blocking wait observed the cancellation flag
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Camera,
    VideoFile,
    ImageFiles,
    Mqtt,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Camera => "camera",
            SourceKind::VideoFile => "video file",
            SourceKind::ImageFiles => "image files",
            SourceKind::Mqtt => "MQTT",
        };
        f.write_str(name)
    }
}

/// A source of frames owned by the deployment loop
#[async_trait]
pub trait FrameSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Next frame. Errors for which [`DeployError::is_transient`] holds
    /// spoil only the current frame.
    async fn next_frame(&mut self) -> Result<FrameEvent, DeployError>;

    /// Release devices, decoders and temporary files. Safe to call more
    /// than once; later calls do nothing.
    async fn release(&mut self) -> Result<(), DeployError>;
}

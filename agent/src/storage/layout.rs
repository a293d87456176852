//! Project storage layout

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;

/// Output directories under a project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    /// Project root supplied by the project subsystem
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Dated CSV result directories
    pub fn results_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployment_results"))
    }

    /// Recorded output videos
    pub fn recordings_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("video-recordings"))
    }

    /// Frames saved on failed label checks
    pub fn ng_images_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("NG-images"))
    }

    /// Frames saved on request
    pub fn saved_frames_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("saved-frames"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create every output directory
    pub async fn setup(&self) -> Result<(), DeployError> {
        self.results_dir().create().await?;
        self.recordings_dir().create().await?;
        self.ng_images_dir().create().await?;
        self.saved_frames_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(".")
    }
}

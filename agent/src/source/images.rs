//! Still image source: each uploaded image is processed once

use std::collections::VecDeque;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::source::{FrameEvent, FrameSource, SourceKind};

pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];

pub struct ImageFiles {
    pending: VecDeque<PathBuf>,
    current: Option<PathBuf>,
}

impl ImageFiles {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            pending: paths.into_iter().collect(),
            current: None,
        }
    }

    /// All images in a directory, in name order
    pub async fn from_dir(dir: &Dir) -> Result<Self, DeployError> {
        let paths = dir.list_files_with_extensions(&IMAGE_EXTENSIONS).await?;
        if paths.is_empty() {
            return Err(DeployError::NotFound(format!(
                "No images in {}",
                dir.path().display()
            )));
        }
        info!("Found {} image(s) in {}", paths.len(), dir.path().display());
        Ok(Self::new(paths))
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Image most recently handed out
    pub fn current(&self) -> Option<&PathBuf> {
        self.current.as_ref()
    }
}

#[async_trait]
impl FrameSource for ImageFiles {
    fn kind(&self) -> SourceKind {
        SourceKind::ImageFiles
    }

    async fn next_frame(&mut self) -> Result<FrameEvent, DeployError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(FrameEvent::EndOfStream);
        };
        debug!("Loading image {}", path.display());
        let bytes = File::new(&path).read_bytes().await?;
        self.current = Some(path);
        let image = image::load_from_memory(&bytes)?;
        Ok(FrameEvent::Frame(image.to_rgb8()))
    }

    async fn release(&mut self) -> Result<(), DeployError> {
        self.pending.clear();
        self.current = None;
        Ok(())
    }
}

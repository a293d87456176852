//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::DeployError;

/// A file wrapper with path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>, DeployError> {
        Ok(fs::read(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DeployError> {
        let contents = fs::read_to_string(&self.path).await.map_err(|e| {
            DeployError::IoError(std::io::Error::new(
                e.kind(),
                format!("{}: {}", self.path.display(), e),
            ))
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write bytes, creating parent directories as needed
    pub async fn write_bytes(&self, contents: &[u8]) -> Result<(), DeployError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Delete the file. Returns whether a file was removed.
    pub async fn delete(&self) -> Result<bool, DeployError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

//! Uploaded video file source
//!
//! Frames are decoded on a dedicated thread and handed over through a small
//! bounded channel. Supported containers are animated GIF and Motion-JPEG
//! (concatenated JPEG images).

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, RgbImage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::source::{FrameEvent, FrameSource, SourceKind};

const DECODE_QUEUE: usize = 4;

/// Container of an uploaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoContainer {
    Gif,
    Mjpeg,
}

impl VideoContainer {
    /// Detect the container from the file's magic bytes
    pub fn detect(path: &Path) -> Result<Self, DeployError> {
        let mut head = [0u8; 4];
        let read = {
            use std::io::Read;
            fs::File::open(path)?.read(&mut head)?
        };
        match &head[..read] {
            [b'G', b'I', b'F', b'8', ..] => Ok(VideoContainer::Gif),
            [0xFF, 0xD8, ..] => Ok(VideoContainer::Mjpeg),
            _ => Err(DeployError::VideoError(format!(
                "Unsupported video container: {}",
                path.display()
            ))),
        }
    }
}

/// Split a Motion-JPEG byte stream into individual JPEG images
pub fn split_mjpeg(data: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    let mut start = None;
    let mut i = 0;
    while i + 1 < data.len() {
        match (data[i], data[i + 1], start) {
            (0xFF, 0xD8, None) => {
                start = Some(i);
                i += 2;
            }
            (0xFF, 0xD9, Some(s)) => {
                frames.push(&data[s..i + 2]);
                start = None;
                i += 2;
            }
            _ => i += 1,
        }
    }
    frames
}

type Decoded = Result<RgbImage, DeployError>;

fn decode_gif(path: &Path, tx: &mpsc::Sender<Decoded>) -> Result<(), DeployError> {
    let decoder = GifDecoder::new(BufReader::new(fs::File::open(path)?))?;
    for frame in decoder.into_frames() {
        let frame = frame
            .map(|f| DynamicImage::ImageRgba8(f.into_buffer()).to_rgb8())
            .map_err(|e| DeployError::VideoError(e.to_string()));
        if tx.blocking_send(frame).is_err() {
            break;
        }
    }
    Ok(())
}

fn decode_mjpeg(path: &Path, tx: &mpsc::Sender<Decoded>) -> Result<(), DeployError> {
    let data = fs::read(path)?;
    for jpeg in split_mjpeg(&data) {
        let frame = image::load_from_memory(jpeg)
            .map(|img| img.to_rgb8())
            .map_err(|e| DeployError::VideoError(e.to_string()));
        if tx.blocking_send(frame).is_err() {
            break;
        }
    }
    Ok(())
}

pub struct VideoFile {
    path: PathBuf,
    frames: Option<mpsc::Receiver<Decoded>>,
    decoder: Option<JoinHandle<()>>,
    /// Uploaded copy deleted on release
    temp_file: Option<File>,
    decoded: u64,
}

impl VideoFile {
    /// Open a video file. With `delete_on_release` the file is treated as
    /// a temporary upload and removed when the source is released.
    pub fn open(path: impl Into<PathBuf>, delete_on_release: bool) -> Result<Self, DeployError> {
        let path = path.into();
        let container = VideoContainer::detect(&path)?;
        let (tx, rx) = mpsc::channel(DECODE_QUEUE);

        let decoder = {
            let path = path.clone();
            thread::Builder::new()
                .name("video-decoder".to_string())
                .spawn(move || {
                    let result = match container {
                        VideoContainer::Gif => decode_gif(&path, &tx),
                        VideoContainer::Mjpeg => decode_mjpeg(&path, &tx),
                    };
                    if let Err(e) = result {
                        let _ = tx.blocking_send(Err(e));
                    }
                })?
        };

        info!("Opened {:?} video {}", container, path.display());
        Ok(Self {
            temp_file: delete_on_release.then(|| File::new(&path)),
            path,
            frames: Some(rx),
            decoder: Some(decoder),
            decoded: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames handed out so far
    pub fn decoded(&self) -> u64 {
        self.decoded
    }
}

#[async_trait]
impl FrameSource for VideoFile {
    fn kind(&self) -> SourceKind {
        SourceKind::VideoFile
    }

    async fn next_frame(&mut self) -> Result<FrameEvent, DeployError> {
        let Some(frames) = self.frames.as_mut() else {
            return Ok(FrameEvent::EndOfStream);
        };
        match frames.recv().await {
            Some(Ok(frame)) => {
                self.decoded += 1;
                Ok(FrameEvent::Frame(frame))
            }
            Some(Err(e)) => Err(e),
            None => {
                debug!("Decoded all {} frames of {}", self.decoded, self.path.display());
                Ok(FrameEvent::EndOfStream)
            }
        }
    }

    async fn release(&mut self) -> Result<(), DeployError> {
        // closing the channel stops the decoder at its next send
        if let Some(mut frames) = self.frames.take() {
            frames.close();
        }
        let mut result = Ok(());

        if let Some(decoder) = self.decoder.take() {
            let joined = tokio::task::spawn_blocking(move || decoder.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Video decoder for {} did not exit cleanly", self.path.display());
            }
        }

        if let Some(file) = self.temp_file.take() {
            match file.delete().await {
                Ok(true) => info!("Deleted temporary video {}", file.path().display()),
                Ok(false) => debug!("Temporary video {} already gone", file.path().display()),
                Err(e) => result = Err(e),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::frames::encode_jpeg;
    use image::Rgb;

    fn write_mjpeg(path: &Path, frames: usize) {
        let mut data = Vec::new();
        for i in 0..frames {
            data.extend(encode_jpeg(&RgbImage::from_pixel(8, 8, Rgb([i as u8 * 40, 0, 0]))).unwrap());
        }
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_split_mjpeg() {
        let data = [0x00, 0xFF, 0xD8, 0x01, 0xFF, 0xD9, 0xFF, 0xD8, 0xFF, 0xD9, 0x42];
        let frames = split_mjpeg(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], &[0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
    }

    #[test]
    fn test_detect_rejects_unknown_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        fs::write(&path, b"RIFF....AVI ").unwrap();
        assert!(VideoContainer::detect(&path).is_err());
    }

    #[tokio::test]
    async fn test_mjpeg_frames_then_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.mjpeg");
        write_mjpeg(&path, 3);

        let mut video = VideoFile::open(&path, true).unwrap();
        for _ in 0..3 {
            assert!(matches!(video.next_frame().await.unwrap(), FrameEvent::Frame(_)));
        }
        assert!(matches!(video.next_frame().await.unwrap(), FrameEvent::EndOfStream));
        assert_eq!(video.decoded(), 3);

        video.release().await.unwrap();
        assert!(!path.exists());
        video.release().await.unwrap();
    }
}

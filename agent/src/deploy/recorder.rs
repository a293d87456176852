//! Output video recording

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::{Delay, DynamicImage, Frame, RgbImage};
use tracing::info;

use crate::errors::DeployError;
use crate::models::deployment::RecordingFormat;

/// Nominal frame rate written to recordings
pub const RECORDING_FPS: u32 = 24;

const JPEG_QUALITY: u8 = 85;

enum Sink {
    Mjpeg(BufWriter<fs::File>),
    Gif(GifEncoder<BufWriter<fs::File>>),
}

/// Writes frames to `video_<stamp>.<ext>`; the container is fixed at creation
pub struct Recorder {
    path: PathBuf,
    format: RecordingFormat,
    frames: u64,
    sink: Sink,
}

impl Recorder {
    pub fn create(dir: &Path, format: RecordingFormat, stamp: &str) -> Result<Self, DeployError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("video_{}.{}", stamp, format.extension()));
        let writer = BufWriter::new(fs::File::create(&path)?);

        let sink = match format {
            RecordingFormat::Mjpeg => Sink::Mjpeg(writer),
            RecordingFormat::Gif => {
                let mut encoder = GifEncoder::new(writer);
                encoder.set_repeat(Repeat::Infinite)?;
                Sink::Gif(encoder)
            }
        };

        info!("Recording {:?} video to {}", format, path.display());
        Ok(Self {
            path,
            format,
            frames: 0,
            sink,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> RecordingFormat {
        self.format
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn write_frame(&mut self, frame: &RgbImage) -> Result<(), DeployError> {
        match &mut self.sink {
            Sink::Mjpeg(writer) => {
                frame.write_with_encoder(JpegEncoder::new_with_quality(writer, JPEG_QUALITY))?;
            }
            Sink::Gif(encoder) => {
                let rgba = DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
                let delay = Delay::from_numer_denom_ms(1000, RECORDING_FPS);
                encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
            }
        }
        self.frames += 1;
        Ok(())
    }

    /// Flush and close the file, returning its path
    pub fn finish(self) -> Result<PathBuf, DeployError> {
        match self.sink {
            Sink::Mjpeg(mut writer) => writer.flush()?,
            // the GIF trailer is written when the encoder drops
            Sink::Gif(encoder) => drop(encoder),
        }
        info!("Saved recording with {} frames at {}", self.frames, self.path.display());
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_mjpeg_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::create(dir.path(), RecordingFormat::Mjpeg, "stamp").unwrap();
        let frame = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        recorder.write_frame(&frame).unwrap();
        recorder.write_frame(&frame).unwrap();
        assert_eq!(recorder.frames(), 2);

        let path = recorder.finish().unwrap();
        assert_eq!(path.file_name().unwrap(), "video_stamp.mjpeg");
        let bytes = fs::read(&path).unwrap();
        let starts = bytes.windows(2).filter(|w| *w == [0xFF, 0xD8]).count();
        assert!(starts >= 2);
    }

    #[test]
    fn test_gif_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::create(dir.path(), RecordingFormat::Gif, "g").unwrap();
        recorder.write_frame(&RgbImage::new(4, 4)).unwrap();
        let path = recorder.finish().unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..3], b"GIF");
    }
}

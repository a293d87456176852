//! Camera interface

use std::path::PathBuf;
use std::time::Duration;

use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::deployment::CameraSource;

/// A camera that hands out decoded frames. Reads block until a frame is
/// available, so devices are driven from a dedicated reader thread.
pub trait CameraDevice {
    fn read_frame(&mut self) -> Result<RgbImage, DeployError>;

    fn describe(&self) -> String;
}

/// Open the device behind a camera source
pub fn open_device(source: &CameraSource) -> Result<Box<dyn CameraDevice>, DeployError> {
    match source {
        CameraSource::Ip { address } => Ok(Box::new(IpCamera::open(address)?)),
        CameraSource::Usb { index } => open_usb(*index),
    }
}

#[cfg(feature = "hardware")]
fn open_usb(index: u32) -> Result<Box<dyn CameraDevice>, DeployError> {
    Ok(Box::new(v4l_camera::UsbCamera::open(index)?))
}

#[cfg(not(feature = "hardware"))]
fn open_usb(index: u32) -> Result<Box<dyn CameraDevice>, DeployError> {
    Err(DeployError::CameraError(format!(
        "USB camera {} requires the `hardware` feature",
        index
    )))
}

// ================================ IP CAMERA ===================================== //

/// Network camera polled for JPEG snapshots
pub struct IpCamera {
    url: url::Url,
    client: reqwest::blocking::Client,
}

impl IpCamera {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn open(address: &str) -> Result<Self, DeployError> {
        let url = url::Url::parse(address.trim())
            .map_err(|e| DeployError::CameraError(format!("Invalid camera address '{}': {}", address, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeployError::CameraError(format!(
                "Unsupported camera URL scheme '{}'",
                url.scheme()
            )));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeployError::CameraError(e.to_string()))?;

        Ok(Self { url, client })
    }
}

impl CameraDevice for IpCamera {
    fn read_frame(&mut self) -> Result<RgbImage, DeployError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| DeployError::CameraError(format!("{}: {}", self.url, e)))?;
        let bytes = response
            .bytes()
            .map_err(|e| DeployError::CameraError(e.to_string()))?;
        debug!("Snapshot of {} bytes from {}", bytes.len(), self.url);
        Ok(image::load_from_memory(&bytes)?.to_rgb8())
    }

    fn describe(&self) -> String {
        format!("IP camera {}", self.url)
    }
}

// ================================ USB CAMERA ==================================== //

#[cfg(feature = "hardware")]
mod v4l_camera {
    use image::RgbImage;
    use tracing::info;
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    use super::CameraDevice;
    use crate::errors::DeployError;

    const BUFFER_COUNT: u32 = 4;

    pub struct UsbCamera {
        index: u32,
        fourcc: FourCC,
        width: u32,
        height: u32,
        stream: Stream<'static>,
    }

    fn camera_err(index: u32, e: std::io::Error) -> DeployError {
        DeployError::CameraError(format!("/dev/video{}: {}", index, e))
    }

    impl UsbCamera {
        pub fn open(index: u32) -> Result<Self, DeployError> {
            let device = Device::new(index as usize).map_err(|e| camera_err(index, e))?;

            let mut format = device.format().map_err(|e| camera_err(index, e))?;
            format.fourcc = FourCC::new(b"MJPG");
            let format = device.set_format(&format).map_err(|e| camera_err(index, e))?;

            let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|e| camera_err(index, e))?;

            info!(
                "Opened /dev/video{} at {}x{} ({})",
                index, format.width, format.height, format.fourcc
            );
            Ok(Self {
                index,
                fourcc: format.fourcc,
                width: format.width,
                height: format.height,
                stream,
            })
        }
    }

    impl CameraDevice for UsbCamera {
        fn read_frame(&mut self) -> Result<RgbImage, DeployError> {
            let (buf, meta) = self.stream.next().map_err(|e| camera_err(self.index, e))?;
            let data = &buf[..(meta.bytesused as usize).min(buf.len())];

            match &self.fourcc.repr {
                b"MJPG" => Ok(image::load_from_memory(data)?.to_rgb8()),
                b"RGB3" => RgbImage::from_raw(self.width, self.height, data.to_vec()).ok_or_else(
                    || DeployError::CameraError("Short RGB frame from camera".to_string()),
                ),
                b"YUYV" => Ok(yuyv_to_rgb(data, self.width, self.height)),
                other => Err(DeployError::CameraError(format!(
                    "Unsupported pixel format {}",
                    String::from_utf8_lossy(other)
                ))),
            }
        }

        fn describe(&self) -> String {
            format!("USB camera /dev/video{}", self.index)
        }
    }

    fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> RgbImage {
        let mut image = RgbImage::new(width, height);
        let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
        for (i, chunk) in data.chunks_exact(4).enumerate() {
            let (y0, u, y1, v) = (chunk[0] as f32, chunk[1] as f32 - 128.0, chunk[2] as f32, chunk[3] as f32 - 128.0);
            for (j, y) in [y0, y1].into_iter().enumerate() {
                let px = (i * 2 + j) as u32;
                let (x, row) = (px % width, px / width);
                if row >= height {
                    return image;
                }
                image.put_pixel(
                    x,
                    row,
                    image::Rgb([
                        clamp(y + 1.402 * v),
                        clamp(y - 0.344 * u - 0.714 * v),
                        clamp(y + 1.772 * u),
                    ]),
                );
            }
        }
        image
    }
}

// ================================ DISCOVERY ===================================== //

/// A video capture device node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraInfo {
    pub index: u32,
    pub path: PathBuf,
}

/// List available camera devices, ordered by index
pub fn list_cameras() -> Vec<CameraInfo> {
    let mut cameras: Vec<CameraInfo> = match std::fs::read_dir("/dev") {
        Ok(entries) => entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let index = name.to_str()?.strip_prefix("video")?.parse().ok()?;
                Some(CameraInfo {
                    index,
                    path: entry.path(),
                })
            })
            .collect(),
        Err(e) => {
            debug!("Cannot scan /dev for cameras: {}", e);
            Vec::new()
        }
    };

    cameras.sort_by_key(|c| c.index);
    info!("Found {} camera device(s)", cameras.len());
    cameras
}

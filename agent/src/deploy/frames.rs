//! Frame encoding and persistence

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

const JPEG_QUALITY: u8 = 90;

/// Encode a frame as JPEG bytes, as published on the frame topic
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>, DeployError> {
    let mut bytes = Vec::new();
    frame.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))?;
    Ok(bytes)
}

/// Encode a frame as PNG bytes
pub fn encode_png(frame: &RgbImage) -> Result<Vec<u8>, DeployError> {
    let mut cursor = Cursor::new(Vec::new());
    frame.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

/// Save a frame as `<prefix>_<stamp>.png` (or `<stamp>.png`) inside `dir`
pub async fn save_frame(
    dir: &Dir,
    prefix: Option<&str>,
    stamp: &str,
    frame: &RgbImage,
) -> Result<File, DeployError> {
    let name = match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}_{}.png", sanitize(prefix), stamp),
        _ => format!("{}.png", stamp),
    };
    let file = dir.file(&name);
    file.write_bytes(&encode_png(frame)?).await?;
    Ok(file)
}

// Keeps view names usable as file name prefixes
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

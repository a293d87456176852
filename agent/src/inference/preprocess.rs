//! Classification preprocessing

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

const CAFFE_BGR_MEAN: [f32; 3] = [103.939, 116.779, 123.68];
const TORCH_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const TORCH_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pixel normalization expected by a classification architecture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preprocess {
    /// Raw `0..=255` values
    #[default]
    None,

    /// Scale to `[-1, 1]`
    Tf,

    /// BGR order with ImageNet mean subtracted, no scaling
    Caffe,

    /// Scale to `[0, 1]` then ImageNet mean/std normalization
    Torch,
}

impl Preprocess {
    /// Pick the normalization from an architecture name such as `ResNet50`
    pub fn for_architecture(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.starts_with("mobilenet")
            || name.starts_with("inception")
            || name.starts_with("xception")
            || name.starts_with("nasnet")
        {
            Preprocess::Tf
        } else if name.starts_with("vgg") || name.starts_with("resnet") {
            // resnetv2 variants use tf mode
            if name.contains("v2") {
                Preprocess::Tf
            } else {
                Preprocess::Caffe
            }
        } else if name.starts_with("densenet") {
            Preprocess::Torch
        } else {
            Preprocess::None
        }
    }

    fn apply(&self, rgb: [f32; 3]) -> [f32; 3] {
        match self {
            Preprocess::None => rgb,
            Preprocess::Tf => rgb.map(|v| v / 127.5 - 1.0),
            Preprocess::Caffe => {
                let [r, g, b] = rgb;
                [
                    b - CAFFE_BGR_MEAN[0],
                    g - CAFFE_BGR_MEAN[1],
                    r - CAFFE_BGR_MEAN[2],
                ]
            }
            Preprocess::Torch => {
                let mut out = [0.0; 3];
                for c in 0..3 {
                    out[c] = (rgb[c] / 255.0 - TORCH_MEAN[c]) / TORCH_STD[c];
                }
                out
            }
        }
    }
}

/// Resize `image` to `size` (when given) and build a `(1, h, w, 3)` tensor
pub fn to_tensor(image: &RgbImage, size: Option<(u32, u32)>, preprocess: Preprocess) -> Array4<f32> {
    let resized;
    let image = match size {
        Some((w, h)) if (w, h) != image.dimensions() => {
            resized = imageops::resize(image, w, h, FilterType::Triangle);
            &resized
        }
        _ => image,
    };

    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, height as usize, width as usize, 3));
    for (x, y, pixel) in image.enumerate_pixels() {
        let values = preprocess.apply(pixel.0.map(f32::from));
        for (c, v) in values.into_iter().enumerate() {
            tensor[[0, y as usize, x as usize, c]] = v;
        }
    }
    tensor
}

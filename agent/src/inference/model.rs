//! Model abstraction
//!
//! A model is an opaque artifact exposing a single inference call. Backends
//! implement [`Model`] and are produced by a [`ModelLoader`].

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbImage;
use ndarray::{Array2, Array3, Array4};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::models::deployment::DeploymentType;

/// Normalized box corners, each within `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Pixel rectangle `(x, y, width, height)` inside a `width` x `height` frame
    pub fn to_pixels(&self, width: u32, height: u32) -> (i32, i32, u32, u32) {
        let clamp = |v: f32| v.clamp(0.0, 1.0);
        let x0 = (clamp(self.xmin) * width as f32).round() as i32;
        let y0 = (clamp(self.ymin) * height as f32).round() as i32;
        let x1 = (clamp(self.xmax) * width as f32).round() as i32;
        let y1 = (clamp(self.ymax) * height as f32).round() as i32;
        let w = (x1 - x0).max(1) as u32;
        let h = (y1 - y0).max(1) as u32;
        (x0, y0, w, h)
    }
}

/// One raw detection as returned by a detector
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    pub score: f32,
}

/// Input handed to a model
pub enum ModelInput<'a> {
    /// Preprocessed float tensor in NHWC layout
    Tensor(Array4<f32>),

    /// The raw frame; detectors do their own resizing
    Image(&'a RgbImage),
}

/// Raw model output
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// Per-class probabilities for a single image
    Probabilities(Vec<f32>),

    /// Detector output, in descending score order
    Detections(Vec<RawDetection>),

    /// Class index per pixel, shape `(height, width)`
    ClassMask(Array2<u32>),

    /// Class scores per pixel, shape `(height, width, classes)`
    PixelScores(Array3<f32>),
}

/// A loaded model
pub trait Model: Send + Sync {
    /// Run a single inference call
    fn predict(&self, input: ModelInput<'_>) -> Result<ModelOutput, DeployError>;

    /// Expected `(width, height)` of the input tensor, if fixed
    fn input_size(&self) -> Option<(u32, u32)> {
        None
    }

    /// Architecture name embedded in the artifact, if any
    fn architecture(&self) -> Option<String> {
        None
    }
}

/// Where a model and its metadata live on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelArtifacts {
    /// Directory holding the exported or uploaded model
    pub model_dir: PathBuf,

    /// Explicit model file; searched for in `model_dir` when absent
    pub model_file: Option<PathBuf>,

    /// `.pbtxt` label map; searched for in `model_dir` when absent
    pub labelmap_file: Option<PathBuf>,

    /// Architecture name used to pick classification preprocessing
    pub architecture: Option<String>,

    /// TrueType/OpenType font used for box labels
    pub font_file: Option<PathBuf>,

    /// Whether the model was uploaded rather than trained in-app
    pub is_uploaded: bool,
}

impl ModelArtifacts {
    /// Locate the first file under `model_dir` with the given extension
    pub fn find_file(&self, extension: &str) -> Option<PathBuf> {
        find_with_extension(&self.model_dir, extension)
    }

    /// The label map path, explicit or discovered
    pub fn labelmap_path(&self) -> Option<PathBuf> {
        self.labelmap_file
            .clone()
            .or_else(|| self.find_file("pbtxt"))
    }
}

fn find_with_extension(dir: &std::path::Path, extension: &str) -> Option<PathBuf> {
    let mut entries: Vec<_> = std::fs::read_dir(dir).ok()?.flatten().map(|e| e.path()).collect();
    entries.sort();
    for path in &entries {
        if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
            return Some(path.clone());
        }
    }
    entries
        .iter()
        .filter(|p| p.is_dir())
        .find_map(|p| find_with_extension(p, extension))
}

/// Loads models for a task type
pub trait ModelLoader: Send + Sync {
    fn load(
        &self,
        task: DeploymentType,
        artifacts: &ModelArtifacts,
    ) -> Result<Arc<dyn Model>, DeployError>;
}

/// Loader used when no inference backend is compiled in
pub struct UnavailableLoader;

impl ModelLoader for UnavailableLoader {
    fn load(
        &self,
        task: DeploymentType,
        artifacts: &ModelArtifacts,
    ) -> Result<Arc<dyn Model>, DeployError> {
        Err(DeployError::ModelError(format!(
            "No inference backend available to load the {} model at {}; rebuild with the `onnx` feature",
            task,
            artifacts.model_dir.display()
        )))
    }
}

/// The loader matching the compiled-in backend
pub fn default_loader() -> Arc<dyn ModelLoader> {
    #[cfg(feature = "onnx")]
    {
        Arc::new(crate::inference::onnx::OnnxLoader::default())
    }

    #[cfg(not(feature = "onnx"))]
    {
        Arc::new(UnavailableLoader)
    }
}

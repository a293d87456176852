//! ONNX Runtime backend

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use image::RgbImage;
use ndarray::{Array3, Array4, ArrayViewD, Axis, Ix3, Ix4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionOutputs};
use ort::value::{Tensor, ValueType};
use tracing::info;

use crate::errors::DeployError;
use crate::inference::model::{
    BoundingBox, Model, ModelArtifacts, ModelInput, ModelLoader, ModelOutput, RawDetection,
};
use crate::models::deployment::DeploymentType;

/// Loads `*.onnx` models with ONNX Runtime
#[derive(Debug, Clone, Default)]
pub struct OnnxLoader {
    /// Intra-op threads; ONNX Runtime picks when `None`
    pub intra_threads: Option<usize>,
}

impl ModelLoader for OnnxLoader {
    fn load(
        &self,
        task: DeploymentType,
        artifacts: &ModelArtifacts,
    ) -> Result<Arc<dyn Model>, DeployError> {
        let path: PathBuf = artifacts
            .model_file
            .clone()
            .or_else(|| artifacts.find_file("onnx"))
            .ok_or_else(|| {
                DeployError::NotFound(format!(
                    "No .onnx model under {}",
                    artifacts.model_dir.display()
                ))
            })?;

        info!("Loading ONNX model from {}", path.display());
        let mut builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(model_error)?;
        if let Some(threads) = self.intra_threads {
            builder = builder.with_intra_threads(threads).map_err(model_error)?;
        }
        let session = builder.commit_from_file(&path).map_err(model_error)?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| DeployError::ModelError("Model has no inputs".to_string()))?;
        let input_name = input.name.clone();
        let dims: Vec<i64> = match &input.input_type {
            ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
            _ => Vec::new(),
        };

        // NCHW when the channel axis comes first
        let channels_first = dims.len() == 4 && dims[1] == 3 && dims[3] != 3;
        let (h, w) = if channels_first {
            (dims[2], dims[3])
        } else if dims.len() == 4 {
            (dims[1], dims[2])
        } else {
            (-1, -1)
        };
        let input_size = (h > 0 && w > 0).then_some((w as u32, h as u32));

        Ok(Arc::new(OnnxModel {
            session: Mutex::new(session),
            task,
            input_name,
            input_size,
            channels_first,
        }))
    }
}

/// A model backed by an ONNX Runtime session
pub struct OnnxModel {
    session: Mutex<Session>,
    task: DeploymentType,
    input_name: String,
    input_size: Option<(u32, u32)>,
    channels_first: bool,
}

impl Model for OnnxModel {
    fn predict(&self, input: ModelInput<'_>) -> Result<ModelOutput, DeployError> {
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        match input {
            ModelInput::Tensor(tensor) => {
                let tensor = if self.channels_first {
                    tensor.permuted_axes([0, 3, 1, 2]).as_standard_layout().to_owned()
                } else {
                    tensor
                };
                let value = Tensor::from_array(tensor).map_err(inference_error)?;
                let outputs = session
                    .run(ort::inputs![self.input_name.as_str() => value])
                    .map_err(inference_error)?;
                match self.task {
                    DeploymentType::ImageClassification => {
                        let scores = first_f32(&outputs)?;
                        Ok(ModelOutput::Probabilities(scores.iter().copied().collect()))
                    }
                    _ => {
                        let scores = first_f32(&outputs)?;
                        Ok(ModelOutput::PixelScores(pixel_scores(scores)?))
                    }
                }
            }
            ModelInput::Image(frame) => {
                let value = Tensor::from_array(image_tensor(frame)).map_err(inference_error)?;
                let outputs = session
                    .run(ort::inputs![self.input_name.as_str() => value])
                    .map_err(inference_error)?;
                Ok(ModelOutput::Detections(detections(&outputs)?))
            }
        }
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        self.input_size
    }
}

fn image_tensor(frame: &RgbImage) -> Array4<u8> {
    let (w, h) = frame.dimensions();
    Array4::from_shape_vec((1, h as usize, w as usize, 3), frame.as_raw().clone())
        .unwrap_or_else(|_| Array4::zeros((1, h as usize, w as usize, 3)))
}

fn first_f32<'a>(outputs: &'a SessionOutputs<'_>) -> Result<ArrayViewD<'a, f32>, DeployError> {
    let (_, value) = outputs
        .iter()
        .next()
        .ok_or_else(|| DeployError::InferenceError("Model produced no outputs".to_string()))?;
    value.try_extract_array::<f32>().map_err(inference_error)
}

// Accepts (1, h, w, c) or (1, c, h, w) and returns (h, w, c)
fn pixel_scores(scores: ArrayViewD<'_, f32>) -> Result<Array3<f32>, DeployError> {
    let scores = scores
        .into_dimensionality::<Ix4>()
        .map_err(|e| DeployError::InferenceError(format!("Unexpected mask shape: {}", e)))?
        .index_axis_move(Axis(0), 0);
    let (a, _, c) = scores.dim();
    let scores = if a < c {
        scores.permuted_axes([1, 2, 0])
    } else {
        scores
    };
    Ok(scores.into_dimensionality::<Ix3>().map_err(|e| {
        DeployError::InferenceError(format!("Unexpected mask shape: {}", e))
    })?.to_owned())
}

fn detections(outputs: &SessionOutputs<'_>) -> Result<Vec<RawDetection>, DeployError> {
    let get = |name: &str| -> Result<ArrayViewD<'_, f32>, DeployError> {
        outputs
            .get(name)
            .ok_or_else(|| DeployError::InferenceError(format!("Missing output {}", name)))?
            .try_extract_array::<f32>()
            .map_err(inference_error)
    };
    let boxes = get("detection_boxes")?;
    let classes = get("detection_classes")?;
    let scores = get("detection_scores")?;

    let boxes: Vec<f32> = boxes.iter().copied().collect();
    let mut result: Vec<RawDetection> = scores
        .iter()
        .zip(classes.iter())
        .zip(boxes.chunks_exact(4))
        .map(|((&score, &class), b)| RawDetection {
            // TF object detection order: ymin, xmin, ymax, xmax
            bbox: BoundingBox::new(b[1], b[0], b[3], b[2]),
            class_id: class.max(0.0) as u32,
            score,
        })
        .collect();
    result.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(result)
}

fn model_error(e: ort::Error) -> DeployError {
    DeployError::ModelError(e.to_string())
}

fn inference_error(e: ort::Error) -> DeployError {
    DeployError::InferenceError(e.to_string())
}

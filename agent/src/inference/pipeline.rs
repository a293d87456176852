//! Uniform inference pipeline over the supported task types

use std::sync::Arc;

use image::RgbImage;
use ndarray::{Array2, Array3, Axis};

use crate::errors::DeployError;
use crate::inference::labelmap::CategoryIndex;
use crate::inference::model::{BoundingBox, Model, ModelInput, ModelOutput};
use crate::inference::preprocess::{to_tensor, Preprocess};
use crate::inference::visuals::{blend_mask, draw_boxes, BoxAnnotation, ClassPalette, LabelFont};
use crate::models::deployment::DeploymentType;

/// A named detection
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    pub class_name: String,
    pub score: f32,
}

/// Structured prediction for one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Classification { class_name: String, probability: f32 },
    Detection(Vec<Detection>),
    /// Class index per pixel, shape `(height, width)`
    Segmentation(Array2<u32>),
}

/// Pipeline result
#[derive(Debug, Clone)]
pub struct InferenceOutput {
    pub prediction: Prediction,

    /// Annotated frame, when one was drawn
    pub frame: Option<RgbImage>,
}

/// Per-call drawing options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawOptions {
    pub draw: bool,
    pub threshold: f32,
    pub ignore_background: bool,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            draw: true,
            threshold: 0.7,
            ignore_background: false,
        }
    }
}

pub struct ClassificationPipeline {
    model: Arc<dyn Model>,
    class_names: Vec<String>,
    input_size: Option<(u32, u32)>,
    preprocess: Preprocess,
}

pub struct DetectionPipeline {
    model: Arc<dyn Model>,
    category_index: CategoryIndex,
    palette: ClassPalette,
    font: Option<Arc<LabelFont>>,
}

pub struct SegmentationPipeline {
    model: Arc<dyn Model>,
    input_size: Option<(u32, u32)>,
    preprocess: Preprocess,
    palette: ClassPalette,
}

/// Task-specific pipeline, chosen once per deployment
pub enum InferencePipeline {
    Classification(ClassificationPipeline),
    Detection(DetectionPipeline),
    Segmentation(SegmentationPipeline),
}

impl InferencePipeline {
    pub fn classification(
        model: Arc<dyn Model>,
        class_names: Vec<String>,
        preprocess: Preprocess,
    ) -> Self {
        let input_size = model.input_size();
        InferencePipeline::Classification(ClassificationPipeline {
            model,
            class_names,
            input_size,
            preprocess,
        })
    }

    pub fn detection(
        model: Arc<dyn Model>,
        category_index: CategoryIndex,
        palette: ClassPalette,
        font: Option<Arc<LabelFont>>,
    ) -> Self {
        InferencePipeline::Detection(DetectionPipeline {
            model,
            category_index,
            palette,
            font,
        })
    }

    pub fn segmentation(model: Arc<dyn Model>, preprocess: Preprocess, palette: ClassPalette) -> Self {
        let input_size = model.input_size();
        InferencePipeline::Segmentation(SegmentationPipeline {
            model,
            input_size,
            preprocess,
            palette,
        })
    }

    /// Whether this pipeline serves the given task type
    pub fn serves(&self, task: DeploymentType) -> bool {
        match self {
            InferencePipeline::Classification(_) => task == DeploymentType::ImageClassification,
            InferencePipeline::Detection(_) => task == DeploymentType::ObjectDetection,
            InferencePipeline::Segmentation(_) => task.is_segmentation(),
        }
    }

    /// Run one frame through the model
    pub fn infer(&self, frame: &RgbImage, options: &DrawOptions) -> Result<InferenceOutput, DeployError> {
        match self {
            InferencePipeline::Classification(p) => p.infer(frame),
            InferencePipeline::Detection(p) => p.infer(frame, options),
            InferencePipeline::Segmentation(p) => p.infer(frame, options),
        }
    }
}

impl ClassificationPipeline {
    fn infer(&self, frame: &RgbImage) -> Result<InferenceOutput, DeployError> {
        let tensor = to_tensor(frame, self.input_size, self.preprocess);
        let probabilities = match self.model.predict(ModelInput::Tensor(tensor))? {
            ModelOutput::Probabilities(p) => p,
            other => return Err(unexpected_output("probabilities", &other)),
        };

        let (index, probability) = probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| DeployError::InferenceError("Model returned no classes".to_string()))?;

        let class_name = self
            .class_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string());

        Ok(InferenceOutput {
            prediction: Prediction::Classification {
                class_name,
                probability,
            },
            frame: None,
        })
    }
}

impl DetectionPipeline {
    fn infer(&self, frame: &RgbImage, options: &DrawOptions) -> Result<InferenceOutput, DeployError> {
        let raw = match self.model.predict(ModelInput::Image(frame))? {
            ModelOutput::Detections(d) => d,
            other => return Err(unexpected_output("detections", &other)),
        };

        let detections: Vec<Detection> = raw
            .into_iter()
            .map(|d| Detection {
                class_name: self
                    .category_index
                    .get(&d.class_id)
                    .cloned()
                    .unwrap_or_else(|| d.class_id.to_string()),
                bbox: d.bbox,
                class_id: d.class_id,
                score: d.score,
            })
            .collect();

        let annotated = if options.draw {
            let mut canvas = frame.clone();
            let annotations: Vec<BoxAnnotation<'_>> = detections
                .iter()
                .map(|d| BoxAnnotation {
                    bbox: d.bbox,
                    label: &d.class_name,
                    score: d.score,
                })
                .collect();
            draw_boxes(
                &mut canvas,
                &annotations,
                options.threshold,
                &self.palette,
                self.font.as_deref(),
            );
            Some(canvas)
        } else {
            None
        };

        Ok(InferenceOutput {
            prediction: Prediction::Detection(detections),
            frame: annotated,
        })
    }
}

impl SegmentationPipeline {
    fn infer(&self, frame: &RgbImage, options: &DrawOptions) -> Result<InferenceOutput, DeployError> {
        let tensor = to_tensor(frame, self.input_size, self.preprocess);
        let mask = match self.model.predict(ModelInput::Tensor(tensor))? {
            ModelOutput::ClassMask(mask) => mask,
            ModelOutput::PixelScores(scores) => argmax_classes(&scores)?,
            other => return Err(unexpected_output("a class mask", &other)),
        };

        let annotated = options
            .draw
            .then(|| blend_mask(frame, &mask, &self.palette, options.ignore_background));

        Ok(InferenceOutput {
            prediction: Prediction::Segmentation(mask),
            frame: annotated,
        })
    }
}

/// Reduce `(height, width, classes)` scores to a class index per pixel
pub fn argmax_classes(scores: &Array3<f32>) -> Result<Array2<u32>, DeployError> {
    if scores.len_of(Axis(2)) == 0 {
        return Err(DeployError::InferenceError(
            "Segmentation output has no classes".to_string(),
        ));
    }
    Ok(scores.map_axis(Axis(2), |lane| {
        lane.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i as u32)
            .unwrap_or(0)
    }))
}

fn unexpected_output(expected: &str, got: &ModelOutput) -> DeployError {
    let kind = match got {
        ModelOutput::Probabilities(_) => "probabilities",
        ModelOutput::Detections(_) => "detections",
        ModelOutput::ClassMask(_) => "class mask",
        ModelOutput::PixelScores(_) => "pixel scores",
    };
    DeployError::InferenceError(format!("Expected {} from the model, got {}", expected, kind))
}

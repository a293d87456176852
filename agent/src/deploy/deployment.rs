//! A model deployment: task, artifacts and the prepared inference pipeline

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::deploy::formatter::ResultFormatter;
use crate::errors::DeployError;
use crate::inference::labelmap::{class_names, load_labelmap, CategoryIndex};
use crate::inference::model::{ModelArtifacts, ModelLoader};
use crate::inference::pipeline::InferencePipeline;
use crate::inference::preprocess::Preprocess;
use crate::inference::visuals::{ClassPalette, LabelFont};
use crate::models::deployment::DeploymentType;

pub struct Deployment {
    task: DeploymentType,
    artifacts: ModelArtifacts,
    class_names: Vec<String>,
    category_index: CategoryIndex,
    pipeline: Option<Arc<InferencePipeline>>,
}

impl Deployment {
    /// A model trained in-app; `class_names` may be empty to read them
    /// from the label map
    pub fn from_trained(
        task: DeploymentType,
        artifacts: ModelArtifacts,
        class_names: Vec<String>,
    ) -> Self {
        Self {
            task,
            artifacts,
            class_names,
            category_index: CategoryIndex::new(),
            pipeline: None,
        }
    }

    /// A user-uploaded model directory with a label map inside
    pub fn from_uploaded_model(task: DeploymentType, model_dir: impl Into<PathBuf>) -> Self {
        let artifacts = ModelArtifacts {
            model_dir: model_dir.into(),
            is_uploaded: true,
            ..Default::default()
        };
        Self::from_trained(task, artifacts, Vec::new())
    }

    pub fn task(&self) -> DeploymentType {
        self.task
    }

    pub fn artifacts(&self) -> &ModelArtifacts {
        &self.artifacts
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn category_index(&self) -> &CategoryIndex {
        &self.category_index
    }

    pub fn is_prepared(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Load metadata and the model, then build the task pipeline. Runs
    /// once per session; later calls keep the prepared pipeline.
    pub fn run_preparation_pipeline(&mut self, loader: &dyn ModelLoader) -> Result<(), DeployError> {
        if self.pipeline.is_some() {
            debug!("Deployment already prepared");
            return Ok(());
        }
        info!("Preparing {} deployment from {}", self.task, self.artifacts.model_dir.display());

        self.load_metadata()?;

        let model = loader.load(self.task, &self.artifacts)?;
        let architecture = self.artifacts.architecture.clone().or_else(|| model.architecture());
        let preprocess = architecture
            .as_deref()
            .map(Preprocess::for_architecture)
            .unwrap_or(Preprocess::None);

        let pipeline = match self.task {
            DeploymentType::ImageClassification => {
                InferencePipeline::classification(model, self.class_names.clone(), preprocess)
            }
            DeploymentType::ObjectDetection => {
                let palette = ClassPalette::new(&class_names(&self.category_index));
                InferencePipeline::detection(model, self.category_index.clone(), palette, self.load_font())
            }
            DeploymentType::InstanceSegmentation | DeploymentType::SemanticSegmentation => {
                let palette = ClassPalette::new(&self.class_names);
                InferencePipeline::segmentation(model, preprocess, palette)
            }
        };

        info!(
            "Deployment ready: {} classes, preprocessing {:?}",
            self.class_names.len(),
            preprocess
        );
        self.pipeline = Some(Arc::new(pipeline));
        Ok(())
    }

    fn load_metadata(&mut self) -> Result<(), DeployError> {
        match self.artifacts.labelmap_path() {
            Some(path) => {
                self.category_index = load_labelmap(&path)?;
                debug!("Loaded {} labels from {}", self.category_index.len(), path.display());
            }
            None if self.task == DeploymentType::ObjectDetection => {
                return Err(DeployError::ModelError(format!(
                    "No label map found in {}",
                    self.artifacts.model_dir.display()
                )));
            }
            None => {}
        }

        if self.class_names.is_empty() {
            self.class_names = class_names(&self.category_index);
        }
        if self.category_index.is_empty() {
            self.category_index = self
                .class_names
                .iter()
                .enumerate()
                .map(|(i, name)| (i as u32 + 1, name.clone()))
                .collect();
        }
        if self.class_names.is_empty() {
            return Err(DeployError::ModelError(
                "Deployment has no class names".to_string(),
            ));
        }
        Ok(())
    }

    fn load_font(&self) -> Option<Arc<LabelFont>> {
        let path = self.artifacts.font_file.as_ref()?;
        match LabelFont::load(path) {
            Ok(font) => Some(Arc::new(font)),
            Err(e) => {
                warn!("Box labels will not be drawn: {}", e);
                None
            }
        }
    }

    pub fn pipeline(&self) -> Result<Arc<InferencePipeline>, DeployError> {
        self.pipeline
            .clone()
            .ok_or_else(|| DeployError::ModelError("Deployment is not prepared".to_string()))
    }

    pub fn formatter(&self, include_bbox: bool) -> ResultFormatter {
        ResultFormatter::new(self.class_names.clone(), include_bbox)
    }

    /// Drop the loaded model. The deployment can be prepared again.
    pub fn release(&mut self) {
        if self.pipeline.take().is_some() {
            info!("Released {} model", self.task);
        }
    }
}

/// Map each camera view to its camera index. A title may name several
/// views separated by `/`; views are trimmed and lower-cased.
pub fn camera_views_from_titles(titles: &[String]) -> BTreeMap<String, usize> {
    let mut views = BTreeMap::new();
    for (index, title) in titles.iter().enumerate() {
        for view in title.split('/') {
            views.insert(view.trim().to_lowercase(), index);
        }
    }
    views
}

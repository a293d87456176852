//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::deployment::Deployment;
use crate::deploy::state::OrchestratorState;
use crate::errors::DeployError;
use crate::inference::model::{default_loader, ModelLoader};
use crate::mqtt::bindings::TopicBindings;
use crate::storage::layout::StorageLayout;

/// Main application state
pub struct AppState {
    /// State shared by the deployment loop and the control plane
    pub deploy_state: Arc<OrchestratorState>,

    /// Project output directories
    pub layout: StorageLayout,

    /// Inference backend
    pub loader: Arc<dyn ModelLoader>,

    /// MQTT topic bindings, when the control plane is enabled
    pub bindings: Option<Arc<TopicBindings>>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(
        options: &AppOptions,
        bindings: Option<Arc<TopicBindings>>,
    ) -> Result<Self, DeployError> {
        info!("Initializing application state...");

        options.layout.setup().await?;
        let deploy_state = Arc::new(OrchestratorState::new(options.deployment.clone())?);

        Ok(Self {
            deploy_state,
            layout: options.layout.clone(),
            loader: default_loader(),
            bindings,
        })
    }

    /// Deployment described by the options
    pub fn deployment(&self, options: &AppOptions) -> Deployment {
        Deployment::from_trained(
            options.model.task,
            options.model.artifacts.clone(),
            options.model.class_names.clone(),
        )
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        self.deploy_state.cancel();
        Ok(())
    }
}

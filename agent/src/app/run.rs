//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions, SourceChoice};
use crate::app::state::AppState;
use crate::deploy::orchestrator::{LoopExit, Orchestrator};
use crate::deploy::state::OrchestratorState;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::deployment::InputType;
use crate::mqtt::bindings::{qos_from_level, TopicBindings};
use crate::mqtt::client::MqttClient;
use crate::mqtt::control::register_callbacks;
use crate::mqtt::topics::TopicKind;
use crate::source::camera::CameraStream;
use crate::source::file::VideoFile;
use crate::source::images::ImageFiles;
use crate::source::mqtt::{MqttFrameSource, ReceiveMode};
use crate::source::FrameSource;
use crate::workers::mqtt;

/// Run the deployment runtime
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    info!("Initializing visagent {}...", version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    // Connect the control plane and build the app state
    let (app_state, done_rx) = match init(&options, shutdown_tx.clone(), &mut shutdown_manager).await
    {
        Ok(started) => started,
        Err(e) => {
            error!("Failed to start deployment: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    if options.lifecycle.is_persistent {
        tokio::select! {
            _ = shutdown_signal => {
                info!("Shutdown signal received, shutting down...");
            }
        }
    } else {
        tokio::select! {
            _ = shutdown_signal => {
                info!("Shutdown signal received, shutting down...");
            }
            _ = done_rx => {
                info!("Deployment finished, shutting down...");
            }
        }
    }

    // Shutdown
    app_state.deploy_state.cancel();
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(Arc<AppState>, oneshot::Receiver<()>), DeployError> {
    let bindings = if options.enable_mqtt_worker {
        Some(init_mqtt_worker(options, shutdown_manager, shutdown_tx.subscribe()).await?)
    } else {
        info!("MQTT control plane disabled");
        None
    };

    let app_state = Arc::new(AppState::init(options, bindings).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    let done_rx = init_deployment(options, app_state.clone(), shutdown_manager)?;
    Ok((app_state, done_rx))
}

async fn init_mqtt_worker(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<Arc<TopicBindings>, DeployError> {
    info!("Initializing MQTT worker...");

    let worker_options = options.mqtt_worker.clone();
    let address = &worker_options.broker_address;
    info!("Connecting to MQTT broker: {}:{}", address.host, address.port);

    let mut client = MqttClient::new(address)?;
    client.connect(worker_options.connect_timeout).await?;

    let bindings = Arc::new(TopicBindings::new(
        Arc::new(client.handle()),
        options.topics.clone(),
        qos_from_level(options.qos)?,
    )?);

    let worker_bindings = bindings.clone();
    let mqtt_handle = tokio::spawn(async move {
        mqtt::run(
            &worker_options,
            client,
            worker_bindings,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_mqtt_worker_handle(mqtt_handle)?;
    Ok(bindings)
}

fn init_deployment(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<oneshot::Receiver<()>, DeployError> {
    info!("Initializing deployment...");

    let choice = options.source.resolve(&options.deployment)?;
    let (done_tx, done_rx) = oneshot::channel();
    let options = options.clone();

    let deployment_handle = tokio::spawn(async move {
        match run_deployment(&options, choice, &app_state).await {
            Ok(exit) => info!("Deployment loop exited: {:?}", exit),
            Err(e) => error!("Deployment failed: {}", e),
        }
        let _ = done_tx.send(());
    });

    shutdown_manager.with_deployment_handle(deployment_handle)?;
    Ok(done_rx)
}

async fn run_deployment(
    options: &AppOptions,
    choice: SourceChoice,
    app_state: &AppState,
) -> Result<LoopExit, DeployError> {
    let state = app_state.deploy_state.clone();

    if let Some(bindings) = &app_state.bindings {
        register_callbacks(bindings, &state)?;
        bindings.subscribe_all()?;
    }

    let mut orchestrator = Orchestrator::new(
        app_state.deployment(options),
        app_state.loader.clone(),
        state.clone(),
        app_state.layout.clone(),
        app_state.bindings.clone(),
    );

    let source = match open_source(options, &choice, &state, app_state.bindings.as_deref()).await {
        Ok(source) => source,
        Err(e) => {
            orchestrator.acquire_failed(&e);
            orchestrator.end().await;
            return Err(e);
        }
    };

    if let Err(e) = orchestrator.deploy(source).await {
        orchestrator.end().await;
        return Err(e);
    }
    orchestrator.run().await
}

/// Open the frame source for a deployment
pub async fn open_source(
    options: &AppOptions,
    choice: &SourceChoice,
    state: &Arc<OrchestratorState>,
    bindings: Option<&TopicBindings>,
) -> Result<Box<dyn FrameSource>, DeployError> {
    let config = state.config();
    let source: Box<dyn FrameSource> = match choice {
        SourceChoice::Camera => Box::new(
            CameraStream::open(
                config.camera.clone(),
                state.clone(),
                options.source.camera_open_timeout,
            )
            .await?,
        ),
        SourceChoice::Video(path) => {
            Box::new(VideoFile::open(path, options.source.delete_uploaded_video)?)
        }
        SourceChoice::Images(dir) => Box::new(ImageFiles::from_dir(&Dir::new(dir)).await?),
        SourceChoice::Mqtt => {
            let bindings = bindings.ok_or_else(|| {
                DeployError::ConfigError("MQTT frames need the MQTT control plane".to_string())
            })?;
            let mode = match config.input_type {
                InputType::Image => ReceiveMode::NewOnly,
                InputType::Video => ReceiveMode::Latest,
            };
            Box::new(MqttFrameSource::new(
                state.clone(),
                bindings.topic(TopicKind::RecvFrame),
                mode,
            ))
        }
    };
    Ok(source)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    deployment_handle: Option<JoinHandle<()>>,
    mqtt_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            deployment_handle: None,
            mqtt_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), DeployError> {
        if self.app_state.is_some() {
            return Err(DeployError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_deployment_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeployError> {
        if self.deployment_handle.is_some() {
            return Err(DeployError::ShutdownError("deployment_handle already set".to_string()));
        }
        self.deployment_handle = Some(handle);
        Ok(())
    }

    pub fn with_mqtt_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DeployError> {
        if self.mqtt_worker_handle.is_some() {
            return Err(DeployError::ShutdownError("mqtt_handle already set".to_string()));
        }
        self.mqtt_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), DeployError> {
        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DeployError> {
        info!("Shutting down visagent...");

        // 1. App state: cancels the deployment loop
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        // 2. Deployment loop, which tears down its own resources
        if let Some(handle) = self.deployment_handle.take() {
            handle.await.map_err(|e| DeployError::ShutdownError(e.to_string()))?;
        }

        // 3. MQTT worker, after teardown queued its unsubscribes
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.mqtt_worker_handle.take() {
            if let Err(e) = handle.await {
                warn!("MQTT worker did not stop cleanly: {}", e);
            }
        }

        info!("Shutdown complete");
        Ok(())
    }
}

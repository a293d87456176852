//! Deployment loop
//!
//! Pulls frames from the active source, runs inference, and fans results out
//! to recording, MQTT publishing, label checks and the CSV log. The loop is
//! single-threaded; the MQTT control plane only touches [`OrchestratorState`].

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::deploy::csv_log::CsvResultLog;
use crate::deploy::deployment::Deployment;
use crate::deploy::frames::{encode_jpeg, save_frame};
use crate::deploy::fsm::{SessionEvent, SessionState};
use crate::deploy::label_check::{evaluate, CheckOutcome};
use crate::deploy::recorder::Recorder;
use crate::deploy::state::OrchestratorState;
use crate::errors::DeployError;
use crate::inference::model::ModelLoader;
use crate::inference::pipeline::DrawOptions;
use crate::models::deployment::{DeploymentConfig, DeploymentType, InputType};
use crate::models::result::ResultRecord;
use crate::mqtt::bindings::TopicBindings;
use crate::mqtt::topics::TopicKind;
use crate::source::{FrameEvent, FrameSource, SourceKind};
use crate::storage::layout::StorageLayout;
use crate::utils::{file_stamp, local_now, parse_timezone};

/// Outcome of a single loop iteration
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A frame went through the whole pipeline
    Processed { records: usize },
    /// The frame was dropped after a transient error
    Skipped,
    EndOfStream,
    Cancelled,
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    EndOfStream,
    Cancelled,
}

pub struct Orchestrator {
    deployment: Deployment,
    loader: Arc<dyn ModelLoader>,
    state: Arc<OrchestratorState>,
    layout: StorageLayout,
    bindings: Option<Arc<TopicBindings>>,
    source: Option<Box<dyn FrameSource>>,
    recorder: Option<Recorder>,
    csv_log: CsvResultLog,
    last_output: Option<RgbImage>,
}

impl Orchestrator {
    pub fn new(
        deployment: Deployment,
        loader: Arc<dyn ModelLoader>,
        state: Arc<OrchestratorState>,
        layout: StorageLayout,
        bindings: Option<Arc<TopicBindings>>,
    ) -> Self {
        let retention = state.config().retention_period;
        Self {
            csv_log: CsvResultLog::new(layout.results_dir().path(), retention),
            deployment,
            loader,
            state,
            layout,
            bindings,
            source: None,
            recorder: None,
            last_output: None,
        }
    }

    pub fn state(&self) -> &Arc<OrchestratorState> {
        &self.state
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn session_state(&self) -> SessionState {
        self.state.session_state()
    }

    /// Latest output frame, annotated when drawing is on
    pub fn last_output(&self) -> Option<&RgbImage> {
        self.last_output.as_ref()
    }

    // ============================== LIFECYCLE =================================== //

    /// Start a session over `source`. On failure the source is released
    /// and the session stays not deployed.
    pub async fn deploy(&mut self, source: Box<dyn FrameSource>) -> Result<(), DeployError> {
        self.acquire(source, SessionEvent::Deploy).await
    }

    /// Continue a paused session over a new source
    pub async fn resume(&mut self, source: Box<dyn FrameSource>) -> Result<(), DeployError> {
        self.acquire(source, SessionEvent::Resume).await
    }

    /// Record a source that could not be opened
    pub fn acquire_failed(&self, error: &DeployError) {
        error!("Failed to acquire frame source: {}", error);
        let _ = self
            .state
            .transition(SessionEvent::AcquireFailed(error.to_string()));
    }

    async fn acquire(
        &mut self,
        mut source: Box<dyn FrameSource>,
        event: SessionEvent,
    ) -> Result<(), DeployError> {
        let expected = match event {
            SessionEvent::Resume => SessionState::Paused,
            _ => SessionState::NotDeployed,
        };
        let current = self.state.session_state();
        let prepared = if current != expected {
            Err(DeployError::TransitionError(format!(
                "Cannot {:?} a {:?} session",
                event, current
            )))
        } else {
            self.deployment
                .run_preparation_pipeline(self.loader.as_ref())
        };

        if let Err(e) = prepared {
            if let Err(release_err) = source.release().await {
                warn!("Failed to release {} source: {}", source.kind(), release_err);
            }
            if !matches!(e, DeployError::TransitionError(_)) {
                self.acquire_failed(&e);
            }
            return Err(e);
        }

        self.state.clear_cancel();
        self.state.reset_timing();
        self.csv_log
            .set_retention_period(self.state.config().retention_period);
        info!("Deploying {} model over {} source", self.deployment.task(), source.kind());
        self.source = Some(source);
        self.state.transition(event)?;
        Ok(())
    }

    /// Release the frame source and output files, keep the model and the
    /// MQTT bindings
    pub async fn pause(&mut self) -> Result<(), DeployError> {
        self.state.transition(SessionEvent::Pause)?;
        self.release_io().await;
        info!("Deployment paused");
        Ok(())
    }

    /// Full teardown. Every step runs even when an earlier one fails;
    /// calling it again does nothing.
    pub async fn end(&mut self) {
        self.release_io().await;

        self.deployment.release();
        self.state.label_check().reset();
        self.state.clear_received_frame();
        self.state.set_record(false);
        if let Some(bindings) = &self.bindings {
            bindings.reset();
        }
        self.last_output = None;

        if self.state.session_state() != SessionState::NotDeployed {
            if let Err(e) = self.state.transition(SessionEvent::End) {
                warn!("{}", e);
            }
            info!("Deployment ended");
        }
    }

    async fn release_io(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finish() {
                error!("Failed to close recording: {}", e);
            }
        }
        if let Err(e) = self.csv_log.close() {
            error!("Failed to close CSV log: {}", e);
        }
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.release().await {
                error!("Failed to release {} source: {}", source.kind(), e);
            }
        }
        self.state.reset_timing();
    }

    /// Run until the source ends or the session is cancelled, then tear
    /// down. Errors other than transient ones end the session too.
    pub async fn run(&mut self) -> Result<LoopExit, DeployError> {
        let result = loop {
            match self.step().await {
                Ok(Step::Processed { .. }) | Ok(Step::Skipped) => continue,
                Ok(Step::EndOfStream) => {
                    info!("End of stream reached");
                    break Ok(LoopExit::EndOfStream);
                }
                Ok(Step::Cancelled) => break Ok(LoopExit::Cancelled),
                Err(e) => {
                    error!("Deployment loop stopped: {}", e);
                    break Err(e);
                }
            }
        };
        self.end().await;
        result
    }

    // ================================ LOOP ====================================== //

    /// One iteration of the deployment loop
    pub async fn step(&mut self) -> Result<Step, DeployError> {
        if self.state.is_cancelled() {
            return Ok(Step::Cancelled);
        }
        if self.state.take_rerender() {
            debug!("Control state changed");
        }

        let source = self
            .source
            .as_mut()
            .ok_or_else(|| DeployError::TransitionError("No active frame source".to_string()))?;
        let source_kind = source.kind();

        let frame = match source.next_frame().await {
            Ok(FrameEvent::Frame(frame)) => frame,
            Ok(FrameEvent::EndOfStream) => return Ok(Step::EndOfStream),
            Ok(FrameEvent::Cancelled) => return Ok(Step::Cancelled),
            Err(e) if e.is_transient() => {
                warn!("Skipping unreadable frame: {}", e);
                return Ok(Step::Skipped);
            }
            Err(e) => return Err(e),
        };

        let config = self.state.config();
        let draw = DrawOptions {
            draw: config.draw_result,
            threshold: config.confidence_threshold,
            ignore_background: config.ignore_background,
        };

        let pipeline = self.deployment.pipeline()?;
        let joined = tokio::task::spawn_blocking(move || {
            let inferred = pipeline.infer(&frame, &draw);
            (frame, inferred)
        })
        .await;
        let (frame, inferred) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                // A panicking backend loses this frame only
                error!("Inference task failed, skipping frame: {}", e);
                return Ok(Step::Skipped);
            }
        };

        let output = match inferred {
            Ok(output) => output,
            Err(e) => {
                warn!("Inference failed, skipping frame: {}", e);
                return Ok(Step::Skipped);
            }
        };

        let now = local_now(&parse_timezone(&config.timezone)?);
        let threshold = (self.deployment.task() == DeploymentType::ObjectDetection)
            .then_some(config.confidence_threshold);
        let records = self.deployment.formatter(config.include_bbox).format(
            &output.prediction,
            &now,
            &config.camera_title,
            threshold,
        );
        let out_frame = output.frame.unwrap_or(frame);

        self.update_recording(&out_frame, &config, &now);

        let fps = self.state.record_iteration(Instant::now());
        debug!("{:.1} FPS", fps);

        if config.publish_frame {
            self.publish_frame(&out_frame).await;
        }
        if self.state.take_save_frame() {
            let dir = self.layout.saved_frames_dir();
            match save_frame(&dir, None, &file_stamp(&now), &out_frame).await {
                Ok(file) => info!("Saved frame at {}", file.path().display()),
                Err(e) => error!("Failed to save frame: {}", e),
            }
        }

        self.check_labels(&records, &out_frame, &now).await;
        self.last_output = Some(out_frame);

        if records.is_empty() {
            return Ok(Step::Processed { records: 0 });
        }

        if config.publishing {
            self.publish_results(&records).await;
        }

        if source_kind == SourceKind::Camera && config.input_type == InputType::Video {
            self.csv_log.set_retention_period(config.retention_period);
            if let Err(e) = self.csv_log.append(&records, now) {
                error!("Failed to write CSV results: {}", e);
            }
        }

        Ok(Step::Processed {
            records: records.len(),
        })
    }

    fn update_recording(&mut self, frame: &RgbImage, config: &DeploymentConfig, now: &NaiveDateTime) {
        if !self.state.is_recording() {
            if let Some(recorder) = self.recorder.take() {
                if let Err(e) = recorder.finish() {
                    error!("Failed to close recording: {}", e);
                }
            }
            return;
        }

        if self.recorder.is_none() {
            let dir = self.layout.recordings_dir();
            match Recorder::create(dir.path(), config.recording_format, &file_stamp(now)) {
                Ok(recorder) => self.recorder = Some(recorder),
                Err(e) => {
                    error!("Failed to start recording: {}", e);
                    self.state.set_record(false);
                    return;
                }
            }
        }

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write_frame(frame) {
                error!("Failed to write recording frame, stopping: {}", e);
                self.state.set_record(false);
                if let Some(recorder) = self.recorder.take() {
                    if let Err(e) = recorder.finish() {
                        error!("Failed to close recording: {}", e);
                    }
                }
            }
        }
    }

    async fn check_labels(&self, records: &[ResultRecord], frame: &RgbImage, now: &NaiveDateTime) {
        let Some(request) = self.state.label_check().take_pending() else {
            return;
        };

        match evaluate(&request, records) {
            CheckOutcome::Pass => info!("Label check passed at '{}' view", request.view),
            CheckOutcome::Fail { missing } => {
                warn!("Label check failed at '{}' view, missing {:?}", request.view, missing);
                let dir = self.layout.ng_images_dir();
                match save_frame(&dir, Some(&request.view), &file_stamp(now), frame).await {
                    Ok(file) => info!("Saved NG image at {}", file.path().display()),
                    Err(e) => error!("Failed to save NG image: {}", e),
                }
            }
        }
    }

    async fn publish_frame(&self, frame: &RgbImage) {
        let Some(bindings) = &self.bindings else {
            return;
        };
        let payload = match encode_jpeg(frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode output frame: {}", e);
                return;
            }
        };
        let topic = bindings.topic(TopicKind::PublishFrame);
        if let Err(e) = bindings.transport().publish(&topic, bindings.qos(), payload).await {
            warn!("Failed to publish frame: {}", e);
        }
    }

    async fn publish_results(&self, records: &[ResultRecord]) {
        let Some(bindings) = &self.bindings else {
            return;
        };
        let payload = match serde_json::to_vec(records) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize results: {}", e);
                return;
            }
        };
        let topic = bindings.topic(TopicKind::PublishResults);
        if let Err(e) = bindings.transport().publish(&topic, bindings.qos(), payload).await {
            warn!("Failed to publish results: {}", e);
        }
    }
}

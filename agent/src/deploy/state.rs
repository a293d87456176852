//! State shared between the deployment loop and the MQTT control plane
//!
//! The control plane only calls the narrow setters below. Flags are atomics,
//! the configuration and frame buffer sit behind locks held for a copy or
//! a swap, never across I/O.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::deploy::fsm::{SessionEvent, SessionFsm, SessionState};
use crate::deploy::label_check::LabelCheck;
use crate::errors::DeployError;
use crate::models::deployment::{DeploymentConfig, InputType};

/// Most recent frame pushed over MQTT
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// Increases by one for every received buffer
    pub seq: u64,
    pub bytes: Arc<Vec<u8>>,
}

/// Status snapshot for reporting
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub session: SessionState,
    pub fps: f32,
    pub frames: u64,
    pub recording: bool,
    pub publishing: bool,
    pub publish_frame: bool,
}

#[derive(Debug)]
pub struct OrchestratorState {
    config: RwLock<DeploymentConfig>,
    session: Mutex<SessionFsm>,
    label_check: LabelCheck,
    received: Mutex<Option<ReceivedFrame>>,
    received_seq: AtomicU64,
    cancel: AtomicBool,
    rerender: AtomicBool,
    record: AtomicBool,
    save_frame: AtomicBool,
    fps_bits: AtomicU32,
    frames: AtomicU64,
    last_iteration: Mutex<Option<Instant>>,
}

impl OrchestratorState {
    pub fn new(config: DeploymentConfig) -> Result<Self, DeployError> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: DeploymentConfig) -> Self {
        Self {
            config: RwLock::new(config),
            session: Mutex::new(SessionFsm::new()),
            label_check: LabelCheck::new(),
            received: Mutex::new(None),
            received_seq: AtomicU64::new(0),
            cancel: AtomicBool::new(false),
            rerender: AtomicBool::new(false),
            record: AtomicBool::new(false),
            save_frame: AtomicBool::new(false),
            fps_bits: AtomicU32::new(0),
            frames: AtomicU64::new(0),
            last_iteration: Mutex::new(None),
        }
    }

    // Configuration

    /// Copy of the current configuration
    pub fn config(&self) -> DeploymentConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the configuration. Invalid values are rejected and the
    /// prior configuration is kept.
    pub fn update_config(&self, config: DeploymentConfig) -> Result<(), DeployError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        self.request_rerender();
        Ok(())
    }

    /// Apply an edit to a copy of the configuration and store it if valid
    pub fn edit_config<F>(&self, edit: F) -> Result<(), DeployError>
    where
        F: FnOnce(&mut DeploymentConfig),
    {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        let mut config = guard.clone();
        edit(&mut config);
        config.validate()?;
        *guard = config;
        drop(guard);
        self.request_rerender();
        Ok(())
    }

    /// Turning result publishing off also stops frame publishing
    pub fn set_publishing(&self, publishing: bool) {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        config.publishing = publishing;
        if !publishing {
            config.publish_frame = false;
        }
        drop(config);
        info!("Result publishing {}", if publishing { "started" } else { "stopped" });
        self.request_rerender();
    }

    pub fn set_publish_frame(&self, publish_frame: bool) {
        self.config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .publish_frame = publish_frame;
        info!("Frame publishing {}", if publish_frame { "started" } else { "stopped" });
        self.request_rerender();
    }

    // Flags

    pub fn set_record(&self, record: bool) {
        self.record.store(record, Ordering::SeqCst);
        info!("Recording {}", if record { "requested" } else { "stopped" });
        self.request_rerender();
    }

    pub fn is_recording(&self) -> bool {
        self.record.load(Ordering::SeqCst)
    }

    pub fn request_save_frame(&self) {
        self.save_frame.store(true, Ordering::SeqCst);
        self.request_rerender();
    }

    /// Consume a pending save-frame request
    pub fn take_save_frame(&self) -> bool {
        self.save_frame.swap(false, Ordering::SeqCst)
    }

    pub fn request_rerender(&self) {
        self.rerender.store(true, Ordering::SeqCst);
    }

    /// Consume a pending re-render request
    pub fn take_rerender(&self) -> bool {
        self.rerender.swap(false, Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        if !self.cancel.swap(true, Ordering::SeqCst) {
            info!("Deployment cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    // Label check

    pub fn label_check(&self) -> &LabelCheck {
        &self.label_check
    }

    // Received frames

    /// Store a frame pushed over MQTT. Image mode asks for a re-render so
    /// the new image is processed; video mode only swaps the buffer.
    pub fn set_received_frame(&self, bytes: Vec<u8>) -> u64 {
        let seq = self.received_seq.fetch_add(1, Ordering::SeqCst) + 1;
        *self.received.lock().unwrap_or_else(|e| e.into_inner()) = Some(ReceivedFrame {
            seq,
            bytes: Arc::new(bytes),
        });
        if self.config().input_type == InputType::Image {
            self.request_rerender();
        }
        debug!("Received frame #{}", seq);
        seq
    }

    pub fn received_frame(&self) -> Option<ReceivedFrame> {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_received_frame(&self) {
        *self.received.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    // Session

    pub fn session_state(&self) -> SessionState {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).state()
    }

    pub fn session_error(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .error()
            .map(str::to_string)
    }

    pub fn transition(&self, event: SessionEvent) -> Result<SessionState, DeployError> {
        let mut fsm = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let from = fsm.state();
        let to = fsm.process(event)?;
        if from != to {
            info!("Deployment session {:?} -> {:?}", from, to);
        }
        Ok(to)
    }

    // Statistics

    /// Mark the end of a loop iteration and update the rolling FPS
    pub fn record_iteration(&self, now: Instant) -> f32 {
        let mut last = self.last_iteration.lock().unwrap_or_else(|e| e.into_inner());
        let fps = match *last {
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev).as_secs_f32();
                if elapsed > 0.0 {
                    1.0 / elapsed
                } else {
                    self.fps()
                }
            }
            None => 0.0,
        };
        *last = Some(now);
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
        fps
    }

    pub fn fps(&self) -> f32 {
        f32::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Forget iteration timing, e.g. after the source is released
    pub fn reset_timing(&self) {
        *self.last_iteration.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.fps_bits.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> Stats {
        let config = self.config();
        Stats {
            session: self.session_state(),
            fps: self.fps(),
            frames: self.frames(),
            recording: self.is_recording(),
            publishing: config.publishing,
            publish_frame: config.publish_frame,
        }
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::with_config(DeploymentConfig::default())
    }
}

//! Live camera source backed by a background reader thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::deploy::state::OrchestratorState;
use crate::errors::DeployError;
use crate::hardware::camera::{open_device, CameraDevice};
use crate::models::deployment::CameraSource;
use crate::source::{FrameEvent, FrameSource, SourceKind};

/// Consecutive read failures after which the camera counts as lost
const MAX_READ_FAILURES: u32 = 10;
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Latest {
    seq: u64,
    frame: Option<RgbImage>,
    error: Option<String>,
}

pub struct CameraStream {
    description: String,
    latest: Arc<Mutex<Latest>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    state: Arc<OrchestratorState>,
    last_seq: u64,
    poll_interval: Duration,
}

impl CameraStream {
    /// Open a camera and wait for its first frame
    pub async fn open(
        source: CameraSource,
        state: Arc<OrchestratorState>,
        timeout: Duration,
    ) -> Result<Self, DeployError> {
        info!("Opening {}", source);
        Self::open_with(move || open_device(&source), state, timeout).await
    }

    /// Open a camera built by `opener` on the reader thread
    pub async fn open_with<O>(
        opener: O,
        state: Arc<OrchestratorState>,
        timeout: Duration,
    ) -> Result<Self, DeployError>
    where
        O: FnOnce() -> Result<Box<dyn CameraDevice>, DeployError> + Send + 'static,
    {
        let latest = Arc::new(Mutex::new(Latest::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let reader = {
            let latest = latest.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("camera-reader".to_string())
                .spawn(move || read_loop(opener, latest, stop, ready_tx))?
        };

        let ready = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(_)) => Err(DeployError::CameraError(
                "Camera reader exited before the first frame".to_string(),
            )),
            Err(_) => Err(DeployError::CameraError(format!(
                "No frame from camera within {:?}",
                timeout
            ))),
        };

        match ready {
            Ok(description) => {
                info!("{} streaming", description);
                Ok(Self {
                    description,
                    latest,
                    stop,
                    reader: Some(reader),
                    state,
                    last_seq: 0,
                    poll_interval: Duration::from_millis(5),
                })
            }
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

fn read_loop<O>(
    opener: O,
    latest: Arc<Mutex<Latest>>,
    stop: Arc<AtomicBool>,
    ready_tx: oneshot::Sender<Result<String, DeployError>>,
) where
    O: FnOnce() -> Result<Box<dyn CameraDevice>, DeployError>,
{
    let mut device = match opener() {
        Ok(device) => device,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut ready_tx = Some(ready_tx);
    let mut failures = 0;

    while !stop.load(Ordering::SeqCst) {
        match device.read_frame() {
            Ok(frame) => {
                failures = 0;
                {
                    let mut latest = latest.lock().unwrap_or_else(|e| e.into_inner());
                    latest.seq += 1;
                    latest.frame = Some(frame);
                }
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Ok(device.describe()));
                }
            }
            Err(e) => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(e));
                    return;
                }
                failures += 1;
                warn!("{} read failed ({}/{}): {}", device.describe(), failures, MAX_READ_FAILURES, e);
                if failures >= MAX_READ_FAILURES {
                    latest.lock().unwrap_or_else(|e| e.into_inner()).error =
                        Some(format!("{} lost: {}", device.describe(), e));
                    return;
                }
                thread::sleep(READ_RETRY_DELAY);
            }
        }
    }

    debug!("{} reader stopped", device.describe());
}

#[async_trait]
impl FrameSource for CameraStream {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    async fn next_frame(&mut self) -> Result<FrameEvent, DeployError> {
        loop {
            if self.state.is_cancelled() {
                return Ok(FrameEvent::Cancelled);
            }
            if self.stop.load(Ordering::SeqCst) {
                return Ok(FrameEvent::EndOfStream);
            }

            {
                let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(error) = &latest.error {
                    return Err(DeployError::CameraError(error.clone()));
                }
                if latest.seq != self.last_seq {
                    if let Some(frame) = &latest.frame {
                        self.last_seq = latest.seq;
                        return Ok(FrameEvent::Frame(frame.clone()));
                    }
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn release(&mut self) -> Result<(), DeployError> {
        self.stop.store(true, Ordering::SeqCst);
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || reader.join())
            .await
            .map_err(|e| DeployError::CameraError(e.to_string()))?
            .map_err(|_| DeployError::CameraError("Camera reader panicked".to_string()))?;
        info!("Released {}", self.description);
        Ok(())
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

//! Frames pushed over MQTT

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

use crate::deploy::state::OrchestratorState;
use crate::errors::DeployError;
use crate::source::{FrameEvent, FrameSource, SourceKind};

/// Which buffers the source hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Decode the latest buffer on every call (video input)
    Latest,
    /// Wait for a buffer not handed out before (image input)
    NewOnly,
}

pub struct MqttFrameSource {
    state: Arc<OrchestratorState>,
    topic: String,
    mode: ReceiveMode,
    last_seq: Option<u64>,
    poll_interval: Duration,
    status_interval: Duration,
}

impl MqttFrameSource {
    pub fn new(state: Arc<OrchestratorState>, topic: impl Into<String>, mode: ReceiveMode) -> Self {
        Self {
            state,
            topic: topic.into(),
            mode,
            last_seq: None,
            poll_interval: Duration::from_millis(10),
            status_interval: Duration::from_secs(5),
        }
    }

    pub fn with_intervals(mut self, poll_interval: Duration, status_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.status_interval = status_interval;
        self
    }
}

#[async_trait]
impl FrameSource for MqttFrameSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Mqtt
    }

    async fn next_frame(&mut self) -> Result<FrameEvent, DeployError> {
        let mut last_status: Option<Instant> = None;

        loop {
            if self.state.is_cancelled() {
                return Ok(FrameEvent::Cancelled);
            }

            if let Some(received) = self.state.received_frame() {
                let fresh = self.last_seq != Some(received.seq);
                if fresh || self.mode == ReceiveMode::Latest {
                    self.last_seq = Some(received.seq);
                    let image = image::load_from_memory(&received.bytes)?;
                    return Ok(FrameEvent::Frame(image.to_rgb8()));
                }
            }

            if last_status.is_none_or(|t| t.elapsed() >= self.status_interval) {
                let what = if self.last_seq.is_none() { "first" } else { "new" };
                info!("Waiting for {} image on topic '{}'", what, self.topic);
                last_status = Some(Instant::now());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn release(&mut self) -> Result<(), DeployError> {
        self.last_seq = None;
        Ok(())
    }
}

//! Test doubles for models, frame sources and the MQTT transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use rumqttc::QoS;

use visagent::errors::DeployError;
use visagent::inference::model::{
    BoundingBox, Model, ModelArtifacts, ModelInput, ModelLoader, ModelOutput, RawDetection,
};
use visagent::models::deployment::DeploymentType;
use visagent::mqtt::bindings::MqttTransport;
use visagent::source::{FrameEvent, FrameSource, SourceKind};

/// How a detector misbehaves on its faulty call
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Error,
    Panic,
}

/// Detector that sees one screw per frame, optionally failing on the
/// n-th call (zero-based)
pub struct ScrewDetector {
    pub score: f32,
    pub fault: Option<(usize, Fault)>,
    calls: AtomicUsize,
}

impl Model for ScrewDetector {
    fn predict(&self, _: ModelInput<'_>) -> Result<ModelOutput, DeployError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Some((n, Fault::Error)) if n == call => {
                return Err(DeployError::InferenceError("tensor shape mismatch".to_string()));
            }
            Some((n, Fault::Panic)) if n == call => panic!("backend crashed"),
            _ => {}
        }
        Ok(ModelOutput::Detections(vec![RawDetection {
            bbox: BoundingBox::new(0.25, 0.25, 0.75, 0.75),
            class_id: 1,
            score: self.score,
        }]))
    }
}

pub struct FakeLoader {
    pub score: f32,
    pub fail: bool,
    pub fault: Option<(usize, Fault)>,
    pub loads: AtomicUsize,
}

impl FakeLoader {
    pub fn detector(score: f32) -> Self {
        Self {
            score,
            fail: false,
            fault: None,
            loads: AtomicUsize::new(0),
        }
    }

    /// Detector whose `frame`-th prediction fails
    pub fn faulty_on(frame: usize, fault: Fault) -> Self {
        Self {
            fault: Some((frame, fault)),
            ..Self::detector(0.9)
        }
    }

    pub fn failing() -> Self {
        Self {
            score: 0.0,
            fail: true,
            fault: None,
            loads: AtomicUsize::new(0),
        }
    }
}

impl ModelLoader for FakeLoader {
    fn load(&self, _: DeploymentType, _: &ModelArtifacts) -> Result<Arc<dyn Model>, DeployError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DeployError::ModelError("corrupt model file".to_string()));
        }
        Ok(Arc::new(ScrewDetector {
            score: self.score,
            fault: self.fault,
            calls: AtomicUsize::new(0),
        }))
    }
}

/// A fixed number of frames, then end of stream
pub struct ScriptedSource {
    kind: SourceKind,
    remaining: usize,
    pub releases: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(kind: SourceKind, frames: usize) -> Self {
        Self {
            kind,
            remaining: frames,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn next_frame(&mut self) -> Result<FrameEvent, DeployError> {
        if self.remaining == 0 {
            return Ok(FrameEvent::EndOfStream);
        }
        self.remaining -= 1;
        Ok(FrameEvent::Frame(RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]))))
    }

    async fn release(&mut self) -> Result<(), DeployError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every transport call as a line of text
#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Mutex<Vec<String>>,
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingTransport {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl MqttTransport for RecordingTransport {
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), DeployError> {
        self.calls.lock().unwrap().push(format!("sub {} {:?}", topic, qos));
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), DeployError> {
        self.calls.lock().unwrap().push(format!("unsub {}", topic));
        Ok(())
    }

    async fn publish(&self, topic: &str, _: QoS, payload: Vec<u8>) -> Result<(), DeployError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

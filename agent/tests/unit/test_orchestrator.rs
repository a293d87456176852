//! Deployment loop tests over fake models and sources

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use image::{Rgb, RgbImage};
use rumqttc::QoS;
use tempfile::TempDir;

use visagent::deploy::deployment::Deployment;
use visagent::deploy::fsm::SessionState;
use visagent::deploy::frames::encode_jpeg;
use visagent::deploy::orchestrator::{LoopExit, Orchestrator, Step};
use visagent::deploy::state::OrchestratorState;
use visagent::inference::model::{ModelArtifacts, ModelLoader};
use visagent::models::deployment::{DeploymentConfig, DeploymentType, InputType};
use visagent::mqtt::bindings::TopicBindings;
use visagent::mqtt::control::register_callbacks;
use visagent::mqtt::topics::MqttTopics;
use visagent::source::file::VideoFile;
use visagent::source::SourceKind;
use visagent::storage::layout::StorageLayout;

use crate::fakes::{FakeLoader, Fault, RecordingTransport, ScriptedSource};

struct Harness {
    dir: TempDir,
    orchestrator: Orchestrator,
    state: Arc<OrchestratorState>,
    loader: Arc<FakeLoader>,
    transport: Arc<RecordingTransport>,
    bindings: Arc<TopicBindings>,
    layout: StorageLayout,
}

async fn harness(loader: FakeLoader, config: DeploymentConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join("model");
    fs::create_dir(&model_dir).unwrap();
    fs::write(
        model_dir.join("labelmap.pbtxt"),
        "item {\n  id: 1\n  name: 'screw'\n}\nitem {\n  id: 2\n  name: 'nut'\n}\n",
    )
    .unwrap();

    let layout = StorageLayout::new(dir.path().join("project"));
    layout.setup().await.unwrap();

    let state = Arc::new(OrchestratorState::new(config).unwrap());
    let transport = Arc::new(RecordingTransport::default());
    let bindings = Arc::new(
        TopicBindings::new(transport.clone(), MqttTopics::default(), QoS::AtMostOnce).unwrap(),
    );
    register_callbacks(&bindings, &state).unwrap();
    bindings.subscribe_all().unwrap();

    let loader = Arc::new(loader);
    let deployment = Deployment::from_trained(
        DeploymentType::ObjectDetection,
        ModelArtifacts {
            model_dir,
            ..Default::default()
        },
        Vec::new(),
    );
    let orchestrator = Orchestrator::new(
        deployment,
        loader.clone() as Arc<dyn ModelLoader>,
        state.clone(),
        layout.clone(),
        Some(bindings.clone()),
    );

    Harness {
        dir,
        orchestrator,
        state,
        loader,
        transport,
        bindings,
        layout,
    }
}

fn camera_video_config() -> DeploymentConfig {
    DeploymentConfig {
        input_type: InputType::Video,
        camera_title: "top".to_string(),
        ..Default::default()
    }
}

fn file_count(path: &Path) -> usize {
    fs::read_dir(path).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_run_to_end_of_stream_tears_down_once() {
    let mut h = harness(FakeLoader::detector(0.9), DeploymentConfig::default()).await;
    let source = ScriptedSource::new(SourceKind::ImageFiles, 3);
    let releases = source.releases.clone();

    h.orchestrator.deploy(Box::new(source)).await.unwrap();
    assert_eq!(h.orchestrator.session_state(), SessionState::Deployed);

    let exit = h.orchestrator.run().await.unwrap();
    assert_eq!(exit, LoopExit::EndOfStream);
    assert_eq!(h.state.session_state(), SessionState::NotDeployed);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(!h.orchestrator.deployment().is_prepared());
    assert_eq!(h.state.frames(), 3);

    // MQTT subscriptions and callbacks are gone
    assert!(h.transport.calls().iter().any(|c| c == "unsub inspection/recv_frame"));
    assert!(!h.bindings.dispatch("inspection/start_record", b""));

    // A second teardown is a no-op
    h.orchestrator.end().await;
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(h.state.session_state(), SessionState::NotDeployed);
}

#[tokio::test]
async fn test_step_publishes_results_and_logs_camera_video() {
    let mut h = harness(FakeLoader::detector(0.9), camera_video_config()).await;
    h.orchestrator
        .deploy(Box::new(ScriptedSource::new(SourceKind::Camera, 2)))
        .await
        .unwrap();

    assert_eq!(h.orchestrator.step().await.unwrap(), Step::Processed { records: 1 });

    let published = h.transport.published_to("inspection/publish_results");
    assert_eq!(published.len(), 1);
    let results: serde_json::Value = serde_json::from_slice(&published[0]).unwrap();
    assert_eq!(results[0]["name"], "screw");
    assert_eq!(results[0]["probability"], "90.0%");
    assert_eq!(results[0]["view"], "top");
    assert!(h.transport.published_to("inspection/publish_frame").is_empty());

    assert_eq!(file_count(h.layout.results_dir().path()), 1);
    assert!(h.orchestrator.last_output().is_some());
    h.orchestrator.end().await;
}

#[tokio::test]
async fn test_uploaded_frames_are_not_logged_to_csv() {
    let mut h = harness(FakeLoader::detector(0.9), camera_video_config()).await;
    h.orchestrator
        .deploy(Box::new(ScriptedSource::new(SourceKind::VideoFile, 2)))
        .await
        .unwrap();

    assert_eq!(h.orchestrator.run().await.unwrap(), LoopExit::EndOfStream);
    assert_eq!(h.transport.published_to("inspection/publish_results").len(), 2);
    assert_eq!(file_count(h.layout.results_dir().path()), 0);
}

#[tokio::test]
async fn test_stop_publish_silences_results() {
    let mut h = harness(FakeLoader::detector(0.9), DeploymentConfig::default()).await;
    h.orchestrator
        .deploy(Box::new(ScriptedSource::new(SourceKind::ImageFiles, 2)))
        .await
        .unwrap();

    assert!(h.bindings.dispatch("inspection/stop_publish", b""));
    assert_eq!(h.orchestrator.step().await.unwrap(), Step::Processed { records: 1 });
    assert!(h.transport.published_to("inspection/publish_results").is_empty());
    h.orchestrator.end().await;
}

#[tokio::test]
async fn test_detections_below_threshold_produce_no_records() {
    let mut h = harness(FakeLoader::detector(0.5), DeploymentConfig::default()).await;
    h.orchestrator
        .deploy(Box::new(ScriptedSource::new(SourceKind::ImageFiles, 1)))
        .await
        .unwrap();

    assert_eq!(h.orchestrator.step().await.unwrap(), Step::Processed { records: 0 });
    assert!(h.transport.published_to("inspection/publish_results").is_empty());
    h.orchestrator.end().await;
}

#[tokio::test]
async fn test_failed_label_check_saves_ng_image() {
    let mut h = harness(FakeLoader::detector(0.9), DeploymentConfig::default()).await;
    h.orchestrator
        .deploy(Box::new(ScriptedSource::new(SourceKind::ImageFiles, 2)))
        .await
        .unwrap();

    assert!(h.bindings.dispatch(
        "inspection/view_label_check",
        br#"{"view": "top", "labels": ["screw", "nut"]}"#
    ));
    h.orchestrator.step().await.unwrap();

    let ng_dir = h.layout.ng_images_dir();
    let saved = ng_dir.list_files_with_extensions(&["png"]).await.unwrap();
    assert_eq!(saved.len(), 1);
    let name = saved[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("top_"));

    // The request was consumed by the first frame
    h.orchestrator.step().await.unwrap();
    assert_eq!(file_count(ng_dir.path()), 1);
    h.orchestrator.end().await;
}

#[tokio::test]
async fn test_passing_label_check_saves_nothing() {
    let mut h = harness(FakeLoader::detector(0.9), DeploymentConfig::default()).await;
    h.orchestrator
        .deploy(Box::new(ScriptedSource::new(SourceKind::ImageFiles, 1)))
        .await
        .unwrap();

    h.state
        .label_check()
        .on_message(br#"{"view": "top", "labels": ["screw"]}"#);
    h.orchestrator.step().await.unwrap();

    assert_eq!(file_count(h.layout.ng_images_dir().path()), 0);
    h.orchestrator.end().await;
}

#[tokio::test]
async fn test_save_frame_and_recording() {
    let mut h = harness(FakeLoader::detector(0.9), DeploymentConfig::default()).await;
    h.orchestrator
        .deploy(Box::new(ScriptedSource::new(SourceKind::ImageFiles, 3)))
        .await
        .unwrap();

    assert!(h.bindings.dispatch("inspection/save_frame", b""));
    assert!(h.bindings.dispatch("inspection/start_record", b""));
    assert_eq!(h.orchestrator.run().await.unwrap(), LoopExit::EndOfStream);

    assert_eq!(file_count(h.layout.saved_frames_dir().path()), 1);
    let recordings = h
        .layout
        .recordings_dir()
        .list_files_with_extensions(&["mjpeg"])
        .await
        .unwrap();
    assert_eq!(recordings.len(), 1);
    assert!(fs::metadata(&recordings[0]).unwrap().len() > 0);
    assert!(!h.state.is_recording());
}

#[tokio::test]
async fn test_cancel_stops_the_loop() {
    let mut h = harness(FakeLoader::detector(0.9), DeploymentConfig::default()).await;
    let source = ScriptedSource::new(SourceKind::Camera, 100);
    let releases = source.releases.clone();
    h.orchestrator.deploy(Box::new(source)).await.unwrap();

    h.state.cancel();
    assert_eq!(h.orchestrator.run().await.unwrap(), LoopExit::Cancelled);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(h.state.session_state(), SessionState::NotDeployed);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let mut h = harness(FakeLoader::detector(0.9), DeploymentConfig::default()).await;
    let first = ScriptedSource::new(SourceKind::Camera, 10);
    let first_releases = first.releases.clone();
    h.orchestrator.deploy(Box::new(first)).await.unwrap();
    h.orchestrator.step().await.unwrap();

    h.orchestrator.pause().await.unwrap();
    assert_eq!(h.state.session_state(), SessionState::Paused);
    assert_eq!(first_releases.load(Ordering::SeqCst), 1);
    assert!(h.orchestrator.deployment().is_prepared());

    // Control topics stay bound while paused
    assert!(h.bindings.dispatch("inspection/start_record", b""));
    h.state.set_record(false);

    h.orchestrator
        .resume(Box::new(ScriptedSource::new(SourceKind::Camera, 1)))
        .await
        .unwrap();
    assert_eq!(h.state.session_state(), SessionState::Deployed);
    assert_eq!(h.orchestrator.step().await.unwrap(), Step::Processed { records: 1 });
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 1);
    h.orchestrator.end().await;
}

#[tokio::test]
async fn test_resume_requires_paused_session() {
    let mut h = harness(FakeLoader::detector(0.9), DeploymentConfig::default()).await;
    let source = ScriptedSource::new(SourceKind::Camera, 1);
    let releases = source.releases.clone();

    assert!(h.orchestrator.resume(Box::new(source)).await.is_err());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(h.state.session_state(), SessionState::NotDeployed);
    assert!(h.state.session_error().is_none());
}

#[tokio::test]
async fn test_model_failure_releases_source() {
    let mut h = harness(FakeLoader::failing(), DeploymentConfig::default()).await;
    let source = ScriptedSource::new(SourceKind::Camera, 1);
    let releases = source.releases.clone();

    assert!(h.orchestrator.deploy(Box::new(source)).await.is_err());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert_eq!(h.state.session_state(), SessionState::NotDeployed);
    assert!(h
        .state
        .session_error()
        .is_some_and(|e| e.contains("corrupt model file")));
}

#[tokio::test]
async fn test_uploaded_video_is_deleted_after_run() {
    let mut h = harness(FakeLoader::detector(0.9), DeploymentConfig::default()).await;
    let path = h.dir.path().join("upload.mjpeg");
    let mut data = Vec::new();
    for shade in [10u8, 120, 240] {
        data.extend(encode_jpeg(&RgbImage::from_pixel(16, 16, Rgb([shade, shade, shade]))).unwrap());
    }
    fs::write(&path, data).unwrap();

    let video = VideoFile::open(&path, true).unwrap();
    h.orchestrator.deploy(Box::new(video)).await.unwrap();

    assert_eq!(h.orchestrator.run().await.unwrap(), LoopExit::EndOfStream);
    assert_eq!(h.transport.published_to("inspection/publish_results").len(), 3);
    assert!(!path.exists());
}

async fn assert_failed_frame_is_skipped(fault: Fault) {
    let mut h = harness(FakeLoader::faulty_on(1, fault), DeploymentConfig::default()).await;
    h.orchestrator
        .deploy(Box::new(ScriptedSource::new(SourceKind::ImageFiles, 3)))
        .await
        .unwrap();

    assert_eq!(h.orchestrator.step().await.unwrap(), Step::Processed { records: 1 });
    assert_eq!(h.orchestrator.step().await.unwrap(), Step::Skipped);
    assert_eq!(h.orchestrator.session_state(), SessionState::Deployed);
    assert_eq!(h.orchestrator.step().await.unwrap(), Step::Processed { records: 1 });
    assert_eq!(h.transport.published_to("inspection/publish_results").len(), 2);

    assert_eq!(h.orchestrator.run().await.unwrap(), LoopExit::EndOfStream);
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_inference_error_skips_only_that_frame() {
    assert_failed_frame_is_skipped(Fault::Error).await;
}

#[tokio::test]
async fn test_inference_panic_skips_only_that_frame() {
    assert_failed_frame_is_skipped(Fault::Panic).await;
}

//! MQTT topic definitions

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Role a topic plays in the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    RecvFrame,
    PublishResults,
    PublishFrame,
    StartPublish,
    StopPublish,
    StartPublishFrame,
    StopPublishFrame,
    SaveFrame,
    StartRecord,
    StopRecord,
    ViewLabelCheck,
}

impl TopicKind {
    pub const ALL: [TopicKind; 11] = [
        TopicKind::RecvFrame,
        TopicKind::PublishResults,
        TopicKind::PublishFrame,
        TopicKind::StartPublish,
        TopicKind::StopPublish,
        TopicKind::StartPublishFrame,
        TopicKind::StopPublishFrame,
        TopicKind::SaveFrame,
        TopicKind::StartRecord,
        TopicKind::StopRecord,
        TopicKind::ViewLabelCheck,
    ];

    /// Topics the runtime only publishes to and never subscribes
    pub fn is_publish_only(&self) -> bool {
        matches!(self, TopicKind::PublishResults | TopicKind::PublishFrame)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::RecvFrame => "recv_frame",
            TopicKind::PublishResults => "publish_results",
            TopicKind::PublishFrame => "publish_frame",
            TopicKind::StartPublish => "start_publish",
            TopicKind::StopPublish => "stop_publish",
            TopicKind::StartPublishFrame => "start_publish_frame",
            TopicKind::StopPublishFrame => "stop_publish_frame",
            TopicKind::SaveFrame => "save_frame",
            TopicKind::StartRecord => "start_record",
            TopicKind::StopRecord => "stop_record",
            TopicKind::ViewLabelCheck => "view_label_check",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_topic(kind: TopicKind) -> String {
    format!("inspection/{}", kind.as_str())
}

fn default_recv_frame() -> String {
    default_topic(TopicKind::RecvFrame)
}
fn default_publish_results() -> String {
    default_topic(TopicKind::PublishResults)
}
fn default_publish_frame() -> String {
    default_topic(TopicKind::PublishFrame)
}
fn default_start_publish() -> String {
    default_topic(TopicKind::StartPublish)
}
fn default_stop_publish() -> String {
    default_topic(TopicKind::StopPublish)
}
fn default_start_publish_frame() -> String {
    default_topic(TopicKind::StartPublishFrame)
}
fn default_stop_publish_frame() -> String {
    default_topic(TopicKind::StopPublishFrame)
}
fn default_save_frame() -> String {
    default_topic(TopicKind::SaveFrame)
}
fn default_start_record() -> String {
    default_topic(TopicKind::StartRecord)
}
fn default_stop_record() -> String {
    default_topic(TopicKind::StopRecord)
}
fn default_view_label_check() -> String {
    default_topic(TopicKind::ViewLabelCheck)
}

/// Topic names used by a deployment, configurable at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttTopics {
    #[serde(default = "default_recv_frame")]
    pub recv_frame: String,
    #[serde(default = "default_publish_results")]
    pub publish_results: String,
    #[serde(default = "default_publish_frame")]
    pub publish_frame: String,
    #[serde(default = "default_start_publish")]
    pub start_publish: String,
    #[serde(default = "default_stop_publish")]
    pub stop_publish: String,
    #[serde(default = "default_start_publish_frame")]
    pub start_publish_frame: String,
    #[serde(default = "default_stop_publish_frame")]
    pub stop_publish_frame: String,
    #[serde(default = "default_save_frame")]
    pub save_frame: String,
    #[serde(default = "default_start_record")]
    pub start_record: String,
    #[serde(default = "default_stop_record")]
    pub stop_record: String,
    #[serde(default = "default_view_label_check")]
    pub view_label_check: String,
}

impl Default for MqttTopics {
    fn default() -> Self {
        Self {
            recv_frame: default_recv_frame(),
            publish_results: default_publish_results(),
            publish_frame: default_publish_frame(),
            start_publish: default_start_publish(),
            stop_publish: default_stop_publish(),
            start_publish_frame: default_start_publish_frame(),
            stop_publish_frame: default_stop_publish_frame(),
            save_frame: default_save_frame(),
            start_record: default_start_record(),
            stop_record: default_stop_record(),
            view_label_check: default_view_label_check(),
        }
    }
}

impl MqttTopics {
    pub fn get(&self, kind: TopicKind) -> &str {
        match kind {
            TopicKind::RecvFrame => &self.recv_frame,
            TopicKind::PublishResults => &self.publish_results,
            TopicKind::PublishFrame => &self.publish_frame,
            TopicKind::StartPublish => &self.start_publish,
            TopicKind::StopPublish => &self.stop_publish,
            TopicKind::StartPublishFrame => &self.start_publish_frame,
            TopicKind::StopPublishFrame => &self.stop_publish_frame,
            TopicKind::SaveFrame => &self.save_frame,
            TopicKind::StartRecord => &self.start_record,
            TopicKind::StopRecord => &self.stop_record,
            TopicKind::ViewLabelCheck => &self.view_label_check,
        }
    }

    pub fn set(&mut self, kind: TopicKind, name: impl Into<String>) {
        let slot = match kind {
            TopicKind::RecvFrame => &mut self.recv_frame,
            TopicKind::PublishResults => &mut self.publish_results,
            TopicKind::PublishFrame => &mut self.publish_frame,
            TopicKind::StartPublish => &mut self.start_publish,
            TopicKind::StopPublish => &mut self.stop_publish,
            TopicKind::StartPublishFrame => &mut self.start_publish_frame,
            TopicKind::StopPublishFrame => &mut self.stop_publish_frame,
            TopicKind::SaveFrame => &mut self.save_frame,
            TopicKind::StartRecord => &mut self.start_record,
            TopicKind::StopRecord => &mut self.stop_record,
            TopicKind::ViewLabelCheck => &mut self.view_label_check,
        };
        *slot = name.into();
    }

    /// The kind currently bound to `name`, if any
    pub fn kind_of(&self, name: &str) -> Option<TopicKind> {
        TopicKind::ALL.into_iter().find(|k| self.get(*k) == name)
    }

    /// Topics the runtime subscribes to
    pub fn subscribed(&self) -> impl Iterator<Item = (TopicKind, &str)> {
        TopicKind::ALL
            .into_iter()
            .filter(|k| !k.is_publish_only())
            .map(move |k| (k, self.get(k)))
    }

    /// Every name must be non-empty, free of wildcards and unique
    pub fn validate(&self) -> Result<(), DeployError> {
        let mut seen = HashSet::new();
        for kind in TopicKind::ALL {
            let name = self.get(kind);
            validate_topic_name(name)
                .map_err(|e| DeployError::ValidationError(format!("{}: {}", kind, e)))?;
            if !seen.insert(name) {
                return Err(DeployError::ValidationError(format!(
                    "Topic '{}' is used more than once",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Check a single topic name
pub fn validate_topic_name(name: &str) -> Result<(), DeployError> {
    if name.trim().is_empty() {
        return Err(DeployError::ValidationError(
            "Topic name cannot be empty".to_string(),
        ));
    }
    if name.contains(['+', '#']) {
        return Err(DeployError::ValidationError(format!(
            "Topic '{}' must not contain wildcards",
            name
        )));
    }
    Ok(())
}

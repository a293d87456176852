//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::app::options::{AppOptions, LifecycleOptions, ModelOptions};
use crate::errors::DeployError;
use crate::inference::model::ModelArtifacts;
use crate::logs::{LogLevel, LogOptions};
use crate::models::deployment::{DeploymentConfig, DeploymentType};
use crate::mqtt::bindings::qos_from_level;
use crate::mqtt::client::MqttAddress;
use crate::mqtt::topics::MqttTopics;
use crate::storage::layout::StorageLayout;
use crate::utils::generate_uuid;
use crate::workers::mqtt;

/// Runtime settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Also log to daily files
    #[serde(default)]
    pub log_to_file: bool,

    /// Directory for log files; the project's `logs` directory when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Keep running after the frame source is exhausted
    #[serde(default)]
    pub is_persistent: bool,

    /// Project root for results, recordings and NG images
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// MQTT broker configuration
    #[serde(default)]
    pub mqtt_broker: MqttBrokerSettings,

    /// Enable MQTT worker
    #[serde(default = "default_true")]
    pub enable_mqtt_worker: bool,

    /// Shared QoS level for every topic
    #[serde(default = "default_qos")]
    pub qos: u8,

    #[serde(default)]
    pub topics: MqttTopics,

    pub model: ModelSettings,

    /// Initial deployment configuration
    #[serde(default)]
    pub deployment: DeploymentConfig,
}

fn default_true() -> bool {
    true
}

fn default_qos() -> u8 {
    1
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

/// MQTT broker settings
#[derive(Debug, Clone, Deserialize)]
pub struct MqttBrokerSettings {
    /// Broker host
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Use TLS
    #[serde(default)]
    pub tls: bool,

    /// Optional path to a PEM-encoded CA certificate for broker TLS verification.
    /// When absent, the system certificate store is used.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

// Brokers drop the older of two sessions sharing a client id
fn default_client_id() -> String {
    format!("visagent-{}", &generate_uuid()[..8])
}

fn default_keep_alive() -> u64 {
    30
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl Default for MqttBrokerSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            tls: false,
            ca_cert_path: None,
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

impl MqttBrokerSettings {
    pub fn address(&self) -> MqttAddress {
        MqttAddress {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.tls,
            ca_cert_path: self.ca_cert_path.clone(),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
        }
    }
}

/// Model section
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    /// Task type, e.g. `"object_detection"`
    #[serde(deserialize_with = "deserialize_task")]
    pub task: DeploymentType,

    #[serde(flatten)]
    pub artifacts: ModelArtifacts,

    /// Class names in output order; read from the label map when empty
    #[serde(default)]
    pub class_names: Vec<String>,
}

fn deserialize_task<'de, D>(deserializer: D) -> Result<DeploymentType, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer)?
        .parse()
        .map_err(serde::de::Error::custom)
}

impl Settings {
    /// Check everything that can be checked before connecting anywhere
    pub fn validate(&self) -> Result<(), DeployError> {
        qos_from_level(self.qos)?;
        self.topics.validate()?;
        self.deployment.validate()?;
        Ok(())
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            log_level: self.log_level.clone(),
            file_output: self.log_to_file,
            log_dir: self
                .log_dir
                .clone()
                .unwrap_or_else(|| self.layout().logs_dir().path().to_path_buf()),
            json_format: self.json_logs,
            ..Default::default()
        }
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.project_root)
    }

    /// Runtime options; the frame source is chosen by the caller
    pub fn app_options(&self) -> AppOptions {
        AppOptions {
            lifecycle: LifecycleOptions {
                is_persistent: self.is_persistent,
                ..Default::default()
            },
            layout: self.layout(),
            model: ModelOptions {
                task: self.model.task,
                artifacts: self.model.artifacts.clone(),
                class_names: self.model.class_names.clone(),
            },
            deployment: self.deployment.clone(),
            enable_mqtt_worker: self.enable_mqtt_worker,
            mqtt_worker: mqtt::Options {
                broker_address: self.mqtt_broker.address(),
                ..Default::default()
            },
            topics: self.topics.clone(),
            qos: self.qos,
            ..Default::default()
        }
    }
}

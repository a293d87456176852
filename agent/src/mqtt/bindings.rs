//! Topic binding table
//!
//! Maps subscribed topic names to callbacks. Every mutation and every
//! lookup goes through one lock, so a rename is never observed half-done
//! by the network worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rumqttc::QoS;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::mqtt::topics::{validate_topic_name, MqttTopics, TopicKind};

/// Callback run on the network worker for each inbound message
pub type Callback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// What the control plane needs from an MQTT connection
#[async_trait]
pub trait MqttTransport: Send + Sync {
    /// Queue a subscription without waiting on the network
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), DeployError>;

    /// Queue an unsubscription without waiting on the network
    fn unsubscribe(&self, topic: &str) -> Result<(), DeployError>;

    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), DeployError>;
}

/// Convert an integer QoS level
pub fn qos_from_level(level: u8) -> Result<QoS, DeployError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(DeployError::ValidationError(format!(
            "QoS must be 0, 1 or 2, got {}",
            other
        ))),
    }
}

struct Table {
    topics: MqttTopics,
    qos: QoS,
    callbacks: HashMap<String, Callback>,
    subscribed: bool,
}

pub struct TopicBindings {
    transport: Arc<dyn MqttTransport>,
    table: Mutex<Table>,
}

impl TopicBindings {
    pub fn new(
        transport: Arc<dyn MqttTransport>,
        topics: MqttTopics,
        qos: QoS,
    ) -> Result<Self, DeployError> {
        topics.validate()?;
        Ok(Self {
            transport,
            table: Mutex::new(Table {
                topics,
                qos,
                callbacks: HashMap::new(),
                subscribed: false,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn transport(&self) -> Arc<dyn MqttTransport> {
        self.transport.clone()
    }

    pub fn topics(&self) -> MqttTopics {
        self.lock().topics.clone()
    }

    pub fn topic(&self, kind: TopicKind) -> String {
        self.lock().topics.get(kind).to_string()
    }

    pub fn qos(&self) -> QoS {
        self.lock().qos
    }

    pub fn is_bound(&self, topic: &str) -> bool {
        self.lock().callbacks.contains_key(topic)
    }

    /// Bind a callback to the topic currently named for `kind`
    pub fn bind(&self, kind: TopicKind, callback: Callback) -> Result<(), DeployError> {
        if kind.is_publish_only() {
            return Err(DeployError::ValidationError(format!(
                "{} is publish-only and cannot be bound",
                kind
            )));
        }
        let mut table = self.lock();
        let name = table.topics.get(kind).to_string();
        table.callbacks.insert(name, callback);
        Ok(())
    }

    /// Subscribe every non publish-only topic at the session QoS
    pub fn subscribe_all(&self) -> Result<(), DeployError> {
        let mut table = self.lock();
        self.subscribe_table(&table)?;
        table.subscribed = true;
        info!("Subscribed to MQTT control topics at {:?}", table.qos);
        Ok(())
    }

    /// Resubscribe after a reconnect. A table that was never subscribed,
    /// or was reset since, stays unsubscribed. Returns whether anything
    /// was subscribed.
    pub fn restore_subscriptions(&self) -> Result<bool, DeployError> {
        let table = self.lock();
        if !table.subscribed {
            return Ok(false);
        }
        self.subscribe_table(&table)?;
        Ok(true)
    }

    fn subscribe_table(&self, table: &Table) -> Result<(), DeployError> {
        for (kind, name) in table.topics.subscribed() {
            self.transport.subscribe(name, table.qos)?;
            debug!("Subscribed {} to {}", kind, name);
        }
        Ok(())
    }

    /// Rename a topic: unsubscribe the old name, move its callback, store
    /// the new name and subscribe it, all under the table lock
    pub fn rename(&self, kind: TopicKind, new_name: &str) -> Result<(), DeployError> {
        validate_topic_name(new_name)?;

        let mut table = self.lock();
        let old_name = table.topics.get(kind).to_string();
        if old_name == new_name {
            debug!("Topic {} unchanged", kind);
            return Ok(());
        }
        if let Some(other) = table.topics.kind_of(new_name) {
            return Err(DeployError::ValidationError(format!(
                "Topic '{}' is already used by {}",
                new_name, other
            )));
        }

        let listens = table.subscribed && !kind.is_publish_only();
        if listens {
            self.transport.unsubscribe(&old_name)?;
        }
        let callback = table.callbacks.remove(&old_name);
        table.topics.set(kind, new_name);
        if let Some(callback) = callback {
            table.callbacks.insert(new_name.to_string(), callback);
        }
        if listens {
            self.transport.subscribe(new_name, table.qos)?;
        }

        info!("Renamed {} topic from '{}' to '{}'", kind, old_name, new_name);
        Ok(())
    }

    /// Change the shared QoS and resubscribe every topic at the new level
    pub fn set_qos(&self, level: u8) -> Result<(), DeployError> {
        let qos = qos_from_level(level)?;
        let mut table = self.lock();
        if table.qos == qos {
            return Ok(());
        }
        table.qos = qos;
        if table.subscribed {
            for (_, name) in table.topics.subscribed() {
                self.transport.unsubscribe(name)?;
            }
            for (_, name) in table.topics.subscribed() {
                self.transport.subscribe(name, qos)?;
            }
        }
        info!("MQTT QoS set to {:?}", qos);
        Ok(())
    }

    /// Run the callback bound to `topic`. Returns whether one was found.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> bool {
        let callback = self.lock().callbacks.get(topic).cloned();
        match callback {
            Some(callback) => {
                callback(payload);
                true
            }
            None => {
                debug!("No binding for topic {}", topic);
                false
            }
        }
    }

    /// Unsubscribe everything and drop all callbacks
    pub fn reset(&self) {
        let mut table = self.lock();
        if table.subscribed {
            for (_, name) in table.topics.subscribed() {
                if let Err(e) = self.transport.unsubscribe(name) {
                    warn!("Failed to unsubscribe {}: {}", name, e);
                }
            }
        }
        table.callbacks.clear();
        table.subscribed = false;
        info!("MQTT control state reset");
    }
}

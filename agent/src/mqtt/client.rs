//! MQTT client implementation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::mqtt::bindings::MqttTransport;

/// MQTT broker address and session options
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keep_alive: Duration,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 1883,
            use_tls: false,
            ca_cert_path: None,
            client_id: "visagent".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Event surfaced by [`MqttClient::poll`]
#[derive(Debug, Clone)]
pub enum MqttEvent {
    /// The broker accepted the connection; subscriptions must be restored
    Connected,
    Message(MqttMessage),
}

/// MQTT message
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Cloneable publishing and subscription handle
#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
}

#[async_trait]
impl MqttTransport for MqttHandle {
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), DeployError> {
        self.client
            .try_subscribe(topic, qos)
            .map_err(|e| DeployError::MqttError(format!("subscribe {}: {}", topic, e)))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), DeployError> {
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| DeployError::MqttError(format!("unsubscribe {}: {}", topic, e)))
    }

    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), DeployError> {
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| DeployError::MqttError(e.to_string()))?;
        debug!("Published to: {}", topic);
        Ok(())
    }
}

/// MQTT client wrapper
pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttClient {
    /// Create a new MQTT client. No network traffic happens until polled.
    pub fn new(address: &MqttAddress) -> Result<Self, DeployError> {
        if address.host.is_empty() {
            return Err(DeployError::MqttError("MQTT host is not configured".to_string()));
        }

        let mut options = MqttOptions::new(&address.client_id, &address.host, address.port);
        options.set_keep_alive(address.keep_alive);
        if let Some(ref username) = address.username {
            let password = address
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            options.set_credentials(username, password);
        }

        if address.use_tls {
            use rumqttc::{TlsConfiguration, Transport};
            use rustls::ClientConfig;

            let mut root_cert_store = rustls::RootCertStore::empty();

            if let Some(ref ca_path) = address.ca_cert_path {
                let ca_pem = std::fs::read(ca_path).map_err(|e| {
                    DeployError::MqttError(format!("Failed to read CA cert {ca_path}: {e}"))
                })?;
                let mut cursor = std::io::Cursor::new(ca_pem);
                for cert in rustls_pemfile::certs(&mut cursor).flatten() {
                    let _ = root_cert_store.add(cert);
                }
            } else {
                for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
                    let _ = root_cert_store.add(cert);
                }
            }

            let client_config = ClientConfig::builder()
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(client_config),
            )));
        }

        let (client, eventloop) = AsyncClient::new(options, 10);

        Ok(Self { client, eventloop })
    }

    pub fn handle(&self) -> MqttHandle {
        MqttHandle {
            client: self.client.clone(),
        }
    }

    /// Drive the event loop until the broker acknowledges the connection
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), DeployError> {
        let wait = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(DeployError::MqttError(e.to_string())),
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => {
                result?;
                info!("MQTT connected");
                Ok(())
            }
            Err(_) => Err(DeployError::MqttError(format!(
                "No connection acknowledgement within {:?}",
                timeout
            ))),
        }
    }

    /// Poll for events
    pub async fn poll(&mut self) -> Result<Option<MqttEvent>, DeployError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received message on topic: {}", publish.topic);
                Ok(Some(MqttEvent::Message(MqttMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                })))
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                Ok(Some(MqttEvent::Connected))
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
                Ok(None)
            }
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("MQTT poll error: {}", e);
                Err(DeployError::MqttError(e.to_string()))
            }
        }
    }

    /// Disconnect from broker, consuming the client
    pub async fn disconnect(self) -> Result<(), DeployError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| DeployError::MqttError(e.to_string()))?;
        info!("MQTT disconnected");
        Ok(())
    }
}

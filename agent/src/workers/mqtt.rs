//! MQTT worker delivering control messages to the topic bindings

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::mqtt::bindings::TopicBindings;
use crate::mqtt::client::{MqttAddress, MqttClient, MqttEvent};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// MQTT worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// MQTT broker address
    pub broker_address: MqttAddress,

    /// How long to wait for the first connection acknowledgement
    pub connect_timeout: Duration,

    /// Backoff between reconnect attempts
    pub reconnect_cooldown: CooldownOptions,

    /// Consecutive poll failures before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            broker_address: MqttAddress::default(),
            connect_timeout: Duration::from_secs(10),
            reconnect_cooldown: CooldownOptions {
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(30),
                ..Default::default()
            },
            max_reconnect_attempts: 10,
        }
    }
}

/// Run the MQTT worker until shutdown or until reconnecting fails too often.
///
/// The client must already be connected and the bindings subscribed.
pub async fn run<S, F>(
    options: &Options,
    mut client: MqttClient,
    bindings: Arc<TopicBindings>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("MQTT worker starting...");

    let mut failures = 0;

    loop {
        let polled = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("MQTT worker shutting down");
                break;
            }
            polled = client.poll() => polled,
        };

        match polled {
            Ok(Some(MqttEvent::Message(msg))) => {
                failures = 0;
                if !bindings.dispatch(&msg.topic, &msg.payload) {
                    debug!("Ignored message on topic: {}", msg.topic);
                }
            }
            Ok(Some(MqttEvent::Connected)) => {
                if failures > 0 {
                    info!("MQTT reconnected");
                }
                failures = 0;
                match bindings.restore_subscriptions() {
                    Ok(true) => info!("Restored MQTT subscriptions"),
                    Ok(false) => debug!("No active bindings to restore"),
                    Err(e) => error!("Failed to restore subscriptions: {}", e),
                }
            }
            Ok(None) => {}
            Err(e) => {
                failures += 1;
                if failures >= options.max_reconnect_attempts {
                    error!("Max reconnect attempts reached, giving up: {}", e);
                    break;
                }
                let delay = calc_exp_backoff(&options.reconnect_cooldown, failures - 1);
                warn!(
                    "MQTT connection lost ({}), reconnect attempt {} in {:?}",
                    e, failures, delay
                );
                sleep_fn(delay).await;
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        debug!("MQTT disconnect: {}", e);
    }
}

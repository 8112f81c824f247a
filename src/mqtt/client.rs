use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::MqttMessage;
use super::transport::MqttTransport;
use crate::config::MqttConfig;
use crate::topic::DISCOVERY_SUBSCRIPTION;
use crate::transport::TopicCallbacks;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Owns the rumqttc event loop and the transport handle the core publishes through.
pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    transport: Arc<MqttTransport>,
}

impl MqttClient {
    pub fn new(config: &MqttConfig) -> Self {
        let mut mqttopts = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        mqttopts.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            mqttopts.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);
        let transport = Arc::new(MqttTransport::new(
            client.clone(),
            Arc::new(TopicCallbacks::new()),
        ));

        Self {
            client,
            eventloop,
            transport,
        }
    }

    pub fn transport(&self) -> Arc<MqttTransport> {
        Arc::clone(&self.transport)
    }

    /// Poll the event loop forever, forwarding every inbound publish to `tx`.
    ///
    /// Each (re)connect subscribes the discovery topic and every entity topic
    /// in the callback table. Connection errors are retried after a fixed delay.
    pub async fn run(mut self, tx: mpsc::Sender<MqttMessage>) {
        let callbacks = self.transport.callbacks();

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    // Off the polling task: the request queue only drains while we poll.
                    tokio::spawn(resubscribe(self.client.clone(), Arc::clone(&callbacks)));
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let msg = MqttMessage {
                        topic: publish.topic.clone(),
                        payload: String::from_utf8_lossy(&publish.payload).to_string(),
                    };
                    if tx.send(msg).await.is_err() {
                        warn!("Router channel closed, stopping MQTT loop");
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {}. Reconnecting...", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

async fn resubscribe(client: AsyncClient, callbacks: Arc<TopicCallbacks>) {
    let topics = std::iter::once(DISCOVERY_SUBSCRIPTION.to_string()).chain(callbacks.topics());
    for topic in topics {
        debug!("Subscribing to {}", topic);
        if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
            error!("Failed to subscribe to {}: {}", topic, e);
        }
    }
}

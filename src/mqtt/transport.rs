use std::sync::Arc;

use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{MessageCallback, Qos, Substate, TopicCallbacks, Transport};

/// Broker subscription as tracked by [`MqttTransport`].
#[derive(Debug)]
struct BrokerSubscription {
    topic: String,
}

/// [`Transport`] over a rumqttc client.
///
/// Callbacks go into a [`TopicCallbacks`] table that the router dispatches
/// from; this type never reads the event loop itself.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    callbacks: Arc<TopicCallbacks>,
}

impl MqttTransport {
    pub fn new(client: AsyncClient, callbacks: Arc<TopicCallbacks>) -> Self {
        Self { client, callbacks }
    }

    pub fn callbacks(&self) -> Arc<TopicCallbacks> {
        Arc::clone(&self.callbacks)
    }
}

fn qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos_level: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        debug!("Publishing {}: {}", topic, payload);
        self.client
            .publish(topic, qos(qos_level), retain, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        _prior: Option<Substate>,
        topic: &str,
        callback: MessageCallback,
    ) -> Result<Substate, TransportError> {
        // Registered first so a retained message arriving right after SUBACK is not lost.
        self.callbacks.insert(topic, callback);
        if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
            self.callbacks.remove(topic);
            return Err(e.into());
        }
        Ok(Substate::new(BrokerSubscription {
            topic: topic.to_string(),
        }))
    }

    async fn unsubscribe(&self, substate: Substate) -> Result<Option<Substate>, TransportError> {
        let subscription = substate
            .downcast_ref::<BrokerSubscription>()
            .ok_or(TransportError::ForeignSubstate)?;
        self.callbacks.remove(&subscription.topic);
        self.client.unsubscribe(subscription.topic.as_str()).await?;
        Ok(None)
    }
}

//! Recording transport for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::transport::{MessageCallback, Qos, Substate, Transport, TopicCallbacks};

struct MockSubscription {
    topic: String,
}

struct MockResidue;

#[derive(Default)]
pub struct MockTransport {
    callbacks: Arc<TopicCallbacks>,
    published: Mutex<Vec<(String, String)>>,
    publish_options: Mutex<Option<(Qos, bool)>>,
    subscribed: Mutex<Vec<String>>,
    priors: Mutex<Vec<bool>>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    yield_during_calls: AtomicBool,
    leave_residue: AtomicBool,
}

impl MockTransport {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn callbacks(&self) -> Arc<TopicCallbacks> {
        Arc::clone(&self.callbacks)
    }

    /// Simulate an inbound broker message.
    pub fn deliver(&self, topic: &str, payload: &str) -> bool {
        self.callbacks.dispatch(topic, payload)
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    pub fn last_publish_options(&self) -> Option<(Qos, bool)> {
        *self.publish_options.lock()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscribed.lock().clone()
    }

    pub fn priors_seen(&self) -> Vec<bool> {
        self.priors.lock().clone()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_publish(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_subscribe(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    /// Make subscribe and unsubscribe suspend once before doing their work.
    pub fn yield_during_calls(&self) {
        self.yield_during_calls.store(true, Ordering::SeqCst);
    }

    pub fn leave_residue_on_unsubscribe(&self) {
        self.leave_residue.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.fail_publish.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.published
            .lock()
            .push((topic.to_string(), payload.to_string()));
        *self.publish_options.lock() = Some((qos, retain));
        Ok(())
    }

    async fn subscribe(
        &self,
        prior: Option<Substate>,
        topic: &str,
        callback: MessageCallback,
    ) -> Result<Substate, TransportError> {
        if self.yield_during_calls.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self.fail_subscribe.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.priors.lock().push(prior.is_some());
        self.subscribed.lock().push(topic.to_string());
        self.callbacks.insert(topic, callback);
        Ok(Substate::new(MockSubscription {
            topic: topic.to_string(),
        }))
    }

    async fn unsubscribe(&self, substate: Substate) -> Result<Option<Substate>, TransportError> {
        if self.yield_during_calls.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        let subscription = substate
            .downcast_ref::<MockSubscription>()
            .ok_or(TransportError::ForeignSubstate)?;
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.callbacks.remove(&subscription.topic);

        if self.leave_residue.load(Ordering::SeqCst) {
            Ok(Some(Substate::new(MockResidue)))
        } else {
            Ok(None)
        }
    }
}

//! Subscription bookkeeping against the one physical broker connection.
//!
//! Each `(owner, topic)` pair gets at most one live broker subscription no
//! matter how often it is requested. Calls for the same pair are serialised
//! through a per-key async mutex; calls for different pairs never wait on
//! each other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entity::EntityIdentity;
use crate::error::TransportError;
use crate::transport::{MessageCallback, Substate, Transport};

/// Map key for one subscription: who asked, and for which topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub owner: EntityIdentity,
    pub topic: String,
}

impl SubscriptionKey {
    pub fn new(owner: &EntityIdentity, topic: &str) -> Self {
        Self {
            owner: owner.clone(),
            topic: topic.to_string(),
        }
    }
}

enum Slot {
    Live(Substate),
    /// Left behind by a partial teardown; handed back on the next subscribe.
    Residual(Substate),
}

type SlotCell = Arc<Mutex<Option<Slot>>>;

#[derive(Default)]
pub struct SubscriptionRegistry {
    slots: DashMap<SubscriptionKey, SlotCell>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &SubscriptionKey) -> SlotCell {
        // The shard guard is dropped at the end of this statement, before any await.
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }

    /// Subscribe `owner` to `topic` unless it already is. A transport
    /// failure leaves the stored state unchanged.
    pub async fn subscribe(
        &self,
        transport: &dyn Transport,
        owner: &EntityIdentity,
        topic: &str,
        callback: MessageCallback,
    ) -> Result<(), TransportError> {
        let key = SubscriptionKey::new(owner, topic);
        let cell = self.cell(&key);
        let mut slot = cell.lock().await;

        let prior = match slot.as_ref() {
            Some(Slot::Live(_)) => {
                debug!("{} already subscribed to {}", owner, topic);
                return Ok(());
            }
            Some(Slot::Residual(substate)) => Some(substate.clone()),
            None => None,
        };

        match transport.subscribe(prior, topic, callback).await {
            Ok(substate) => {
                *slot = Some(Slot::Live(substate));
                debug!("{} subscribed to {}", owner, topic);
                Ok(())
            }
            Err(e) => {
                drop(slot);
                self.prune(&key, cell);
                Err(e)
            }
        }
    }

    /// Release `owner`'s subscription to `topic`, if there is one. On a
    /// transport failure the subscription stays recorded as live.
    pub async fn unsubscribe(
        &self,
        transport: &dyn Transport,
        owner: &EntityIdentity,
        topic: &str,
    ) -> Result<(), TransportError> {
        let key = SubscriptionKey::new(owner, topic);
        let Some(cell) = self.slots.get(&key).map(|entry| Arc::clone(entry.value())) else {
            debug!("{} has no subscription to {}", owner, topic);
            return Ok(());
        };
        let mut slot = cell.lock().await;

        let live = match slot.as_ref() {
            Some(Slot::Live(substate)) => Some(substate.clone()),
            _ => None,
        };
        let Some(substate) = live else {
            debug!("{} has no live subscription to {}", owner, topic);
            drop(slot);
            self.prune(&key, cell);
            return Ok(());
        };

        let released = transport.unsubscribe(substate).await;
        if let Ok(residue) = released.as_ref() {
            *slot = residue.clone().map(Slot::Residual);
            debug!("{} unsubscribed from {}", owner, topic);
        }
        drop(slot);
        self.prune(&key, cell);
        released.map(|_| ())
    }

    /// Whether `owner` currently holds a live subscription to `topic`.
    pub async fn is_subscribed(&self, owner: &EntityIdentity, topic: &str) -> bool {
        let key = SubscriptionKey::new(owner, topic);
        let Some(cell) = self.slots.get(&key).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let slot = cell.lock().await;
        let live = matches!(*slot, Some(Slot::Live(_)));
        drop(slot);
        self.prune(&key, cell);
        live
    }

    /// Drop `key` from the map if its cell is empty and `cell` was the last
    /// handle outside the map. Whoever releases the cell last does the removal.
    fn prune(&self, key: &SubscriptionKey, cell: SlotCell) {
        drop(cell);
        self.slots.remove_if(key, |_, held| {
            Arc::strong_count(held) == 1 && held.try_lock().is_ok_and(|slot| slot.is_none())
        });
    }

    /// Number of keys with a live or residual entry.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockTransport;
    use crate::topic::EntityKind;

    fn owner(serial: u64) -> EntityIdentity {
        EntityIdentity::new(serial, "dev-1", EntityKind::Relay, 0)
    }

    fn noop() -> MessageCallback {
        Arc::new(|_, _| {})
    }

    #[tokio::test]
    async fn should_subscribe_once_for_repeated_calls() {
        let transport = MockTransport::shared();
        let registry = SubscriptionRegistry::new();

        registry.subscribe(transport.as_ref(), &owner(1), "t", noop()).await.unwrap();
        registry.subscribe(transport.as_ref(), &owner(1), "t", noop()).await.unwrap();

        assert_eq!(transport.subscribe_calls(), 1);
        assert!(registry.is_subscribed(&owner(1), "t").await);
    }

    #[tokio::test]
    async fn should_subscribe_once_for_concurrent_calls() {
        let transport = MockTransport::shared();
        transport.yield_during_calls();
        let registry = SubscriptionRegistry::new();
        let a = owner(1);

        let (r1, r2, r3) = tokio::join!(
            registry.subscribe(transport.as_ref(), &a, "t", noop()),
            registry.subscribe(transport.as_ref(), &a, "t", noop()),
            registry.subscribe(transport.as_ref(), &a, "t", noop()),
        );
        assert!(r1.is_ok() && r2.is_ok() && r3.is_ok());
        assert_eq!(transport.subscribe_calls(), 1);
    }

    #[tokio::test]
    async fn should_keep_distinct_owners_apart() {
        let transport = MockTransport::shared();
        let registry = SubscriptionRegistry::new();

        registry.subscribe(transport.as_ref(), &owner(1), "t", noop()).await.unwrap();
        registry.subscribe(transport.as_ref(), &owner(2), "t", noop()).await.unwrap();

        assert_eq!(transport.subscribe_calls(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn should_not_hold_other_keys_while_one_is_pending() {
        let transport = MockTransport::shared();
        transport.yield_during_calls();
        let registry = SubscriptionRegistry::new();

        let a = owner(1);

        let (r1, r2) = tokio::join!(
            registry.subscribe(transport.as_ref(), &a, "a", noop()),
            registry.subscribe(transport.as_ref(), &a, "b", noop()),
        );
        assert!(r1.is_ok() && r2.is_ok());
        assert_eq!(transport.subscribe_calls(), 2);
    }

    #[tokio::test]
    async fn should_forget_key_after_unsubscribe() {
        let transport = MockTransport::shared();
        let registry = SubscriptionRegistry::new();
        let a = owner(1);

        registry.subscribe(transport.as_ref(), &a, "t", noop()).await.unwrap();
        registry.unsubscribe(transport.as_ref(), &a, "t").await.unwrap();

        assert_eq!(transport.unsubscribe_calls(), 1);
        assert!(!registry.is_subscribed(&a, "t").await);
        assert!(registry.is_empty());

        registry.subscribe(transport.as_ref(), &a, "t", noop()).await.unwrap();
        assert_eq!(transport.subscribe_calls(), 2);
    }

    #[tokio::test]
    async fn should_ignore_unsubscribe_without_subscription() {
        let transport = MockTransport::shared();
        let registry = SubscriptionRegistry::new();

        registry.unsubscribe(transport.as_ref(), &owner(1), "t").await.unwrap();
        assert_eq!(transport.unsubscribe_calls(), 0);
    }

    #[tokio::test]
    async fn should_hand_back_residual_state_on_resubscribe() {
        let transport = MockTransport::shared();
        transport.leave_residue_on_unsubscribe();
        let registry = SubscriptionRegistry::new();
        let a = owner(1);

        registry.subscribe(transport.as_ref(), &a, "t", noop()).await.unwrap();
        registry.unsubscribe(transport.as_ref(), &a, "t").await.unwrap();
        assert!(!registry.is_subscribed(&a, "t").await);
        assert_eq!(registry.len(), 1);

        registry.subscribe(transport.as_ref(), &a, "t", noop()).await.unwrap();
        assert_eq!(transport.priors_seen(), vec![false, true]);
    }

    #[tokio::test]
    async fn should_leave_state_untouched_when_subscribe_fails() {
        let transport = MockTransport::shared();
        transport.fail_next_subscribe();
        let registry = SubscriptionRegistry::new();
        let a = owner(1);

        assert!(registry.subscribe(transport.as_ref(), &a, "t", noop()).await.is_err());
        assert!(registry.is_empty());
        assert!(!registry.is_subscribed(&a, "t").await);

        registry.subscribe(transport.as_ref(), &a, "t", noop()).await.unwrap();
        assert!(registry.is_subscribed(&a, "t").await);
    }

    #[tokio::test]
    async fn should_not_keep_keys_for_failed_subscribes() {
        let transport = MockTransport::shared();
        let registry = SubscriptionRegistry::new();
        let a = owner(1);

        for topic in ["t0", "t1", "t2", "t3", "t4"] {
            transport.fail_next_subscribe();
            assert!(registry.subscribe(transport.as_ref(), &a, topic, noop()).await.is_err());
        }

        assert_eq!(transport.subscribe_calls(), 0);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn should_not_keep_keys_after_lookups_of_unknown_pairs() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.is_subscribed(&owner(1), "t").await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn should_forget_key_when_lookup_races_unsubscribe() {
        let transport = MockTransport::shared();
        transport.yield_during_calls();
        let registry = SubscriptionRegistry::new();
        let a = owner(1);
        registry.subscribe(transport.as_ref(), &a, "t", noop()).await.unwrap();

        let (released, _) = tokio::join!(
            registry.unsubscribe(transport.as_ref(), &a, "t"),
            registry.is_subscribed(&a, "t"),
        );

        released.unwrap();
        assert!(registry.is_empty());
    }
}

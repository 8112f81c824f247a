//! Shutter entity: a motorised cover driven by a relay pair.

use std::fmt;

use crate::error::{PayloadError, TransportError};
use crate::topic::EntityKind;

use super::{Entity, EntityState};

pub const SHUTTER_CMD_OPEN: &str = "OPEN";
pub const SHUTTER_CMD_CLOSE: &str = "CLOSE";
pub const SHUTTER_CMD_STOP: &str = "STOP";

/// Position reported by the device. Only inbound echoes move it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutterState {
    #[default]
    Unknown,
    Opening,
    Open,
    Closing,
    Closed,
}

impl ShutterState {
    /// Parse an inbound state token. Tokens are case-sensitive.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "OPENING" => Some(Self::Opening),
            "OPEN" => Some(Self::Open),
            "CLOSING" => Some(Self::Closing),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Opening => "OPENING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ShutterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EntityState for ShutterState {
    const KIND: EntityKind = EntityKind::Shutter;

    fn apply(&mut self, payload: &str) -> Result<(), PayloadError> {
        *self = Self::from_token(payload)
            .ok_or_else(|| PayloadError::UnknownToken(payload.to_string()))?;
        Ok(())
    }
}

pub type Shutter = Entity<ShutterState>;

impl Entity<ShutterState> {
    pub async fn open(&self) -> Result<(), TransportError> {
        self.set_state(SHUTTER_CMD_OPEN).await
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        self.set_state(SHUTTER_CMD_CLOSE).await
    }

    pub async fn stop(&self) -> Result<(), TransportError> {
        self.set_state(SHUTTER_CMD_STOP).await
    }

    pub fn state(&self) -> ShutterState {
        self.with_state(|s| *s)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::client::Client;
    use crate::test_support::MockTransport;

    const STATE: &str = "pglab/board/shutter/1/state";

    async fn subscribed_shutter() -> (Arc<MockTransport>, Shutter) {
        let transport = MockTransport::shared();
        let client = Arc::new(Client::new(transport.clone()));
        let shutter = Shutter::new(client, "dev-1", "board", 1, ShutterState::default()).unwrap();
        shutter.subscribe_topics().await.unwrap();
        (transport, shutter)
    }

    #[tokio::test]
    async fn should_start_unknown() {
        let (_, shutter) = subscribed_shutter().await;
        assert_eq!(shutter.state(), ShutterState::Unknown);
    }

    #[tokio::test]
    async fn should_publish_command_tokens() {
        let (transport, shutter) = subscribed_shutter().await;
        shutter.open().await.unwrap();
        shutter.stop().await.unwrap();
        shutter.close().await.unwrap();

        let payloads: Vec<String> = transport.published().into_iter().map(|(_, p)| p).collect();
        assert_eq!(payloads, vec!["OPEN", "STOP", "CLOSE"]);
        assert!(
            transport
                .published()
                .iter()
                .all(|(topic, _)| topic == "pglab/board/shutter/1/set")
        );
        assert_eq!(shutter.state(), ShutterState::Unknown);
    }

    #[tokio::test]
    async fn should_report_only_echoed_states_while_opening() {
        let (transport, shutter) = subscribed_shutter().await;
        let (tx, mut rx) = mpsc::channel(8);
        shutter.set_state_listener(tx);

        transport.deliver(STATE, "CLOSED");
        let mut observed = vec![shutter.state()];

        shutter.open().await.unwrap();
        assert_eq!(shutter.state(), ShutterState::Closed);

        transport.deliver(STATE, "OPENING");
        observed.push(shutter.state());
        transport.deliver(STATE, "OPEN");
        observed.push(shutter.state());

        assert_eq!(
            observed,
            vec![ShutterState::Closed, ShutterState::Opening, ShutterState::Open]
        );

        let mut notified = Vec::new();
        while let Ok(update) = rx.try_recv() {
            notified.push(update.payload);
        }
        assert_eq!(notified, vec!["CLOSED", "OPENING", "OPEN"]);
    }

    #[tokio::test]
    async fn should_ignore_unrecognised_token() {
        let (transport, shutter) = subscribed_shutter().await;
        transport.deliver(STATE, "CLOSING");
        transport.deliver(STATE, "STOP");
        transport.deliver(STATE, "open");
        assert_eq!(shutter.state(), ShutterState::Closing);
    }

    #[test]
    fn should_parse_every_state_token() {
        for state in [
            ShutterState::Opening,
            ShutterState::Open,
            ShutterState::Closing,
            ShutterState::Closed,
        ] {
            assert_eq!(ShutterState::from_token(state.as_str()), Some(state));
        }
        assert_eq!(ShutterState::from_token("UNKNOWN"), None);
    }
}

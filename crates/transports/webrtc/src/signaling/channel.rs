//! Signaling channels
//!
//! [`InProcessSignaling`] connects the two sides of a link inside one process.
//! Messages still go through their JSON encoding, so a network channel can
//! replace it without changing either side.

use super::protocol::SignalingMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Bidirectional message channel between the two sides of a link
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send a message to the other side
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signaling`] when the other side has gone away.
    async fn send(&self, message: SignalingMessage) -> Result<()>;

    /// Receive the next message, `None` once the other side has gone away
    async fn recv(&self) -> Option<SignalingMessage>;
}

/// One end of an in-process signaling pair
pub struct InProcessSignaling {
    label: String,
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
}

impl InProcessSignaling {
    /// Create a connected pair of channel ends
    pub fn pair(label: &str, capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));

        (
            Self {
                label: format!("{}:initiator", label),
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            Self {
                label: format!("{}:responder", label),
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }

    /// Label of this end
    pub fn label(&self) -> &str {
        &self.label
    }
}

#[async_trait]
impl SignalingChannel for InProcessSignaling {
    async fn send(&self, message: SignalingMessage) -> Result<()> {
        let json = message.to_json()?;
        trace!(channel = %self.label, "-> {}", json);
        self.tx
            .send(json)
            .await
            .map_err(|_| Error::Signaling(format!("{}: peer end closed", self.label)))
    }

    async fn recv(&self) -> Option<SignalingMessage> {
        let mut rx = self.rx.lock().await;
        loop {
            let json = rx.recv().await?;
            match SignalingMessage::from_json(&json) {
                Ok(message) => return Some(message),
                Err(e) => {
                    tracing::warn!(channel = %self.label, "Dropping undecodable message: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (a, b) = InProcessSignaling::pair("link", 4);
        a.send(SignalingMessage::Commit).await.unwrap();
        b.send(SignalingMessage::Committed).await.unwrap();

        assert_eq!(b.recv().await, Some(SignalingMessage::Commit));
        assert_eq!(a.recv().await, Some(SignalingMessage::Committed));
        assert_eq!(a.label(), "link:initiator");
    }

    #[tokio::test]
    async fn test_closed_peer() {
        let (a, b) = InProcessSignaling::pair("link", 4);
        drop(b);
        let err = a.send(SignalingMessage::Bye).await.unwrap_err();
        assert!(matches!(err, Error::Signaling(_)));
        assert_eq!(a.recv().await, None);
    }
}

//! In-Memory Transport
//!
//! A duplex link between two replicas built on tokio channels. Envelopes
//! travel as JSON strings, exactly as they would over a socket. Delivery
//! ordering is whatever the caller produces; replicas tolerate duplicates
//! and stale messages through nonce checks.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::network::protocol::Envelope;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The other end was dropped.
    #[error("transport closed")]
    Closed,

    /// Payload failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// One end of a duplex in-memory link.
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self { outbound: a_tx, inbound: b_rx },
            Self { outbound: b_tx, inbound: a_rx },
        )
    }

    /// Send an envelope to the other end.
    pub fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let json = envelope.to_json()?;
        debug!("-> {} (nonce {})", envelope.message.kind(), envelope.nonce);
        self.outbound.send(json).map_err(|_| TransportError::Closed)
    }

    /// Send several envelopes in order.
    pub fn send_all(&self, envelopes: &[Envelope]) -> Result<(), TransportError> {
        envelopes.iter().try_for_each(|e| self.send(e))
    }

    /// Wait for the next envelope.
    pub async fn recv(&mut self) -> Result<Envelope, TransportError> {
        let json = self.inbound.recv().await.ok_or(TransportError::Closed)?;
        Ok(Envelope::from_json(&json)?)
    }

    /// Next envelope if one is already queued.
    pub fn try_recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        match self.inbound.try_recv() {
            Ok(json) => Ok(Some(Envelope::from_json(&json)?)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Address;
    use crate::network::protocol::PeerMessage;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (left, mut right) = MemoryTransport::pair();
        let envelope = Envelope::new(Address::new([3; 20]), 5, PeerMessage::Guess { x: 1, y: 2 });
        left.send(&envelope).unwrap();
        left.send(&envelope).unwrap();
        assert_eq!(right.recv().await.unwrap(), envelope);
        // Duplicates are delivered as-is; the replica filters them.
        assert_eq!(right.try_recv().unwrap(), Some(envelope));
        assert_eq!(right.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_peer() {
        let (left, right) = MemoryTransport::pair();
        drop(right);
        let envelope = Envelope::new(Address::new([3; 20]), 1, PeerMessage::Guess { x: 0, y: 0 });
        assert!(matches!(left.send(&envelope), Err(TransportError::Closed)));
    }
}

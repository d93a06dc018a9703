use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use vroom_core::TransportId;

use crate::protocol::ClientSignal;

/// Frame queued for a client socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Close the socket after draining what is queued
    Close,
}

/// Transport handle -> outbound queue for every connected client.
///
/// Sends never block: a full or closed queue drops the frame.
#[derive(Debug)]
pub struct ClientHub {
    transports: DashMap<TransportId, mpsc::Sender<Outbound>>,
    buffer: usize,
}

impl ClientHub {
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            transports: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Attach a client socket; replaces any previous queue for the handle
    pub fn register(&self, transport: TransportId) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.transports.insert(transport.clone(), tx);
        debug!(transport = %transport, "Client transport registered");
        rx
    }

    pub fn unregister(&self, transport: &TransportId) {
        if self.transports.remove(transport).is_some() {
            debug!(transport = %transport, "Client transport unregistered");
        }
    }

    fn push(&self, transport: &TransportId, frame: Outbound) -> bool {
        let Some(sender) = self.transports.get(transport).map(|s| s.value().clone()) else {
            debug!(transport = %transport, "Push to unknown transport dropped");
            return false;
        };
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(transport = %transport, "Client queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(transport = %transport, "Client queue closed");
                self.transports.remove(transport);
                false
            }
        }
    }

    pub fn send(&self, transport: &TransportId, signal: &ClientSignal) -> bool {
        match serde_json::to_string(signal) {
            Ok(text) => self.push(transport, Outbound::Text(text)),
            Err(e) => {
                error!(transport = %transport, error = %e, "Failed to encode client signal");
                false
            }
        }
    }

    /// Send the same signal to many transports; returns how many accepted it
    pub fn broadcast<'a>(
        &self,
        transports: impl IntoIterator<Item = &'a TransportId>,
        signal: &ClientSignal,
    ) -> usize {
        let text = match serde_json::to_string(signal) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode client signal");
                return 0;
            }
        };
        transports
            .into_iter()
            .filter(|transport| self.push(transport, Outbound::Text(text.clone())))
            .count()
    }

    /// Pass a media-server reply through untouched
    pub fn relay(&self, transport: &TransportId, communication: &Value) -> bool {
        self.push(transport, Outbound::Text(communication.to_string()))
    }

    /// Ask the socket to close and forget the handle
    pub fn close(&self, transport: &TransportId) -> bool {
        let queued = self.push(transport, Outbound::Close);
        self.transports.remove(transport);
        queued
    }

    #[must_use]
    pub fn contains(&self, transport: &TransportId) -> bool {
        self.transports.contains_key(transport)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vroom_core::PeerId;

    #[test]
    fn test_send_and_close() {
        let hub = ClientHub::new(4);
        let transport = TransportId::from("t1");
        let mut rx = hub.register(transport.clone());

        assert!(hub.send(&transport, &ClientSignal::Hushed { by: PeerId::from("p") }));
        assert!(hub.close(&transport));
        assert!(!hub.contains(&transport));

        let Outbound::Text(text) = rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        assert!(text.contains("hushed"));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_full_queue_drops() {
        let hub = ClientHub::new(1);
        let transport = TransportId::from("t1");
        let _rx = hub.register(transport.clone());

        let value = serde_json::json!({"type": "x"});
        assert!(hub.relay(&transport, &value));
        assert!(!hub.relay(&transport, &value));
    }

    #[test]
    fn test_unknown_and_closed_transports() {
        let hub = ClientHub::new(4);
        assert!(!hub.relay(&TransportId::from("nobody"), &Value::Null));

        let transport = TransportId::from("t1");
        drop(hub.register(transport.clone()));
        assert!(!hub.relay(&transport, &Value::Null));
        assert!(hub.is_empty());
    }
}

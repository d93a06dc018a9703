use bytes::Bytes;
use tokio::sync::mpsc;

/// Router-assigned id for one accepted media-server socket
pub type ConnectionId = String;

/// Write side of a media-server connection.
///
/// Frames pushed here are drained by the connection's writer task, so a send
/// never blocks the caller and per-socket ordering is preserved.
#[derive(Debug, Clone)]
pub struct ServerLink {
    connection_id: ConnectionId,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl ServerLink {
    #[must_use]
    pub const fn new(connection_id: ConnectionId, sender: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a frame payload; returns false once the writer has gone away
    pub fn send(&self, frame: Bytes) -> bool {
        self.sender.send(frame).is_ok()
    }
}

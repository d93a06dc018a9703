use serde_json::Value;
use vroom_core::{ServerId, TransportId};

use crate::wire::{CreatedRelayProducer, Envelope};

/// Callbacks the router makes into the peer coordination layer.
///
/// The router never holds its own locks while calling these, so
/// implementations are free to call back into the router.
#[cfg_attr(test, mockall::automock)]
pub trait RouteHandler: Send + Sync {
    /// Build the per-peer consume instructions for a relay producer an egress
    /// just created. `None` means the producing peer is unknown.
    fn consumer_messages(&self, produced: &CreatedRelayProducer) -> Option<Vec<Envelope>>;

    /// A media server connection died; drop whatever depended on it
    fn drop_route(&self, server_id: &ServerId);

    /// Deliver a server reply to the client transport it names
    fn relay_to_client(&self, wsid: &TransportId, communication: Value);
}

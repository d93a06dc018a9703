//! Vroom peer coordination layer
//!
//! Tracks every connected client peer, the room it occupies and the media
//! servers serving it, and translates client commands into media-server
//! commands through the cluster's signal router.
//!
//! ## Architecture
//!
//! - **`PeerConnectionManager`**: Owns peer, room and counter state; entry point for client
//!   commands
//! - **`ClientHub`**: Outbound queues for client sockets
//! - **`RoomObserver`**: Hook invoked when a room loses its last participant
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vroom_sfu::{ClientHub, PeerConnectionManager, RoomActivityLog, RoomObserver};
//!
//! let hub = Arc::new(ClientHub::new(config.signaling.outbound_buffer));
//! let observer: Arc<dyn RoomObserver> = Arc::new(RoomActivityLog::new());
//! let manager =
//!     PeerConnectionManager::new(router, hub.clone(), &config.signaling, Some(observer));
//! let rx = hub.register(transport.clone());
//! manager.handle_text(&transport, r#"{"type":"requestIdentity","message":{"region":"ATL"}}"#);
//! ```

mod admin;
mod hub;
mod manager;
mod media;
mod observer;
mod peer;
pub mod protocol;
mod room;
mod types;

pub use hub::{ClientHub, Outbound};
pub use manager::PeerConnectionManager;
pub use media::DESKTOP_LABEL;
pub use observer::{RoomActivityLog, RoomObserver};
pub use peer::{Peer, PeerStore, ProducerIds, ProducerSlot};
pub use protocol::{ClientCommand, ClientSignal, RoomMetrics};
pub use room::{CounterStore, Room, RoomStore};
pub use types::{Direction, MediaChannel, PeerCounter, PeerRole, StreamKind, FRAME_EVENTS_LABEL};

//! Signal routing between the coordination process and media servers

pub mod connection;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod listener;
pub mod relay;
pub mod router;
pub mod wire;

pub use connection::{ConnectionId, ServerLink};
pub use discovery::{LoadSnapshot, Selection, ServerLoadEntry, ServerRegistry};
pub use error::{Error, Result};
pub use handler::RouteHandler;
pub use listener::serve;
pub use relay::{Pipe, PipeTable, RouteEntry, RoutingTable};
pub use router::SignalRouter;
pub use wire::{Envelope, MediaKind, ServerCommand, ServerMode};

//! Shared building blocks for the vroom signaling plane
//!
//! - configuration loading (file + environment)
//! - structured logging setup
//! - identifier newtypes shared by the router and the peer manager
//! - the edge-location to cluster-region table

pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod region;

pub use config::Config;
pub use error::{Error, Result};
pub use ids::{PeerId, RoomName, ServerId, TransportId};
pub use region::{resolve_region, Region};

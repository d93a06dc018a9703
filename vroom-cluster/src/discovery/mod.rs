//! Media server discovery and load-aware selection

pub mod load_balancer;
pub mod server_registry;

pub use load_balancer::Selection;
pub use server_registry::{LoadSnapshot, ServerLoadEntry, ServerRegistry};

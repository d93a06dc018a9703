//! Room routing and ingress→egress pipe bookkeeping

pub mod pipe_table;
pub mod routing_table;

pub use pipe_table::{Pipe, PipeTable};
pub use routing_table::{RouteEntry, RoutingTable};

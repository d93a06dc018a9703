//! Ingress→egress relay links
//!
//! A pipe is opened by the ingress side (`storePipeRelay`) and completed once
//! the egress side reports its own route (`connectPipeRelay`). Lookups match
//! on `(egress server, ingress route)` since the protocol carries no request id.

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use vroom_core::ServerId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipe {
    pub ingress: ServerId,
    pub egress: ServerId,
    pub ingress_route: String,
    /// Unset until the egress confirms
    pub egress_route: Option<String>,
}

impl Pipe {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.egress_route.is_some()
    }
}

#[derive(Debug, Default)]
pub struct PipeTable {
    pipes: Mutex<Vec<Pipe>>,
}

impl PipeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pipe announced by an ingress. A repeated announcement for the
    /// same endpoints and route restarts the handshake.
    pub fn open(&self, ingress: ServerId, egress: ServerId, ingress_route: String) {
        let mut pipes = self.pipes.lock();
        pipes.retain(|p| {
            !(p.ingress == ingress && p.egress == egress && p.ingress_route == ingress_route)
        });
        debug!(
            ingress = %ingress,
            egress = %egress,
            ingress_route = %ingress_route,
            "Pipe relay opened"
        );
        pipes.push(Pipe {
            ingress,
            egress,
            ingress_route,
            egress_route: None,
        });
    }

    /// Complete the pipe reported by `egress`; returns the updated pipe
    pub fn connect(
        &self,
        egress: &ServerId,
        ingress_route: &str,
        egress_route: String,
    ) -> Option<Pipe> {
        let mut pipes = self.pipes.lock();
        let pipe = pipes
            .iter_mut()
            .find(|p| &p.egress == egress && p.ingress_route == ingress_route)?;
        pipe.egress_route = Some(egress_route);
        Some(pipe.clone())
    }

    /// Drop every pipe with `server` at either end
    pub fn remove_server(&self, server: &ServerId) -> usize {
        let mut pipes = self.pipes.lock();
        let before = pipes.len();
        pipes.retain(|p| &p.ingress != server && &p.egress != server);
        before - pipes.len()
    }

    #[must_use]
    pub fn find(&self, egress: &ServerId, ingress_route: &str) -> Option<Pipe> {
        self.pipes
            .lock()
            .iter()
            .find(|p| &p.egress == egress && p.ingress_route == ingress_route)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pipes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipes.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_then_connect() {
        let table = PipeTable::new();
        table.open(ServerId::from("ingress1"), ServerId::from("egress1"), "R".to_string());

        let pipe = table.find(&ServerId::from("egress1"), "R").unwrap();
        assert!(!pipe.is_connected());

        let pipe = table
            .connect(&ServerId::from("egress1"), "R", "S".to_string())
            .unwrap();
        assert_eq!(
            pipe,
            Pipe {
                ingress: ServerId::from("ingress1"),
                egress: ServerId::from("egress1"),
                ingress_route: "R".to_string(),
                egress_route: Some("S".to_string()),
            }
        );
    }

    #[test]
    fn test_connect_requires_matching_egress() {
        let table = PipeTable::new();
        table.open(ServerId::from("ingress1"), ServerId::from("egress1"), "R".to_string());
        assert!(table.connect(&ServerId::from("egress2"), "R", "S".to_string()).is_none());
        assert!(table.connect(&ServerId::from("egress1"), "other", "S".to_string()).is_none());
    }

    #[test]
    fn test_reopen_replaces_pipe() {
        let table = PipeTable::new();
        table.open(ServerId::from("i"), ServerId::from("e"), "R".to_string());
        table.connect(&ServerId::from("e"), "R", "S".to_string());
        table.open(ServerId::from("i"), ServerId::from("e"), "R".to_string());

        assert_eq!(table.len(), 1);
        assert!(!table.find(&ServerId::from("e"), "R").unwrap().is_connected());
    }

    #[test]
    fn test_remove_server_drops_both_ends() {
        let table = PipeTable::new();
        table.open(ServerId::from("i1"), ServerId::from("e1"), "R1".to_string());
        table.open(ServerId::from("i1"), ServerId::from("e2"), "R2".to_string());
        table.open(ServerId::from("i2"), ServerId::from("e1"), "R3".to_string());

        assert_eq!(table.remove_server(&ServerId::from("e1")), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.remove_server(&ServerId::from("i1")), 1);
        assert!(table.is_empty());
    }
}

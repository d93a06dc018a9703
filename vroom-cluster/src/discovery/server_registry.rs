//! Registry of connected media servers
//!
//! Per role (ingress, egress, movement) the registry keeps:
//! - server id -> connection link
//! - server id -> region
//! - region -> server ids
//! - region -> server id -> last reported load
//!
//! plus a connection id -> registered servers index so a closed socket can be
//! unwound without scanning every table.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};
use vroom_core::{Region, ServerId};

use super::load_balancer::{self, Selection};
use crate::connection::{ConnectionId, ServerLink};
use crate::wire::ServerMode;

#[derive(Debug, Default)]
pub(crate) struct RoleTable {
    links: HashMap<ServerId, ServerLink>,
    regions: HashMap<ServerId, Region>,
    region_servers: HashMap<Region, Vec<ServerId>>,
    loads: HashMap<Region, HashMap<ServerId, f64>>,
}

impl RoleTable {
    fn insert(&mut self, id: ServerId, region: Region, link: ServerLink) {
        self.remove(&id);

        self.links.insert(id.clone(), link);
        self.regions.insert(id.clone(), region);
        self.region_servers.entry(region).or_default().push(id.clone());
        // New servers start idle so they are selectable before their first report
        self.loads.entry(region).or_default().insert(id, 0.0);
    }

    fn remove(&mut self, id: &ServerId) -> Option<ServerLink> {
        let link = self.links.remove(id)?;
        if let Some(region) = self.regions.remove(id) {
            if let Some(servers) = self.region_servers.get_mut(&region) {
                servers.retain(|s| s != id);
                if servers.is_empty() {
                    self.region_servers.remove(&region);
                }
            }
            if let Some(loads) = self.loads.get_mut(&region) {
                loads.remove(id);
                if loads.is_empty() {
                    self.loads.remove(&region);
                }
            }
        }
        Some(link)
    }

    fn set_load(&mut self, id: &ServerId, load: f64) -> bool {
        let Some(region) = self.regions.get(id) else {
            return false;
        };
        self.loads.entry(*region).or_default().insert(id.clone(), load);
        true
    }

    fn has_servers(&self, region: Region) -> bool {
        self.region_servers
            .get(&region)
            .is_some_and(|servers| !servers.is_empty())
    }

    pub(crate) fn least_loaded_in(&self, region: Region) -> Option<ServerId> {
        if !self.has_servers(region) {
            return None;
        }
        self.loads.get(&region).and_then(load_balancer::least_loaded)
    }

    fn entries(&self) -> Vec<ServerLoadEntry> {
        let mut entries: Vec<ServerLoadEntry> = self
            .loads
            .iter()
            .flat_map(|(region, loads)| {
                loads.iter().map(|(id, load)| ServerLoadEntry {
                    server_id: id.clone(),
                    region: *region,
                    load: *load,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        entries
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    ingress: RoleTable,
    egress: RoleTable,
    movement: RoleTable,
    by_connection: HashMap<ConnectionId, Vec<(ServerMode, ServerId)>>,
}

impl RegistryState {
    const fn table(&self, mode: ServerMode) -> &RoleTable {
        match mode {
            ServerMode::Ingress => &self.ingress,
            ServerMode::Egress => &self.egress,
            ServerMode::Movement => &self.movement,
        }
    }

    fn table_mut(&mut self, mode: ServerMode) -> &mut RoleTable {
        match mode {
            ServerMode::Ingress => &mut self.ingress,
            ServerMode::Egress => &mut self.egress,
            ServerMode::Movement => &mut self.movement,
        }
    }
}

/// One server's row in a load snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLoadEntry {
    pub server_id: ServerId,
    pub region: Region,
    pub load: f64,
}

/// Point-in-time view of every registered server's load
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSnapshot {
    pub ingress: Vec<ServerLoadEntry>,
    pub egress: Vec<ServerLoadEntry>,
    pub movement: Vec<ServerLoadEntry>,
}

/// Thread-safe registry of media servers by role
#[derive(Debug, Default)]
pub struct ServerRegistry {
    state: RwLock<RegistryState>,
}

impl ServerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a server under `mode`; re-registering an id replaces its
    /// previous link and region.
    pub fn register(&self, mode: ServerMode, id: ServerId, region: Region, link: ServerLink) {
        let connection_id = link.connection_id().to_string();
        let mut state = self.state.write();

        let previous_connection = state
            .table(mode)
            .links
            .get(&id)
            .map(|previous| previous.connection_id().to_string());
        if let Some(previous_connection) = previous_connection {
            if let Some(owned) = state.by_connection.get_mut(&previous_connection) {
                owned.retain(|(m, s)| !(*m == mode && *s == id));
            }
        }

        state.table_mut(mode).insert(id.clone(), region, link);
        state
            .by_connection
            .entry(connection_id.clone())
            .or_default()
            .push((mode, id.clone()));

        info!(
            server_id = %id,
            mode = %mode,
            region = %region,
            connection_id = %connection_id,
            "Media server registered"
        );
    }

    /// Remove everything registered through a connection.
    ///
    /// Returns the `(mode, server id)` pairs that were dropped.
    pub fn unregister_connection(&self, connection_id: &str) -> Vec<(ServerMode, ServerId)> {
        let mut state = self.state.write();
        let Some(owned) = state.by_connection.remove(connection_id) else {
            return Vec::new();
        };

        for (mode, id) in &owned {
            state.table_mut(*mode).remove(id);
            info!(server_id = %id, mode = %mode, "Media server unregistered");
        }
        owned
    }

    /// Apply a load report to every server registered on the connection
    pub fn record_load(&self, connection_id: &str, load: f64) -> usize {
        let mut state = self.state.write();
        let Some(owned) = state.by_connection.get(connection_id).cloned() else {
            return 0;
        };

        let mut updated = 0;
        for (mode, id) in owned {
            if state.table_mut(mode).set_load(&id, load) {
                updated += 1;
                debug!(server_id = %id, mode = %mode, load, "Server load updated");
            }
        }
        updated
    }

    /// Servers registered through a connection
    #[must_use]
    pub fn servers_on(&self, connection_id: &str) -> Vec<(ServerMode, ServerId)> {
        self.state
            .read()
            .by_connection
            .get(connection_id)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn link(&self, mode: ServerMode, id: &ServerId) -> Option<ServerLink> {
        self.state.read().table(mode).links.get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, mode: ServerMode, id: &ServerId) -> bool {
        self.state.read().table(mode).links.contains_key(id)
    }

    #[must_use]
    pub fn region_of(&self, mode: ServerMode, id: &ServerId) -> Option<Region> {
        self.state.read().table(mode).regions.get(id).copied()
    }

    #[must_use]
    pub fn has_servers(&self, mode: ServerMode, region: Region) -> bool {
        self.state.read().table(mode).has_servers(region)
    }

    #[must_use]
    pub fn server_count(&self, mode: ServerMode) -> usize {
        self.state.read().table(mode).links.len()
    }

    #[must_use]
    pub fn load_of(&self, mode: ServerMode, id: &ServerId) -> Option<f64> {
        let state = self.state.read();
        let table = state.table(mode);
        let region = table.regions.get(id)?;
        table.loads.get(region)?.get(id).copied()
    }

    /// Least-loaded server of `mode` in `region`, or from the first
    /// populated region when `region` has none.
    #[must_use]
    pub fn select(&self, mode: ServerMode, region: Region) -> Option<Selection> {
        load_balancer::select(self.state.read().table(mode), region)
    }

    #[must_use]
    pub fn snapshot(&self) -> LoadSnapshot {
        let state = self.state.read();
        LoadSnapshot {
            ingress: state.ingress.entries(),
            egress: state.egress.entries(),
            movement: state.movement.entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn link(connection_id: &str) -> ServerLink {
        let (tx, _rx) = mpsc::unbounded_channel();
        ServerLink::new(connection_id.to_string(), tx)
    }

    fn egress_registry(entries: &[(&str, Region, f64)]) -> ServerRegistry {
        let registry = ServerRegistry::new();
        for (id, region, load) in entries {
            let conn = format!("conn-{id}");
            registry.register(ServerMode::Egress, ServerId::from(*id), *region, link(&conn));
            registry.record_load(&conn, *load);
        }
        registry
    }

    #[test]
    fn test_selects_least_loaded_in_region() {
        let registry = egress_registry(&[
            ("A", Region::UsEast1, 3.0),
            ("B", Region::UsEast1, 1.0),
            ("C", Region::UsEast1, 5.0),
        ]);

        let selection = registry.select(ServerMode::Egress, Region::UsEast1).unwrap();
        assert_eq!(selection, Selection::Regional(ServerId::from("B")));
    }

    #[test]
    fn test_empty_region_falls_back_to_populated_region() {
        let registry = egress_registry(&[("F1", Region::EuCentral1, 7.0)]);

        let selection = registry.select(ServerMode::Egress, Region::ApSoutheast2).unwrap();
        assert_eq!(
            selection,
            Selection::Fallback(ServerId::from("F1"), Region::EuCentral1)
        );
    }

    #[test]
    fn test_no_servers_anywhere() {
        let registry = ServerRegistry::new();
        assert!(registry.select(ServerMode::Ingress, Region::UsEast1).is_none());
    }

    #[test]
    fn test_roles_are_independent() {
        let registry = egress_registry(&[("E1", Region::UsEast1, 0.0)]);
        assert!(registry.select(ServerMode::Ingress, Region::UsEast1).is_none());
        assert!(registry.has_servers(ServerMode::Egress, Region::UsEast1));
        assert!(!registry.has_servers(ServerMode::Movement, Region::UsEast1));
    }

    #[test]
    fn test_unregister_connection_removes_all_state() {
        let registry = ServerRegistry::new();
        let shared = link("conn-1");
        registry.register(ServerMode::Ingress, ServerId::from("I1"), Region::Local, shared.clone());
        registry.register(ServerMode::Egress, ServerId::from("E1"), Region::Local, shared);
        registry.register(ServerMode::Egress, ServerId::from("E2"), Region::Local, link("conn-2"));

        let dropped = registry.unregister_connection("conn-1");
        assert_eq!(dropped.len(), 2);
        assert!(!registry.contains(ServerMode::Ingress, &ServerId::from("I1")));
        assert!(!registry.contains(ServerMode::Egress, &ServerId::from("E1")));
        assert!(registry.contains(ServerMode::Egress, &ServerId::from("E2")));
        assert_eq!(registry.snapshot().egress.len(), 1);

        assert!(registry.unregister_connection("conn-1").is_empty());
    }

    #[test]
    fn test_reregistration_moves_region() {
        let registry = ServerRegistry::new();
        let id = ServerId::from("E1");
        registry.register(ServerMode::Egress, id.clone(), Region::UsEast1, link("old"));
        registry.register(ServerMode::Egress, id, Region::EuCentral1, link("new"));

        assert_eq!(
            registry.region_of(ServerMode::Egress, &ServerId::from("E1")),
            Some(Region::EuCentral1)
        );
        assert!(!registry.has_servers(ServerMode::Egress, Region::UsEast1));
        // the old socket closing must not take the re-registered server with it
        assert!(registry.unregister_connection("old").is_empty());
        assert!(registry.contains(ServerMode::Egress, &ServerId::from("E1")));
    }

    #[test]
    fn test_load_report_for_unknown_connection() {
        let registry = ServerRegistry::new();
        assert_eq!(registry.record_load("nobody", 4.0), 0);
    }

    #[test]
    fn test_load_updates_change_selection() {
        let registry = egress_registry(&[("A", Region::Local, 1.0), ("B", Region::Local, 2.0)]);
        registry.record_load("conn-A", 9.0);

        assert_eq!(registry.load_of(ServerMode::Egress, &ServerId::from("A")), Some(9.0));
        let selection = registry.select(ServerMode::Egress, Region::Local).unwrap();
        assert_eq!(selection.into_server_id(), ServerId::from("B"));
    }
}

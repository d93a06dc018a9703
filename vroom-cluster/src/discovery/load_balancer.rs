//! Least-loaded server selection
//!
//! A region's servers are ranked by their last reported load. When the
//! requested region has nobody, the first populated region in
//! [`Region::ALL`] order serves instead; there is no proximity ordering.

use std::collections::HashMap;
use vroom_core::{Region, ServerId};

use super::server_registry::RoleTable;

/// Outcome of a selection, kept for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Served from the requested region
    Regional(ServerId),
    /// Requested region was empty; served from another region
    Fallback(ServerId, Region),
}

impl Selection {
    #[must_use]
    pub fn server_id(&self) -> &ServerId {
        match self {
            Self::Regional(id) | Self::Fallback(id, _) => id,
        }
    }

    #[must_use]
    pub fn into_server_id(self) -> ServerId {
        match self {
            Self::Regional(id) | Self::Fallback(id, _) => id,
        }
    }
}

/// Pick the lowest load; equal loads resolve to the smallest id so the
/// choice is stable across calls.
pub(crate) fn least_loaded(loads: &HashMap<ServerId, f64>) -> Option<ServerId> {
    loads
        .iter()
        .min_by(|(a_id, a), (b_id, b)| a.total_cmp(b).then_with(|| a_id.cmp(b_id)))
        .map(|(id, _)| id.clone())
}

pub(crate) fn select(table: &RoleTable, region: Region) -> Option<Selection> {
    if let Some(id) = table.least_loaded_in(region) {
        return Some(Selection::Regional(id));
    }

    Region::ALL
        .into_iter()
        .filter(|candidate| *candidate != region)
        .find_map(|candidate| {
            table
                .least_loaded_in(candidate)
                .map(|id| Selection::Fallback(id, candidate))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loads(entries: &[(&str, f64)]) -> HashMap<ServerId, f64> {
        entries
            .iter()
            .map(|(id, load)| (ServerId::from(*id), *load))
            .collect()
    }

    #[test]
    fn test_least_loaded_picks_minimum() {
        let table = loads(&[("A", 3.0), ("B", 1.0), ("C", 5.0)]);
        assert_eq!(least_loaded(&table), Some(ServerId::from("B")));
    }

    #[test]
    fn test_least_loaded_ties_break_on_id() {
        let table = loads(&[("z", 2.0), ("m", 2.0), ("q", 2.0)]);
        assert_eq!(least_loaded(&table), Some(ServerId::from("m")));
    }

    #[test]
    fn test_least_loaded_empty() {
        assert_eq!(least_loaded(&HashMap::new()), None);
    }
}

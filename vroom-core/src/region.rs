//! Edge-location to cluster-region resolution
//!
//! Clients report the three-letter code of the CDN edge that served them
//! (`ATL`, `FRA`, `NRT`, ...). The code is grouped into one of the cluster
//! regions; if that region has no egress servers registered the primary
//! region is used instead, so resolution depends on what is currently online.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "us-east-1")]
    UsEast1,
    #[serde(rename = "sa-east-1")]
    SaEast1,
    #[serde(rename = "ap-south-1")]
    ApSouth1,
    #[serde(rename = "eu-central-1")]
    EuCentral1,
    #[serde(rename = "ap-northeast-1")]
    ApNortheast1,
    #[serde(rename = "ap-east-1")]
    ApEast1,
    #[serde(rename = "ap-southeast-1")]
    ApSoutheast1,
    #[serde(rename = "ap-southeast-2")]
    ApSoutheast2,
    /// Single-machine development cluster
    #[serde(rename = "local")]
    Local,
}

impl Region {
    /// Every region, in fallback scan order
    pub const ALL: [Self; 9] = [
        Self::UsEast1,
        Self::SaEast1,
        Self::ApSouth1,
        Self::EuCentral1,
        Self::ApNortheast1,
        Self::ApEast1,
        Self::ApSoutheast1,
        Self::ApSoutheast2,
        Self::Local,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UsEast1 => "us-east-1",
            Self::SaEast1 => "sa-east-1",
            Self::ApSouth1 => "ap-south-1",
            Self::EuCentral1 => "eu-central-1",
            Self::ApNortheast1 => "ap-northeast-1",
            Self::ApEast1 => "ap-east-1",
            Self::ApSoutheast1 => "ap-southeast-1",
            Self::ApSoutheast2 => "ap-southeast-2",
            Self::Local => "local",
        }
    }

    /// Geographic grouping of an edge-location code, ignoring availability
    #[must_use]
    pub fn from_edge_code(code: &str) -> Option<Self> {
        let prefix: String = code.trim().chars().take(3).collect::<String>().to_ascii_uppercase();
        let region = match prefix.as_str() {
            // North America
            "ATL" | "BOS" | "DFW" | "DEN" | "EWR" | "IAD" | "IAH" | "JAX" | "JFK" | "LAX" | "MIA"
            | "MSP" | "ORD" | "PDX" | "PHL" | "PHX" | "PIT" | "SEA" | "SFO" | "SLC" | "YTO"
            | "YUL" | "YVR" | "HIO" | "BNA" | "CMH" | "MCI" | "QRO" | "MEX" => Self::UsEast1,
            // South America
            "GRU" | "GIG" | "EZE" | "SCL" | "BOG" | "LIM" | "FOR" | "POA" => Self::SaEast1,
            // South Asia
            "BOM" | "DEL" | "MAA" | "BLR" | "HYD" | "CCU" | "CMB" => Self::ApSouth1,
            // Europe, Middle East, Africa
            "FRA" | "LHR" | "MAN" | "CDG" | "MRS" | "AMS" | "MAD" | "BCN" | "MXP" | "FCO" | "PMO"
            | "ARN" | "HEL" | "CPH" | "OSL" | "DUB" | "WAW" | "VIE" | "ZRH" | "MUC" | "DUS"
            | "HAM" | "TXL" | "BER" | "PRG" | "BUD" | "OTP" | "SOF" | "ATH" | "LIS" | "BRU"
            | "ZAG" | "TLV" | "DXB" | "FJR" | "BAH" | "JED" | "CAI" | "JNB" | "CPT" | "NBO"
            | "LOS" => Self::EuCentral1,
            // Japan and Korea
            "NRT" | "HND" | "KIX" | "ICN" | "GMP" => Self::ApNortheast1,
            // Greater China
            "HKG" | "TPE" => Self::ApEast1,
            // South-East Asia
            "SIN" | "KUL" | "BKK" | "CGK" | "MNL" | "HAN" | "SGN" => Self::ApSoutheast1,
            // Oceania
            "SYD" | "MEL" | "PER" | "BNE" | "AKL" => Self::ApSoutheast2,
            _ => return code.trim().eq_ignore_ascii_case("local").then_some(Self::Local),
        };
        Some(region)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|region| region.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Configuration(format!("Unknown region: {s}")))
    }
}

/// Resolve a client edge code to the region whose servers should serve it.
///
/// Unknown codes and regions without registered egress servers resolve to
/// `primary`. Cluster region names (`eu-central-1`) are accepted as-is so
/// that already-resolved regions round-trip.
pub fn resolve_region(code: &str, primary: Region, has_egress: impl Fn(Region) -> bool) -> Region {
    let candidate = Region::from_edge_code(code).or_else(|| code.parse().ok());
    match candidate {
        Some(region) if has_egress(region) => region,
        _ => primary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_codes_group_into_regions() {
        assert_eq!(Region::from_edge_code("ATL56-C1"), Some(Region::UsEast1));
        assert_eq!(Region::from_edge_code("fra"), Some(Region::EuCentral1));
        assert_eq!(Region::from_edge_code("NRT"), Some(Region::ApNortheast1));
        assert_eq!(Region::from_edge_code("HKG"), Some(Region::ApEast1));
        assert_eq!(Region::from_edge_code("SIN"), Some(Region::ApSoutheast1));
        assert_eq!(Region::from_edge_code("SYD"), Some(Region::ApSoutheast2));
        assert_eq!(Region::from_edge_code("GRU"), Some(Region::SaEast1));
        assert_eq!(Region::from_edge_code("BOM"), Some(Region::ApSouth1));
        assert_eq!(Region::from_edge_code("local"), Some(Region::Local));
        assert_eq!(Region::from_edge_code("ZZZ"), None);
    }

    #[test]
    fn test_resolve_uses_populated_region() {
        let region = resolve_region("FRA", Region::UsEast1, |r| r == Region::EuCentral1);
        assert_eq!(region, Region::EuCentral1);
    }

    #[test]
    fn test_resolve_falls_back_to_primary_when_unpopulated() {
        let region = resolve_region("FRA", Region::UsEast1, |r| r == Region::UsEast1);
        assert_eq!(region, Region::UsEast1);

        let region = resolve_region("ZZZ", Region::Local, |_| true);
        assert_eq!(region, Region::Local);
    }

    #[test]
    fn test_resolve_accepts_region_names() {
        let region = resolve_region("ap-east-1", Region::UsEast1, |_| true);
        assert_eq!(region, Region::ApEast1);
    }

    #[test]
    fn test_region_parse_roundtrip() {
        for region in Region::ALL {
            assert_eq!(region.as_str().parse::<Region>().unwrap(), region);
        }
        assert!("mars-north-1".parse::<Region>().is_err());
    }
}

//! Boundary to the external DNS testing engine.
//!
//! The broker never performs protocol work itself. The two read-side RPC
//! methods that need live DNS data (`get_host_by_name`,
//! `get_data_from_parent_zone`) go through [`ZoneDataSource`]; the engine
//! adapter implements it against the real recursor.

use std::net::IpAddr;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use zonewatch_core::domain::{DsInfo, Nameserver};

/// Delegation data for a zone as seen from its parent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParentZoneData {
    pub ns_list: Vec<Nameserver>,
    pub ds_list: Vec<DsInfo>,
}

/// Read-side DNS data the broker needs from the engine.
#[async_trait]
pub trait ZoneDataSource: Send + Sync {
    /// Version string of the backing engine, for `version_info`.
    fn version(&self) -> String;

    /// A/AAAA addresses for a hostname; empty when nothing resolves.
    async fn host_by_name(&self, hostname: &str) -> Vec<IpAddr>;

    /// NS and DS records for `domain` as published in the parent zone.
    async fn parent_zone_data(&self, domain: &str) -> ParentZoneData;
}

/// Zone data source backed by the system resolver.
///
/// Resolves addresses through `tokio::net::lookup_host`. The system
/// resolver cannot query NS/DS record types, so delegation data comes back
/// empty; deployments wanting parent-zone data wire the engine's recursor
/// behind [`ZoneDataSource`] instead.
pub struct SystemZoneSource;

#[async_trait]
impl ZoneDataSource for SystemZoneSource {
    fn version(&self) -> String {
        "system-resolver".to_string()
    }

    async fn host_by_name(&self, hostname: &str) -> Vec<IpAddr> {
        match tokio::net::lookup_host((hostname, 0u16)).await {
            Ok(addrs) => {
                let mut ips: Vec<IpAddr> = Vec::new();
                for addr in addrs {
                    let ip = addr.ip();
                    if !ips.contains(&ip) {
                        ips.push(ip);
                    }
                }
                ips
            }
            Err(e) => {
                debug!(hostname, error = %e, "Host lookup failed");
                Vec::new()
            }
        }
    }

    async fn parent_zone_data(&self, domain: &str) -> ParentZoneData {
        debug!(domain, "No engine recursor wired; returning empty delegation data");
        ParentZoneData::default()
    }
}

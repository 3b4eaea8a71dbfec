// ── Network domain types ──
//
// Networks are owned elsewhere; the core only reads them through a
// `NetworkCatalog` to learn subnet bounds, ownership and the IP bucket.

use std::future::Future;
use std::net::Ipv4Addr;

use dashmap::{DashMap, DashSet};
use napi_store::{BucketSpec, IndexSpec};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NapiError;

pub const IP_BUCKET_PREFIX: &str = "napi_ips_";
pub const IP_BUCKET_VERSION: u32 = 2;

/// Name of the IP bucket backing network `uuid`.
pub fn ip_bucket_name(uuid: Uuid) -> String {
    format!("{IP_BUCKET_PREFIX}{}", uuid.hyphenated().to_string().replace('-', "_"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub uuid: Uuid,
    pub name: String,
    pub subnet_start: Ipv4Addr,
    pub subnet_bits: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision_start: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision_end: Option<Ipv4Addr>,
    pub nic_tag: String,
    pub vlan_id: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_uuids: Vec<Uuid>,
}

impl Network {
    pub fn new(
        uuid: Uuid,
        name: impl Into<String>,
        subnet_start: Ipv4Addr,
        subnet_bits: u8,
        nic_tag: impl Into<String>,
        vlan_id: u16,
    ) -> Self {
        Self {
            uuid,
            name: name.into(),
            subnet_start,
            subnet_bits,
            gateway: None,
            provision_start: None,
            provision_end: None,
            nic_tag: nic_tag.into(),
            vlan_id,
            owner_uuids: Vec::new(),
        }
    }

    pub fn with_gateway(mut self, gateway: Ipv4Addr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_provision_range(mut self, start: Ipv4Addr, end: Ipv4Addr) -> Self {
        self.provision_start = Some(start);
        self.provision_end = Some(end);
        self
    }

    pub fn with_owners(mut self, owners: impl IntoIterator<Item = Uuid>) -> Self {
        self.owner_uuids = owners.into_iter().collect();
        self
    }

    /// Anyone may use a network without owners.
    pub fn is_owner(&self, uuid: &Uuid) -> bool {
        self.owner_uuids.is_empty() || self.owner_uuids.contains(uuid)
    }

    pub fn netmask(&self) -> Ipv4Addr {
        let host_bits = 32 - u32::from(self.subnet_bits.min(32));
        Ipv4Addr::from(u32::MAX.checked_shl(host_bits).unwrap_or(0))
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.subnet_start) | !u32::from(self.netmask()))
    }

    pub fn contains(&self, number: u32) -> bool {
        let mask = u32::from(self.netmask());
        number & mask == u32::from(self.subnet_start) & mask
    }

    /// Inclusive bounds for automatic assignment. Defaults to the first and
    /// last host address.
    pub fn provision_range(&self) -> (u32, u32) {
        let start = self
            .provision_start
            .map_or_else(|| u32::from(self.subnet_start).saturating_add(1), u32::from);
        let end = self
            .provision_end
            .map_or_else(|| u32::from(self.broadcast()).saturating_sub(1), u32::from);
        (start, end)
    }

    pub fn ip_bucket_name(&self) -> String {
        ip_bucket_name(self.uuid)
    }

    pub fn ip_bucket(&self) -> BucketSpec {
        BucketSpec::new(self.ip_bucket_name(), "IP", IP_BUCKET_VERSION)
            .with_index("ip", IndexSpec::number().unique())
            .with_index("belongs_to_type", IndexSpec::string())
            .with_index("belongs_to_uuid", IndexSpec::string())
            .with_index("owner_uuid", IndexSpec::string())
            .with_index("reserved", IndexSpec::boolean())
    }
}

// ── Catalog ─────────────────────────────────────────────────────────

/// Read access to networks and nic tags.
pub trait NetworkCatalog: Send + Sync {
    /// `Ok(None)` when no network has this UUID.
    fn network(
        &self,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Option<Network>, NapiError>> + Send;

    fn nic_tag_exists(&self, name: &str) -> impl Future<Output = Result<bool, NapiError>> + Send;
}

/// In-memory catalog, populated up front.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    networks: DashMap<Uuid, Network>,
    nic_tags: DashSet<String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a network, and its nic tag.
    pub fn insert_network(&self, network: Network) {
        self.nic_tags.insert(network.nic_tag.clone());
        self.networks.insert(network.uuid, network);
    }

    pub fn insert_nic_tag(&self, name: impl Into<String>) {
        self.nic_tags.insert(name.into());
    }
}

impl NetworkCatalog for StaticCatalog {
    async fn network(&self, uuid: Uuid) -> Result<Option<Network>, NapiError> {
        Ok(self.networks.get(&uuid).map(|n| n.value().clone()))
    }

    async fn nic_tag_exists(&self, name: &str) -> Result<bool, NapiError> {
        Ok(self.nic_tags.contains(name))
    }
}

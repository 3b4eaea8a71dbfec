// ── Nic domain types ──

use std::net::Ipv4Addr;

use napi_store::{
    BatchOp, BucketSpec, Etag, ExpectedEtag, IndexSpec, ObjectRecord, decode_set, encode_set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::ip::Ip;
use super::mac::MacAddr;
use super::network::Network;
use crate::error::NapiError;

pub const NIC_BUCKET: &str = "napi_nics";
pub const NIC_BUCKET_VERSION: u32 = 2;

/// Schema of the nic bucket.
pub fn nic_bucket() -> BucketSpec {
    BucketSpec::new(NIC_BUCKET, "nic", NIC_BUCKET_VERSION)
        .with_index("mac", IndexSpec::number().unique())
        .with_index("ip", IndexSpec::number())
        .with_index("belongs_to_type", IndexSpec::string())
        .with_index("belongs_to_uuid", IndexSpec::string())
        .with_index("owner_uuid", IndexSpec::string())
        .with_index("network_uuid", IndexSpec::string())
        .with_index("nic_tag", IndexSpec::string())
        .with_index("nic_tags_provided", IndexSpec::string())
        .with_index("primary", IndexSpec::boolean())
        .with_index("state", IndexSpec::string())
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NicState {
    Provisioning,
    Stopped,
    #[default]
    Running,
}

/// Anti-spoofing and traffic flags. All default to off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpoofFlags {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_dhcp_spoofing: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_ip_spoofing: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_mac_spoofing: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_restricted_traffic: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_unfiltered_promisc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nic {
    pub mac: MacAddr,
    pub belongs_to_type: String,
    pub belongs_to_uuid: Uuid,
    pub owner_uuid: Uuid,
    pub network_uuid: Option<Uuid>,
    pub ip_number: Option<u32>,
    pub state: NicState,
    pub primary: bool,
    pub reserved: bool,
    pub spoof: SpoofFlags,
    pub nic_tag: Option<String>,
    pub nic_tags_provided: Option<Vec<String>>,
    pub model: Option<String>,
    pub vlan_id: Option<u16>,
    pub etag: Option<Etag>,

    // Per-request associations; never persisted.
    pub ip: Option<Ip>,
    pub network: Option<Network>,
}

/// Stored form of a nic row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NicRecord {
    mac: u64,
    belongs_to_type: String,
    belongs_to_uuid: Uuid,
    owner_uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    network_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip: Option<u32>,
    #[serde(default)]
    state: NicState,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    reserved: bool,
    #[serde(flatten)]
    spoof: SpoofFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nic_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nic_tags_provided: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vlan_id: Option<u16>,
}

/// Validated, all-optional nic fields, as produced by the nic param specs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NicUpdate {
    pub mac: Option<u64>,
    pub belongs_to_type: Option<String>,
    pub belongs_to_uuid: Option<Uuid>,
    pub owner_uuid: Option<Uuid>,
    pub check_owner: Option<bool>,
    pub ip: Option<u32>,
    pub network_uuid: Option<Uuid>,
    pub network: Option<Network>,
    pub state: Option<NicState>,
    pub primary: Option<bool>,
    pub reserved: Option<bool>,
    pub allow_dhcp_spoofing: Option<bool>,
    pub allow_ip_spoofing: Option<bool>,
    pub allow_mac_spoofing: Option<bool>,
    pub allow_restricted_traffic: Option<bool>,
    pub allow_unfiltered_promisc: Option<bool>,
    pub model: Option<String>,
    pub nic_tag: Option<String>,
    pub nic_tags_provided: Option<Vec<String>>,
    pub vlan_id: Option<u16>,
    /// The IP currently stored at the requested address, if one was given.
    #[serde(rename = "_ip")]
    pub ip_obj: Option<Ip>,
}

impl NicUpdate {
    pub fn from_params(validated: &serde_json::Map<String, Value>) -> Result<Self, NapiError> {
        serde_json::from_value(Value::Object(validated.clone()))
            .map_err(|e| NapiError::from(napi_store::Error::from(e)))
    }

    /// Whether the owner check against the network should run.
    pub fn check_owner(&self) -> bool {
        self.check_owner.unwrap_or(true)
    }
}

impl Nic {
    pub fn new(
        mac: MacAddr,
        belongs_to_type: impl Into<String>,
        belongs_to_uuid: Uuid,
        owner_uuid: Uuid,
    ) -> Self {
        Self {
            mac,
            belongs_to_type: belongs_to_type.into(),
            belongs_to_uuid,
            owner_uuid,
            network_uuid: None,
            ip_number: None,
            state: NicState::default(),
            primary: false,
            reserved: false,
            spoof: SpoofFlags::default(),
            nic_tag: None,
            nic_tags_provided: None,
            model: None,
            vlan_id: None,
            etag: None,
            ip: None,
            network: None,
        }
    }

    pub fn from_stored(record: &ObjectRecord) -> Result<Self, NapiError> {
        let stored: NicRecord = serde_json::from_value(record.value.clone())
            .map_err(napi_store::Error::from)?;
        let mac = MacAddr::from_number(stored.mac).ok_or_else(|| NapiError::Internal {
            message: format!("stored nic {} has an out-of-range MAC", record.key),
            causes: Vec::new(),
        })?;

        Ok(Self {
            mac,
            belongs_to_type: stored.belongs_to_type,
            belongs_to_uuid: stored.belongs_to_uuid,
            owner_uuid: stored.owner_uuid,
            network_uuid: stored.network_uuid,
            ip_number: stored.ip,
            state: stored.state,
            primary: stored.primary,
            reserved: stored.reserved,
            spoof: stored.spoof,
            nic_tag: stored.nic_tag,
            nic_tags_provided: stored.nic_tags_provided.as_deref().and_then(decode_set),
            model: stored.model,
            vlan_id: stored.vlan_id,
            etag: Some(record.etag.clone()),
            ip: None,
            network: None,
        })
    }

    pub fn key(&self) -> String {
        self.mac.key()
    }

    pub fn record(&self) -> Result<Value, NapiError> {
        let record = NicRecord {
            mac: self.mac.as_u64(),
            belongs_to_type: self.belongs_to_type.clone(),
            belongs_to_uuid: self.belongs_to_uuid,
            owner_uuid: self.owner_uuid,
            network_uuid: self.network_uuid,
            ip: self.ip_number,
            state: self.state,
            primary: self.primary,
            reserved: self.reserved,
            spoof: self.spoof,
            nic_tag: self.nic_tag.clone(),
            nic_tags_provided: self.nic_tags_provided.as_ref().map(encode_set),
            model: self.model.clone(),
            vlan_id: self.vlan_id,
        };
        Ok(serde_json::to_value(record).map_err(napi_store::Error::from)?)
    }

    /// Batch op writing this nic under its observed etag.
    pub fn batch_op(&self) -> Result<BatchOp, NapiError> {
        let expected = ExpectedEtag::from(self.etag.clone());
        Ok(BatchOp::put(NIC_BUCKET, self.key(), self.record()?, expected))
    }

    /// The attached IP, only while it still belongs to this nic's owner.
    pub fn owned_ip(&self) -> Option<&Ip> {
        self.ip
            .as_ref()
            .filter(|ip| ip.belongs_to_uuid == Some(self.belongs_to_uuid))
    }

    /// This nic with every field present in `update` overridden. The etag is
    /// kept; per-request associations are dropped.
    pub fn merged(&self, update: &NicUpdate) -> Self {
        fn pick<T: Clone>(new: Option<&T>, old: &T) -> T {
            new.cloned().unwrap_or_else(|| old.clone())
        }

        let mut nic = Self {
            mac: self.mac,
            belongs_to_type: pick(update.belongs_to_type.as_ref(), &self.belongs_to_type),
            belongs_to_uuid: update.belongs_to_uuid.unwrap_or(self.belongs_to_uuid),
            owner_uuid: update.owner_uuid.unwrap_or(self.owner_uuid),
            network_uuid: update.network_uuid.or(self.network_uuid),
            ip_number: update.ip.or(self.ip_number),
            state: update.state.unwrap_or(self.state),
            primary: update.primary.unwrap_or(self.primary),
            reserved: update.reserved.unwrap_or(self.reserved),
            spoof: self.spoof,
            nic_tag: update.nic_tag.clone().or_else(|| self.nic_tag.clone()),
            nic_tags_provided: update
                .nic_tags_provided
                .clone()
                .or_else(|| self.nic_tags_provided.clone()),
            model: update.model.clone().or_else(|| self.model.clone()),
            vlan_id: update.vlan_id.or(self.vlan_id),
            etag: self.etag.clone(),
            ip: None,
            network: None,
        };

        let flags = &mut nic.spoof;
        flags.allow_dhcp_spoofing = update.allow_dhcp_spoofing.unwrap_or(flags.allow_dhcp_spoofing);
        flags.allow_ip_spoofing = update.allow_ip_spoofing.unwrap_or(flags.allow_ip_spoofing);
        flags.allow_mac_spoofing = update.allow_mac_spoofing.unwrap_or(flags.allow_mac_spoofing);
        flags.allow_restricted_traffic =
            update.allow_restricted_traffic.unwrap_or(flags.allow_restricted_traffic);
        flags.allow_unfiltered_promisc =
            update.allow_unfiltered_promisc.unwrap_or(flags.allow_unfiltered_promisc);
        nic
    }

    /// Point this nic at `ip` on `network`, recording both associations.
    pub fn attach(&mut self, ip: Ip, network: Network) {
        self.ip_number = Some(ip.number);
        self.network_uuid = Some(network.uuid);
        self.nic_tag.get_or_insert_with(|| network.nic_tag.clone());
        self.vlan_id.get_or_insert(network.vlan_id);
        self.ip = Some(ip);
        self.network = Some(network);
    }

    /// API representation.
    pub fn view(&self) -> NicView {
        NicView {
            mac: self.mac.to_string(),
            primary: self.primary,
            state: self.state,
            belongs_to_type: self.belongs_to_type.clone(),
            belongs_to_uuid: self.belongs_to_uuid,
            owner_uuid: self.owner_uuid,
            network_uuid: self.network_uuid,
            ip: self.ip_number.map(Ipv4Addr::from),
            netmask: self.network.as_ref().map(Network::netmask),
            gateway: self.network.as_ref().and_then(|n| n.gateway),
            vlan_id: self.vlan_id,
            nic_tag: self.nic_tag.clone(),
            nic_tags_provided: self.nic_tags_provided.clone(),
            model: self.model.clone(),
            reserved: self.reserved,
            spoof: self.spoof,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NicView {
    pub mac: String,
    pub primary: bool,
    pub state: NicState,
    pub belongs_to_type: String,
    pub belongs_to_uuid: Uuid,
    pub owner_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic_tags_provided: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub reserved: bool,
    #[serde(flatten)]
    pub spoof: SpoofFlags,
}

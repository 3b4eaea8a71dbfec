// ── IP domain types ──
//
// An `Ip` is one address inside one network's bucket. Rows are never
// removed: freeing an address overwrites it with a placeholder marker.

use std::net::Ipv4Addr;

use napi_store::{BatchOp, Etag, ExpectedEtag, ObjectRecord};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::network::Network;
use super::nic::Nic;
use crate::error::NapiError;

/// Record keys a placeholder may carry. Anything else makes a row real.
const PLACEHOLDER_KEYS: [&str; 3] = ["ip", "reserved", "placeholder"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ip {
    pub number: u32,
    pub network_uuid: Uuid,
    #[serde(default)]
    pub belongs_to_type: Option<String>,
    #[serde(default)]
    pub belongs_to_uuid: Option<Uuid>,
    #[serde(default)]
    pub owner_uuid: Option<Uuid>,
    #[serde(default)]
    pub reserved: bool,
    /// `None` until the row has been read from or written to the store.
    #[serde(default)]
    pub etag: Option<Etag>,
}

/// Stored form of an IP row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecord {
    #[serde(deserialize_with = "number_or_string")]
    pub ip: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub belongs_to_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub belongs_to_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_uuid: Option<Uuid>,
    #[serde(default, deserialize_with = "bool_or_string")]
    pub reserved: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub placeholder: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose<T> {
    Typed(T),
    Text(String),
}

fn number_or_string<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    match Loose::<u32>::deserialize(de)? {
        Loose::Typed(n) => Ok(n),
        Loose::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn bool_or_string<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    match Loose::<bool>::deserialize(de)? {
        Loose::Typed(b) => Ok(b),
        Loose::Text(s) => Ok(s == "true"),
    }
}

/// Whether a stored row is a placeholder marker rather than a real IP.
///
/// Markers carry `"placeholder": true`; rows written before that flag
/// existed are recognized by holding nothing but `ip` and an unset
/// `reserved`.
pub fn is_placeholder(value: &Value) -> bool {
    if value.get("placeholder").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    let Some(map) = value.as_object() else {
        return false;
    };
    let reserved = matches!(map.get("reserved"), Some(Value::Bool(true)))
        || matches!(map.get("reserved"), Some(Value::String(s)) if s == "true");
    !reserved && map.keys().all(|k| PLACEHOLDER_KEYS.contains(&k.as_str()))
}

impl Ip {
    /// A free, never-persisted IP.
    pub fn unassigned(network_uuid: Uuid, number: u32) -> Self {
        Self {
            number,
            network_uuid,
            belongs_to_type: None,
            belongs_to_uuid: None,
            owner_uuid: None,
            reserved: false,
            etag: None,
        }
    }

    pub fn from_stored(network_uuid: Uuid, record: &ObjectRecord) -> Result<Self, NapiError> {
        let stored: IpRecord = serde_json::from_value(record.value.clone())
            .map_err(napi_store::Error::from)?;
        Ok(Self {
            number: stored.ip,
            network_uuid,
            belongs_to_type: stored.belongs_to_type,
            belongs_to_uuid: stored.belongs_to_uuid,
            owner_uuid: stored.owner_uuid,
            reserved: stored.reserved,
            etag: Some(record.etag.clone()),
        })
    }

    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.number)
    }

    pub fn key(&self) -> String {
        self.number.to_string()
    }

    /// No owning entity and not reserved.
    pub fn free(&self) -> bool {
        self.belongs_to_uuid.is_none() && !self.reserved
    }

    /// May be handed to a new owner.
    pub fn provisionable(&self) -> bool {
        self.belongs_to_uuid.is_none() && self.belongs_to_type.is_none()
    }

    pub fn record(&self) -> Result<Value, NapiError> {
        let record = IpRecord {
            ip: self.number,
            belongs_to_type: self.belongs_to_type.clone(),
            belongs_to_uuid: self.belongs_to_uuid,
            owner_uuid: self.owner_uuid,
            reserved: self.reserved,
            placeholder: false,
        };
        Ok(serde_json::to_value(record).map_err(napi_store::Error::from)?)
    }

    /// The marker written in place of a deleted or freed IP.
    pub fn placeholder_record(number: u32) -> Value {
        json!({ "ip": number, "reserved": false, "placeholder": true })
    }

    /// This IP with the owning fields taken from `nic`.
    pub fn updated_from(&self, nic: &Nic) -> Self {
        Self {
            belongs_to_type: Some(nic.belongs_to_type.clone()),
            belongs_to_uuid: Some(nic.belongs_to_uuid),
            owner_uuid: Some(nic.owner_uuid),
            reserved: nic.reserved,
            ..self.clone()
        }
    }

    /// Batch op writing this IP under its observed etag.
    pub fn batch_op(&self, bucket: &str) -> Result<BatchOp, NapiError> {
        let expected = ExpectedEtag::from(self.etag.clone());
        Ok(BatchOp::put(bucket, self.key(), self.record()?, expected))
    }

    /// Batch op overwriting this IP with a placeholder.
    pub fn freed_op(&self, bucket: &str) -> BatchOp {
        BatchOp::put(
            bucket,
            self.key(),
            Self::placeholder_record(self.number),
            ExpectedEtag::from(self.etag.clone()),
        )
    }

    /// API representation.
    pub fn view(&self, network: Option<&Network>) -> IpView {
        IpView {
            ip: self.address(),
            network_uuid: self.network_uuid,
            belongs_to_type: self.belongs_to_type.clone(),
            belongs_to_uuid: self.belongs_to_uuid,
            owner_uuid: self.owner_uuid,
            reserved: self.reserved,
            free: self.free(),
            netmask: network.map(Network::netmask),
            gateway: network.and_then(|n| n.gateway),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpView {
    pub ip: Ipv4Addr,
    pub network_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub belongs_to_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub belongs_to_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_uuid: Option<Uuid>,
    pub reserved: bool,
    pub free: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
}

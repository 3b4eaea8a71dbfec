// ── Nic request validation ──
//
// Validators that need the store or the network catalog, and the
// cross-field hook shared by nic create and update.

use futures_util::future::BoxFuture;
use napi_store::Store;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{FieldError, NapiError, Rejection};
use crate::ip::{self, OWNER_MATCH_MSG};
use crate::model::{Network, NetworkCatalog, Nic};
use crate::validate::{CrossCheck, ParamSpec, Params, Validator, fields};

pub const NO_NETWORK_MSG: &str = "network does not exist";
pub const NO_NIC_TAG_MSG: &str = "nic tag does not exist";
pub const OUTSIDE_SUBNET_MSG: &str = "ip cannot be outside subnet";

/// Field set accepted by nic create and update. `mac` is always required.
pub(crate) fn nic_spec<'a, S: Store, C: NetworkCatalog>(
    store: &'a S,
    catalog: &'a C,
    existing: Option<&'a Nic>,
) -> ParamSpec<'a> {
    ParamSpec::new()
        .required("mac", fields::mac)
        .optional("belongs_to_type", fields::string)
        .optional("belongs_to_uuid", fields::uuid)
        .optional("owner_uuid", fields::uuid)
        .optional("check_owner", fields::boolean)
        .optional("ip", fields::ip)
        .optional("network_uuid", NetworkLookup { catalog })
        .optional("state", fields::nic_state)
        .optional("primary", fields::boolean)
        .optional("reserved", fields::boolean)
        .optional("allow_dhcp_spoofing", fields::boolean)
        .optional("allow_ip_spoofing", fields::boolean)
        .optional("allow_mac_spoofing", fields::boolean)
        .optional("allow_restricted_traffic", fields::boolean)
        .optional("allow_unfiltered_promisc", fields::boolean)
        .optional("model", fields::string)
        .optional("nic_tag", NicTagLookup { catalog, many: false })
        .optional("nic_tags_provided", NicTagLookup { catalog, many: true })
        .optional("vlan_id", fields::vlan)
        .after(NicCheck { store, existing })
}

// ── Catalog-backed validators ───────────────────────────────────────

/// Resolves a network UUID. Splats `network_uuid` and the `network` itself.
pub struct NetworkLookup<'c, C> {
    pub catalog: &'c C,
}

impl<C: NetworkCatalog> NetworkLookup<'_, C> {
    async fn lookup(&self, field: &str, raw: &Value) -> Result<Value, Rejection> {
        let checked = fields::uuid(field, raw)?;
        let uuid = checked
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| FieldError::invalid(field, "invalid UUID"))?;

        match self.catalog.network(uuid).await? {
            Some(network) => Ok(json!({ field: uuid, "network": network })),
            None => Err(FieldError::invalid(field, NO_NETWORK_MSG).into()),
        }
    }
}

impl<C: NetworkCatalog> Validator for NetworkLookup<'_, C> {
    fn validate<'a>(
        &'a self,
        field: &'a str,
        raw: &'a Value,
    ) -> BoxFuture<'a, Result<Value, Rejection>> {
        Box::pin(self.lookup(field, raw))
    }
}

/// Checks that one tag (`many == false`) or a list of tags exist.
pub struct NicTagLookup<'c, C> {
    pub catalog: &'c C,
    pub many: bool,
}

impl<C: NetworkCatalog> NicTagLookup<'_, C> {
    async fn lookup(&self, field: &str, raw: &Value) -> Result<Value, Rejection> {
        let names: Vec<String> = match raw {
            Value::String(s) if self.many => {
                s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
            }
            Value::String(s) => vec![s.clone()],
            Value::Array(items) if self.many => {
                items.iter().filter_map(Value::as_str).map(str::to_owned).collect()
            }
            _ => return Err(FieldError::invalid(field, "must be a string").into()),
        };

        let mut missing = Vec::new();
        for name in &names {
            fields::nic_tag_name(field, &Value::String(name.clone()))?;
            if !self.catalog.nic_tag_exists(name).await? {
                missing.push(name.clone());
            }
        }

        if !missing.is_empty() {
            let error = FieldError::invalid(field, NO_NIC_TAG_MSG).with_extra("invalid", missing);
            return Err(error.into());
        }
        if self.many {
            Ok(json!({ field: names }))
        } else {
            Ok(Value::String(names.into_iter().next().unwrap_or_default()))
        }
    }
}

impl<C: NetworkCatalog> Validator for NicTagLookup<'_, C> {
    fn validate<'a>(
        &'a self,
        field: &'a str,
        raw: &'a Value,
    ) -> BoxFuture<'a, Result<Value, Rejection>> {
        Box::pin(self.lookup(field, raw))
    }
}

// ── Cross-field hook ────────────────────────────────────────────────

/// Fills in the network, checks ownership, and attaches the IP currently
/// stored at the requested address as `_ip`.
pub struct NicCheck<'a, S> {
    pub store: &'a S,
    pub existing: Option<&'a Nic>,
}

impl<S: Store> NicCheck<'_, S> {
    async fn run(&self, validated: &mut Params) -> Vec<Rejection> {
        let mut rejections: Vec<Rejection> = Vec::new();

        let given = validated.get("network").cloned();
        let requested = match given.map(serde_json::from_value::<Network>) {
            None => None,
            Some(Ok(network)) => Some(network),
            Some(Err(e)) => return vec![napi_store::Error::from(e).into()],
        };

        let network = match requested {
            Some(network) => {
                validated.insert("nic_tag".into(), json!(network.nic_tag));
                validated.insert("vlan_id".into(), json!(network.vlan_id));
                Some(network)
            }
            None => {
                let current = self.existing.and_then(|nic| nic.network.clone());
                if let Some(network) = &current {
                    validated.insert("network".into(), json!(network));
                }
                current
            }
        };

        let check = validated.get("check_owner").and_then(Value::as_bool).unwrap_or(true);
        let owner = validated
            .get("owner_uuid")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
            .or_else(|| self.existing.map(|nic| nic.owner_uuid));
        if let (true, Some(network), Some(owner)) = (check, &network, owner) {
            if !network.is_owner(&owner) {
                rejections.push(FieldError::invalid("owner_uuid", OWNER_MATCH_MSG).into());
            }
        }

        let number = validated
            .get("ip")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());
        if let Some(number) = number {
            match &network {
                None => rejections.push(FieldError::missing("network_uuid").into()),
                Some(network) if !network.contains(number) => {
                    rejections.push(FieldError::invalid("ip", OUTSIDE_SUBNET_MSG).into());
                }
                Some(network) => match ip::get(self.store, network, number, true).await {
                    Ok(current) => {
                        validated.insert("_ip".into(), json!(current));
                    }
                    Err(e) => rejections.push(e.into()),
                },
            }
        }

        rejections
    }
}

impl<S: Store> CrossCheck for NicCheck<'_, S> {
    fn check<'a>(
        &'a self,
        _raw: &'a Params,
        validated: &'a mut Params,
    ) -> BoxFuture<'a, Vec<Rejection>> {
        Box::pin(self.run(validated))
    }
}

/// Validate a MAC taken from a request path.
pub(crate) fn parse_mac(raw: &str) -> Result<crate::model::MacAddr, NapiError> {
    let number = fields::mac("mac", &Value::String(raw.to_owned()))?;
    number
        .as_u64()
        .and_then(crate::model::MacAddr::from_number)
        .ok_or_else(|| {
            NapiError::invalid_params(vec![FieldError::invalid("mac", "invalid MAC address")])
        })
}

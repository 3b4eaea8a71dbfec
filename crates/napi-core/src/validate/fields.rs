// ── Field validators ──
//
// Plain functions usable directly as `Validator`s. Each takes the field name
// (for error attribution) and the raw request value.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{FieldError, Rejection};
use crate::model::mac::MacAddr;
use crate::model::nic::NicState;

pub const MAX_INTERFACE_LEN: usize = 31;
pub const SUBNET_MIN_BITS: u64 = 8;
pub const INVALID_IP_MSG: &str = "invalid IP address";
pub const VLAN_MSG: &str = "VLAN ID must be a number between 0 and 4094, and not 1";

type Outcome = Result<Value, Rejection>;

fn reject(field: &str, message: &str) -> Outcome {
    Err(FieldError::invalid(field, message).into())
}

/// Accept a list, or a comma-separated string, as a list of trimmed items.
fn arrayify(raw: &Value) -> Vec<String> {
    match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_owned()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        Value::Number(n) => vec![n.to_string()],
        _ => Vec::new(),
    }
}

/// Parse a dotted quad or a decimal number into an IPv4 number. The zero
/// address is never valid.
pub fn address_to_number(text: &str) -> Option<u32> {
    let text = text.trim();
    let number = if let Ok(addr) = text.parse::<Ipv4Addr>() {
        u32::from(addr)
    } else if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        text.parse().ok()?
    } else {
        return None;
    };
    (number != 0).then_some(number)
}

fn is_canonical_uuid(text: &str) -> bool {
    Uuid::parse_str(text).is_ok_and(|u| u.hyphenated().to_string() == text)
}

pub fn boolean(field: &str, raw: &Value) -> Outcome {
    match raw {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
        _ => reject(field, "must be a boolean value"),
    }
}

/// Non-blank string.
pub fn string(field: &str, raw: &Value) -> Outcome {
    let Value::String(s) = raw else {
        return reject(field, "must be a string");
    };
    if s.trim().is_empty() {
        return reject(field, "must not be empty");
    }
    Ok(raw.clone())
}

pub fn uuid(field: &str, raw: &Value) -> Outcome {
    match raw {
        Value::String(s) if is_canonical_uuid(s) => Ok(raw.clone()),
        _ => reject(field, "invalid UUID"),
    }
}

/// Deduplicated, sorted list of UUIDs.
pub fn uuid_array(field: &str, raw: &Value) -> Outcome {
    let (valid, invalid): (BTreeSet<String>, BTreeSet<String>) =
        arrayify(raw).into_iter().partition(|s| is_canonical_uuid(s));

    if !invalid.is_empty() {
        return Err(FieldError::invalid(field, "invalid UUID")
            .with_extra("invalid", invalid.into_iter().collect::<Vec<_>>())
            .into());
    }
    Ok(json!(valid.into_iter().collect::<Vec<_>>()))
}

/// IPv4 address (dotted or numeric) as its number.
pub fn ip(field: &str, raw: &Value) -> Outcome {
    let number = match raw {
        Value::String(s) => address_to_number(s),
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).filter(|&n| n != 0),
        _ => None,
    };
    match number {
        Some(n) => Ok(json!(n)),
        None => reject(field, INVALID_IP_MSG),
    }
}

pub fn ip_array(field: &str, raw: &Value) -> Outcome {
    let mut numbers = Vec::new();
    let mut invalid = Vec::new();
    for item in arrayify(raw) {
        match address_to_number(&item) {
            Some(n) => numbers.push(n),
            None => invalid.push(item),
        }
    }

    if !invalid.is_empty() {
        let message = if invalid.len() == 1 { "invalid IP" } else { "invalid IPs" };
        return Err(FieldError::invalid(field, message).with_extra("invalid", invalid).into());
    }
    Ok(json!(numbers))
}

/// MAC address (any common notation, or its number) as its number.
pub fn mac(field: &str, raw: &Value) -> Outcome {
    let parsed = match raw {
        Value::String(s) => s.parse::<MacAddr>().ok(),
        Value::Number(n) => n.as_u64().and_then(MacAddr::from_number),
        _ => None,
    };
    match parsed {
        Some(mac) => Ok(json!(mac.as_u64())),
        None => reject(field, "invalid MAC address"),
    }
}

pub fn mac_array(field: &str, raw: &Value) -> Outcome {
    let mut macs = Vec::new();
    let mut invalid = Vec::new();
    for item in arrayify(raw) {
        match item.parse::<MacAddr>() {
            Ok(mac) => macs.push(mac.as_u64()),
            Err(_) => invalid.push(item),
        }
    }

    if !invalid.is_empty() {
        let message = if invalid.len() == 1 {
            "invalid MAC address"
        } else {
            "invalid MAC addresses"
        };
        return Err(FieldError::invalid(field, message).with_extra("invalid", invalid).into());
    }
    Ok(json!(macs))
}

/// VLAN ID in 0..=4094, excluding 1.
pub fn vlan(field: &str, raw: &Value) -> Outcome {
    let id = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match id {
        Some(id) if id != 1 && id <= 4094 => Ok(json!(id)),
        _ => reject(field, VLAN_MSG),
    }
}

pub fn nic_state(field: &str, raw: &Value) -> Outcome {
    let Value::String(s) = raw else {
        return reject(field, "must be a string");
    };
    if s.parse::<NicState>().is_err() {
        return reject(field, "must be a valid state");
    }
    Ok(raw.clone())
}

/// CIDR subnet. Splats `<field>`, `subnet_start_ip` and `subnet_bits`.
pub fn subnet(field: &str, raw: &Value) -> Outcome {
    let Some((addr, bits)) = raw.as_str().and_then(|s| s.split_once('/')) else {
        return reject(field, "Subnet must be in CIDR form");
    };
    if bits.contains('/') {
        return reject(field, "Subnet must be in CIDR form");
    }

    let start = addr.parse::<Ipv4Addr>().ok().map(u32::from);
    let bits = bits
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|b| (SUBNET_MIN_BITS..=32).contains(b));

    match (start, bits) {
        (Some(start), Some(bits)) => Ok(json!({
            field: raw,
            "subnet_start_ip": start,
            "subnet_bits": bits,
        })),
        (None, Some(_)) => reject(field, "Subnet IP invalid"),
        (Some(_), None) => reject(field, "Subnet bits invalid"),
        (None, None) => reject(field, "Subnet IP and bits invalid"),
    }
}

/// Nic tag name: at most 31 letters, digits and underscores.
pub fn nic_tag_name(field: &str, raw: &Value) -> Outcome {
    string(field, raw)?;
    let name = raw.as_str().unwrap_or_default();

    if name.len() > MAX_INTERFACE_LEN {
        return reject(
            field,
            &format!("must not be longer than {MAX_INTERFACE_LEN} characters"),
        );
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return reject(field, "must only contain numbers, letters and underscores");
    }
    Ok(raw.clone())
}

/// A nic tag name that ends in a number, e.g. `vnic0`.
pub fn interface_name(field: &str, raw: &Value) -> Outcome {
    nic_tag_name(field, raw)?;
    if !raw.as_str().is_some_and(|s| s.ends_with(|c: char| c.is_ascii_digit())) {
        return reject(field, "must end in a number");
    }
    Ok(raw.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, Rejection};
    use pretty_assertions::assert_eq;

    fn field_err(outcome: Outcome) -> FieldError {
        match outcome {
            Err(Rejection::Field(e)) => e,
            other => panic!("expected a field error, got {other:?}"),
        }
    }

    #[test]
    fn booleans_accept_strings() {
        assert_eq!(boolean("reserved", &json!("true")).unwrap(), json!(true));
        assert_eq!(boolean("reserved", &json!(false)).unwrap(), json!(false));
        assert_eq!(
            field_err(boolean("reserved", &json!("yes"))).message,
            "must be a boolean value"
        );
    }

    #[test]
    fn strings_must_not_be_blank() {
        assert_eq!(field_err(string("model", &json!("  "))).message, "must not be empty");
        assert_eq!(field_err(string("model", &json!(3))).message, "must be a string");
    }

    #[test]
    fn uuids_must_be_canonical_lowercase() {
        let id = "564d9b3c-7c3a-4f1e-8b9a-2b6f3e1c0d4a";
        assert_eq!(uuid("owner_uuid", &json!(id)).unwrap(), json!(id));
        assert!(uuid("owner_uuid", &json!(id.to_uppercase())).is_err());
        assert!(uuid("owner_uuid", &json!("nope")).is_err());
    }

    #[test]
    fn uuid_arrays_dedup_sort_and_list_invalid() {
        let a = "b0000000-0000-4000-8000-000000000000";
        let b = "a0000000-0000-4000-8000-000000000000";
        let out = uuid_array("owner_uuids", &json!(format!("{a}, {b},{a}"))).unwrap();
        assert_eq!(out, json!([b, a]));

        let err = field_err(uuid_array("owner_uuids", &json!([a, "zz", "yy"])));
        assert_eq!(err.extra.get("invalid"), Some(&json!(["yy", "zz"])));
    }

    #[test]
    fn ips_accept_addresses_and_numbers() {
        assert_eq!(ip("ip", &json!("10.0.0.1")).unwrap(), json!(167_772_161));
        assert_eq!(ip("ip", &json!(167_772_161)).unwrap(), json!(167_772_161));
        assert_eq!(field_err(ip("ip", &json!("10.0.0.256"))).message, INVALID_IP_MSG);

        let err = field_err(ip_array("ips", &json!("10.0.0.1, bogus")));
        assert_eq!(err.message, "invalid IP");
        assert_eq!(err.extra.get("invalid"), Some(&json!(["bogus"])));
    }

    #[test]
    fn zero_is_not_an_address() {
        assert_eq!(address_to_number("0"), None);
        assert_eq!(address_to_number("0.0.0.0"), None);
        assert_eq!(address_to_number("1"), Some(1));
        assert_eq!(field_err(ip("ip", &json!(0))).message, INVALID_IP_MSG);
        assert_eq!(field_err(ip("ip", &json!("0"))).message, INVALID_IP_MSG);

        let err = field_err(ip_array("ips", &json!(["0", "10.0.0.1"])));
        assert_eq!(err.extra.get("invalid"), Some(&json!(["0"])));
    }

    #[test]
    fn macs_parse_to_numbers() {
        assert_eq!(mac("mac", &json!("00:00:00:00:00:0a")).unwrap(), json!(10));
        assert_eq!(field_err(mac("mac", &json!("00:00:00"))).code, ErrorCode::InvalidParameter);

        let err = field_err(mac_array("macs", &json!(["x", "y"])));
        assert_eq!(err.message, "invalid MAC addresses");
    }

    #[test]
    fn vlan_range_excludes_one() {
        assert_eq!(vlan("vlan_id", &json!(0)).unwrap(), json!(0));
        assert_eq!(vlan("vlan_id", &json!("4094")).unwrap(), json!(4094));
        assert!(vlan("vlan_id", &json!(1)).is_err());
        assert!(vlan("vlan_id", &json!(4095)).is_err());
        assert!(vlan("vlan_id", &json!(-3)).is_err());
    }

    #[test]
    fn nic_states_are_a_closed_set() {
        assert!(nic_state("state", &json!("running")).is_ok());
        let err = field_err(nic_state("state", &json!("paused")));
        assert_eq!(err.message, "must be a valid state");
    }

    #[test]
    fn subnet_errors_name_the_bad_part() {
        let message = |raw: &str| field_err(subnet("subnet", &json!(raw))).message;
        assert_eq!(message("10.0.0.0"), "Subnet must be in CIDR form");
        assert_eq!(message("10.0.0.0/4"), "Subnet bits invalid");
        assert_eq!(message("10.0.0/33"), "Subnet IP and bits invalid");
    }

    #[test]
    fn tag_and_interface_names() {
        assert!(nic_tag_name("nic_tag", &json!("external_1")).is_ok());
        assert!(nic_tag_name("nic_tag", &json!("bad-name")).is_err());
        assert!(nic_tag_name("nic_tag", &json!("a".repeat(32))).is_err());
        assert!(interface_name("interface", &json!("vnic0")).is_ok());
        assert_eq!(
            field_err(interface_name("interface", &json!("vnic"))).message,
            "must end in a number"
        );
    }
}

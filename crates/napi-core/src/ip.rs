// ── IP repository ──
//
// Reads and writes rows of a network's IP bucket. Every function takes the
// owning `Network` so the bucket name and ownership rules come from one
// place.

use futures_util::TryStreamExt;
use napi_store::gateway::{UpdateObj, get_obj, update_obj};
use napi_store::{
    BatchOp, ExpectedEtag, Filter, FilterInput, FindOptions, Sort, Store, filter_for,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{FieldError, NapiError, Rejection};
use crate::model::{Ip, Network, is_placeholder};
use crate::validate::{ParamSpec, Params, fields};

pub const OWNER_MATCH_MSG: &str = "owner cannot provision on network";

/// Cross-field check: a given `owner_uuid` must be allowed on `network`
/// unless `check_owner` is false.
pub fn owner_check(
    network: &Network,
) -> impl Fn(&Params, &mut Params) -> Vec<Rejection> + Send + Sync + '_ {
    move |_raw: &Params, validated: &mut Params| -> Vec<Rejection> {
        let check = validated.get("check_owner").and_then(Value::as_bool).unwrap_or(true);
        let owner = validated
            .get("owner_uuid")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());

        match owner {
            Some(owner) if check && !network.is_owner(&owner) => {
                vec![FieldError::invalid("owner_uuid", OWNER_MATCH_MSG).into()]
            }
            _ => Vec::new(),
        }
    }
}

/// Validated IP fields.
#[derive(Debug, Default, Deserialize)]
struct IpParams {
    ip: Option<u32>,
    belongs_to_type: Option<String>,
    belongs_to_uuid: Option<Uuid>,
    owner_uuid: Option<Uuid>,
    reserved: Option<bool>,
}

impl IpParams {
    fn from_validated(validated: Params) -> Result<Self, NapiError> {
        serde_json::from_value(Value::Object(validated))
            .map_err(|e| NapiError::from(napi_store::Error::from(e)))
    }

    fn apply(self, ip: &mut Ip) {
        if self.belongs_to_type.is_some() {
            ip.belongs_to_type = self.belongs_to_type;
        }
        if self.belongs_to_uuid.is_some() {
            ip.belongs_to_uuid = self.belongs_to_uuid;
        }
        if self.owner_uuid.is_some() {
            ip.owner_uuid = self.owner_uuid;
        }
        if let Some(reserved) = self.reserved {
            ip.reserved = reserved;
        }
    }
}

/// IPs of `network`, ascending by number. Placeholder rows are skipped.
pub async fn list<S: Store>(
    store: &S,
    network: &Network,
    filter: FilterInput<'_>,
) -> Result<Vec<Ip>, NapiError> {
    let bucket = network.ip_bucket();
    let filter = filter_for(filter, &bucket.index)?.unwrap_or_else(|| Filter::present("ip"));
    debug!(network = %network.uuid, filter = %filter, "listing IPs");

    let opts = FindOptions { sort: Some(Sort::asc("ip")), limit: None };
    let mut records = store.find_objects(&bucket.name, &filter, &opts);

    let mut ips = Vec::new();
    while let Some(record) = records.try_next().await? {
        if is_placeholder(&record.value) {
            continue;
        }
        ips.push(Ip::from_stored(network.uuid, &record)?);
    }
    Ok(ips)
}

/// The IP at `number`. A missing row yields a free, unpersisted IP when
/// `placeholder_if_absent` is set, `NotFound` otherwise.
pub async fn get<S: Store>(
    store: &S,
    network: &Network,
    number: u32,
    placeholder_if_absent: bool,
) -> Result<Ip, NapiError> {
    let bucket = network.ip_bucket();
    match get_obj(store, &bucket, &number.to_string()).await {
        Ok(record) => Ip::from_stored(network.uuid, &record),
        Err(e) if e.is_not_found() && placeholder_if_absent => {
            Ok(Ip::unassigned(network.uuid, number))
        }
        Err(e) => Err(e.into()),
    }
}

/// Create an IP from request params. A placeholder already at the address
/// is overwritten; a real row is a duplicate.
pub async fn create<S: Store>(
    store: &S,
    network: &Network,
    params: &Params,
) -> Result<Ip, NapiError> {
    debug!(network = %network.uuid, "creating IP");

    let mut spec = ParamSpec::new()
        .required("ip", fields::ip)
        .optional("check_owner", fields::boolean)
        .optional("reserved", fields::boolean);
    if params.contains_key("belongs_to_uuid") || params.contains_key("belongs_to_type") {
        spec = spec
            .required("belongs_to_uuid", fields::uuid)
            .required("belongs_to_type", fields::string)
            .required("owner_uuid", fields::uuid);
    } else {
        spec = spec.optional("owner_uuid", fields::uuid);
    }
    let validated = spec.after(owner_check(network)).validate(params).await?;

    let parsed = IpParams::from_validated(validated)?;
    let number = parsed
        .ip
        .ok_or_else(|| NapiError::invalid_params(vec![FieldError::missing("ip")]))?;
    let mut ip = Ip::unassigned(network.uuid, number);
    parsed.apply(&mut ip);

    let bucket = network.ip_bucket();
    let value = ip.record()?;
    let key = ip.key();
    let put = store.put_object(&bucket.name, &key, &value, ExpectedEtag::Absent);
    let written = match put.await {
        Ok(etag) => etag,
        Err(e) if e.is_version_conflict() => {
            let existing = get_obj(store, &bucket, &ip.key()).await?;
            if !is_placeholder(&existing.value) {
                return Err(NapiError::invalid_params(vec![FieldError::duplicate("ip")]));
            }
            debug!(ip = %ip.address(), "replacing placeholder");
            store
                .put_object(&bucket.name, &ip.key(), &value, ExpectedEtag::Is(existing.etag))
                .await?
        }
        Err(e) => {
            error!(ip = %ip.address(), error = %e, "error creating IP");
            return Err(e.into());
        }
    };

    ip.etag = Some(written);
    info!(ip = %ip.address(), network = %network.uuid, "created IP");
    Ok(ip)
}

/// Update owning fields of an existing IP.
///
/// When the row lacks one of `belongs_to_type`/`belongs_to_uuid`, setting
/// the other requires it too; setting either on a row without an owner
/// requires `owner_uuid`.
pub async fn update<S: Store>(
    store: &S,
    network: &Network,
    number: u32,
    params: &Params,
) -> Result<Ip, NapiError> {
    let current = get(store, network, number, false).await?;
    debug!(ip = %current.address(), "updating IP");

    let mut spec = ParamSpec::new()
        .optional("belongs_to_type", fields::string)
        .optional("belongs_to_uuid", fields::uuid)
        .optional("check_owner", fields::boolean)
        .optional("owner_uuid", fields::uuid)
        .optional("reserved", fields::boolean);

    let sets_uuid = params.contains_key("belongs_to_uuid");
    let sets_type = params.contains_key("belongs_to_type");
    if sets_uuid && current.belongs_to_type.is_none() {
        spec = spec.promote("belongs_to_type");
    }
    if sets_type && current.belongs_to_uuid.is_none() {
        spec = spec.promote("belongs_to_uuid");
    }
    if current.owner_uuid.is_none() && (sets_uuid || sets_type) {
        spec = spec.promote("owner_uuid");
    }
    let validated = spec.after(owner_check(network)).validate(params).await?;

    let mut updated = current.clone();
    IpParams::from_validated(validated)?.apply(&mut updated);
    replace(store, network, &updated).await
}

/// Write `ip` outright, guarded by its etag.
pub async fn replace<S: Store>(store: &S, network: &Network, ip: &Ip) -> Result<Ip, NapiError> {
    let bucket = network.ip_bucket();
    let expected = ExpectedEtag::from(ip.etag.clone());
    let record = update_obj(store, &bucket, &ip.key(), UpdateObj::Replace(ip.record()?, expected))
        .await
        .inspect_err(|e| error!(ip = %ip.address(), error = %e, "error updating IP"))?;

    let mut written = ip.clone();
    written.etag = Some(record.etag);
    info!(ip = %written.address(), network = %network.uuid, "updated IP");
    Ok(written)
}

/// Drop `belongs_to_*`, keeping `owner_uuid` and `reserved`.
pub async fn unassign<S: Store>(
    store: &S,
    network: &Network,
    number: u32,
) -> Result<Ip, NapiError> {
    let bucket = network.ip_bucket();
    let removed = vec!["belongs_to_type".to_owned(), "belongs_to_uuid".to_owned()];
    let record = update_obj(store, &bucket, &number.to_string(), UpdateObj::Remove(removed)).await?;
    info!(ip = %std::net::Ipv4Addr::from(number), network = %network.uuid, "unassigned IP");
    Ip::from_stored(network.uuid, &record)
}

/// Replace the row with a placeholder marker.
pub async fn delete<S: Store>(store: &S, network: &Network, number: u32) -> Result<(), NapiError> {
    let bucket = network.ip_bucket();
    update_obj(
        store,
        &bucket,
        &number.to_string(),
        UpdateObj::Replace(Ip::placeholder_record(number), ExpectedEtag::Unchecked),
    )
    .await
    .inspect_err(|e| error!(ip = number, error = %e, "error deleting IP"))?;

    info!(ip = %std::net::Ipv4Addr::from(number), network = %network.uuid, "deleted IP");
    Ok(())
}

/// Write many IPs in one atomic batch.
pub async fn batch_create<S: Store>(
    store: &S,
    network: &Network,
    ips: &[Ip],
) -> Result<Vec<Ip>, NapiError> {
    let bucket = network.ip_bucket();
    let ops = ips
        .iter()
        .map(|ip| Ok(BatchOp::put(&bucket.name, ip.key(), ip.record()?, ExpectedEtag::Unchecked)))
        .collect::<Result<Vec<BatchOp>, NapiError>>()?;

    info!(network = %network.uuid, count = ops.len(), "batch creating IPs");
    let committed = store.batch(ops).await?;

    Ok(ips
        .iter()
        .map(|ip| Ip {
            network_uuid: network.uuid,
            etag: committed.etag_of(&bucket.name, &ip.key()).cloned(),
            ..ip.clone()
        })
        .collect())
}

/// Create or migrate the network's IP bucket.
pub async fn init_bucket<S: Store>(
    store: &S,
    network: &Network,
    version: u32,
) -> Result<(), NapiError> {
    let mut bucket = network.ip_bucket();
    bucket.version = version;
    napi_store::init_bucket(store, &bucket).await?;
    Ok(())
}

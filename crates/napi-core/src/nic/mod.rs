// ── Nic repository & lifecycle ──
//
// Nic rows live in one bucket keyed by MAC number. A nic may point at one
// IP on one network; both rows change together through atomic batches.

pub mod params;
pub mod update;

use futures_util::TryStreamExt;
use napi_store::gateway::{del_obj, get_obj};
use napi_store::{ExpectedEtag, Filter, FilterInput, FindOptions, Sort, Store, filter_for};
use tracing::{debug, error, info, warn};

use crate::error::{FieldError, NapiError};
use crate::ip;
use crate::model::{MacAddr, NIC_BUCKET, NetworkCatalog, Nic, NicUpdate, nic_bucket};
use crate::provision::{self, Batch, IpRequest};
use crate::validate::Params;

pub use params::{NO_NETWORK_MSG, NO_NIC_TAG_MSG, OUTSIDE_SUBNET_MSG};
pub use update::{UpdateContext, UpdateType, update};

/// A nic with its network and IP read through. The IP is a free placeholder
/// when its row is missing.
pub async fn get<S: Store, C: NetworkCatalog>(
    store: &S,
    catalog: &C,
    mac: &str,
) -> Result<Nic, NapiError> {
    let mac = params::parse_mac(mac)?;
    fetch(store, catalog, mac).await
}

pub(crate) async fn fetch<S: Store, C: NetworkCatalog>(
    store: &S,
    catalog: &C,
    mac: MacAddr,
) -> Result<Nic, NapiError> {
    let record = get_obj(store, &nic_bucket(), &mac.key()).await?;
    let mut nic = Nic::from_stored(&record)?;

    if let Some(uuid) = nic.network_uuid {
        match catalog.network(uuid).await? {
            Some(network) => {
                if let Some(number) = nic.ip_number {
                    nic.ip = Some(ip::get(store, &network, number, true).await?);
                }
                nic.network = Some(network);
            }
            None => warn!(mac = %mac, network = %uuid, "nic points at an unknown network"),
        }
    }
    Ok(nic)
}

/// Nics matching `filter`, ascending by MAC. No read-through.
pub async fn list<S: Store>(store: &S, filter: FilterInput<'_>) -> Result<Vec<Nic>, NapiError> {
    let bucket = nic_bucket();
    let filter = filter_for(filter, &bucket.index)?.unwrap_or_else(|| Filter::present("mac"));
    debug!(filter = %filter, "listing nics");

    let opts = FindOptions { sort: Some(Sort::asc("mac")), limit: None };
    let mut records = store.find_objects(&bucket.name, &filter, &opts);

    let mut nics = Vec::new();
    while let Some(record) = records.try_next().await? {
        nics.push(Nic::from_stored(&record)?);
    }
    Ok(nics)
}

/// Create a nic, provisioning an IP when a network is given.
pub async fn create<S: Store, C: NetworkCatalog>(
    store: &S,
    catalog: &C,
    attempts: u32,
    raw: &Params,
) -> Result<Nic, NapiError> {
    debug!("creating nic");
    let validated = params::nic_spec(store, catalog, None)
        .promote("belongs_to_type")
        .promote("belongs_to_uuid")
        .promote("owner_uuid")
        .validate(raw)
        .await?;
    let update = NicUpdate::from_params(&validated)?;

    let (Some(mac), Some(kind), Some(belongs_to), Some(owner)) = (
        update.mac.and_then(MacAddr::from_number),
        update.belongs_to_type.clone(),
        update.belongs_to_uuid,
        update.owner_uuid,
    ) else {
        return Err(NapiError::invalid_params(vec![FieldError::missing("mac")]));
    };
    let nic = Nic::new(mac, kind, belongs_to, owner).merged(&update);

    let created = match &update.network {
        Some(network) => {
            let request = match update.ip_obj {
                Some(ip) if !ip.provisionable() => return Err(provision::in_use(&ip)),
                Some(ip) => IpRequest::Specific(ip),
                None => IpRequest::Any,
            };
            provision::nic_and_ip(store, attempts, Batch::new(), &nic, network, request).await
        }
        None => write_new(store, nic).await,
    };

    created.map_err(|e| match e {
        NapiError::Conflict { bucket, .. } if bucket == NIC_BUCKET => {
            NapiError::invalid_params(vec![FieldError::duplicate("mac")])
        }
        other => other,
    })
}

async fn write_new<S: Store>(store: &S, mut nic: Nic) -> Result<Nic, NapiError> {
    let etag = store
        .put_object(NIC_BUCKET, &nic.key(), &nic.record()?, ExpectedEtag::Absent)
        .await
        .inspect_err(|e| error!(mac = %nic.mac, error = %e, "error creating nic"))?;
    nic.etag = Some(etag);
    info!(mac = %nic.mac, belongs_to = %nic.belongs_to_uuid, "created nic");
    Ok(nic)
}

/// Delete a nic, then release its IP.
///
/// The IP is left alone when it belongs to someone else, loses its owner
/// but stays reserved when reserved, and is freed otherwise. A failure
/// releasing the IP is returned; the nic stays deleted.
pub async fn delete<S: Store, C: NetworkCatalog>(
    store: &S,
    catalog: &C,
    mac: &str,
) -> Result<(), NapiError> {
    let mac = params::parse_mac(mac)?;
    let nic = fetch(store, catalog, mac).await?;

    del_obj(store, &nic_bucket(), &nic.key()).await?;
    info!(mac = %nic.mac, belongs_to = %nic.belongs_to_uuid, "deleted nic");

    let (Some(held), Some(network)) = (&nic.ip, &nic.network) else {
        return Ok(());
    };

    if held.belongs_to_uuid != Some(nic.belongs_to_uuid) {
        warn!(
            mac = %nic.mac,
            ip = %held.address(),
            ip_belongs_to = ?held.belongs_to_uuid,
            "IP no longer belongs to nic, leaving it"
        );
        return Ok(());
    }

    if held.reserved {
        ip::unassign(store, network, held.number).await?;
    } else {
        ip::delete(store, network, held.number).await?;
    }
    Ok(())
}

// ── Provisioning & batch commit ──
//
// Picks an IP for a nic and writes nic row + IP row in one atomic batch.
// Losing a race for the chosen IP (a version conflict on that row) is
// retried with a fresh candidate; any other failure is final.

use futures_util::TryStreamExt;
use napi_store::{BatchOp, Committed, Filter, FindOptions, Sort, Store};
use tracing::{debug, error, info, warn};

use crate::error::NapiError;
use crate::ip;
use crate::model::{Ip, NIC_BUCKET, Network, Nic, is_placeholder};

/// Pending writes of one request, committed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: BatchOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Which IP a nic should get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRequest {
    /// Lowest free address in the provision range.
    Any,
    /// This address, as last read from the store.
    Specific(Ip),
}

/// Queue the nic's row. No store I/O.
pub fn add_nic_to_batch(batch: &mut Batch, nic: &Nic) -> Result<(), NapiError> {
    batch.push(nic.batch_op()?);
    Ok(())
}

/// Apply every op of `batch` atomically.
pub async fn commit_batch<S: Store>(store: &S, batch: Batch) -> Result<Committed, NapiError> {
    let count = batch.len();
    match store.batch(batch.into_ops()).await {
        Ok(committed) => {
            info!(ops = count, "committed batch");
            Ok(committed)
        }
        Err(e) => {
            error!(ops = count, error = %e, "error committing batch");
            Err(e.into())
        }
    }
}

/// Lowest assignable IP on `network`: a gap in the bucket (never written)
/// or a free/placeholder row, skipping the gateway.
pub async fn next_ip_on_network<S: Store>(store: &S, network: &Network) -> Result<Ip, NapiError> {
    let bucket = network.ip_bucket();
    let (start, end) = network.provision_range();
    let gateway = network.gateway.map(u32::from);
    let full = || NapiError::SubnetFull { network_uuid: network.uuid };

    if start > end {
        return Err(full());
    }

    let filter = Filter::And(vec![Filter::ge("ip", start), Filter::le("ip", end)]);
    let opts = FindOptions { sort: Some(Sort::asc("ip")), limit: None };
    let mut rows = store.find_objects(&bucket.name, &filter, &opts);

    // First number not yet accounted for by a row.
    let mut cursor = u64::from(start);
    while let Some(record) = rows.try_next().await? {
        let row = Ip::from_stored(network.uuid, &record)?;
        if let Some(n) = first_gap(cursor, u64::from(row.number), gateway) {
            debug!(ip = %std::net::Ipv4Addr::from(n), "found unused IP");
            return Ok(Ip::unassigned(network.uuid, n));
        }
        if Some(row.number) != gateway && (is_placeholder(&record.value) || row.free()) {
            debug!(ip = %row.address(), "reusing free IP");
            return Ok(row);
        }
        cursor = u64::from(row.number) + 1;
    }

    first_gap(cursor, u64::from(end) + 1, gateway)
        .map(|n| Ip::unassigned(network.uuid, n))
        .ok_or_else(full)
}

/// First number in `from..to` that is not the gateway.
fn first_gap(from: u64, to: u64, gateway: Option<u32>) -> Option<u32> {
    (from..to)
        .filter_map(|n| u32::try_from(n).ok())
        .find(|n| Some(*n) != gateway)
}

/// Stop error for an IP held by someone else.
pub(crate) fn in_use(ip: &Ip) -> NapiError {
    NapiError::used_by_stop(
        "ip",
        ip.belongs_to_type.as_deref().unwrap_or("unknown"),
        &ip.belongs_to_uuid.map(|u| u.to_string()).unwrap_or_default(),
    )
}

/// Give `nic` an IP on `network` and commit nic row, IP row and every op
/// already in `batch` together.
///
/// A lost race for the chosen IP is retried up to `attempts` times. A
/// specific request is re-read first and fails as in use once someone else
/// holds it.
pub async fn nic_and_ip<S: Store>(
    store: &S,
    attempts: u32,
    batch: Batch,
    nic: &Nic,
    network: &Network,
    request: IpRequest,
) -> Result<Nic, NapiError> {
    let bucket = network.ip_bucket();
    let mut request = request;
    let mut last_key = String::new();

    for attempt in 1..=attempts.max(1) {
        let candidate = match &request {
            IpRequest::Specific(hint) if !hint.provisionable() => return Err(in_use(hint)),
            IpRequest::Specific(hint) => hint.clone(),
            IpRequest::Any => next_ip_on_network(store, network).await?,
        };

        let ip = candidate.updated_from(nic);
        let mut provisioned = nic.clone();
        provisioned.attach(ip.clone(), network.clone());

        let mut pending = batch.clone();
        add_nic_to_batch(&mut pending, &provisioned)?;
        pending.push(ip.batch_op(&bucket.name)?);

        last_key = ip.key();
        debug!(attempt, ip = %ip.address(), mac = %nic.mac, "provisioning IP");

        match store.batch(pending.into_ops()).await {
            Ok(committed) => {
                provisioned.etag = committed.etag_of(NIC_BUCKET, &provisioned.key()).cloned();
                if let Some(held) = provisioned.ip.as_mut() {
                    held.etag = committed.etag_of(&bucket.name, &last_key).cloned();
                }
                info!(
                    mac = %provisioned.mac,
                    ip = %ip.address(),
                    network = %network.uuid,
                    "provisioned nic"
                );
                return Ok(provisioned);
            }
            Err(e) if e.conflict_key() == Some((bucket.name.as_str(), last_key.as_str())) => {
                warn!(attempt, ip = %ip.address(), "IP taken concurrently, retrying");
                if let IpRequest::Specific(hint) = &request {
                    let fresh = ip::get(store, network, hint.number, true).await?;
                    request = IpRequest::Specific(fresh);
                }
            }
            Err(e) => {
                error!(mac = %nic.mac, error = %e, "error provisioning nic");
                return Err(e.into());
            }
        }
    }

    error!(mac = %nic.mac, attempts, "giving up after repeated IP conflicts");
    Err(NapiError::Conflict { bucket: bucket.name, key: last_key })
}

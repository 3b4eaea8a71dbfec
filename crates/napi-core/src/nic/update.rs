// ── Nic update ──
//
// Runs in stages, each able to end the request: fetch the nic, validate,
// pick the update type, then either provision a new IP or rewrite the nic
// and its IP in place. Every write of a request lands in one batch.

use std::str::FromStr;

use napi_store::Store;
use serde_json::Value;
use tracing::{debug, error, info};

use super::{fetch, params};
use crate::error::{FieldError, NapiError};
use crate::model::{MacAddr, NIC_BUCKET, NetworkCatalog, Nic, NicUpdate, ip_bucket_name};
use crate::provision::{self, Batch, IpRequest, add_nic_to_batch, commit_batch};
use crate::validate::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum UpdateType {
    /// The nic needs a new IP from the provisioning engine.
    Provision,
    /// The nic and its IP (if any) are rewritten as requested.
    Update,
}

/// State carried through the stages of one update.
#[derive(Debug)]
pub struct UpdateContext {
    pub existing: Nic,
    pub update: NicUpdate,
    pub kind: UpdateType,
    pub batch: Batch,
}

impl UpdateContext {
    pub fn new(existing: Nic, update: NicUpdate) -> Self {
        let kind = update_type(&existing, &update);
        Self { existing, update, kind, batch: Batch::new() }
    }
}

/// `Provision` when the nic owns no IP and a network is requested, or the
/// network changes without an explicit IP.
fn update_type(existing: &Nic, update: &NicUpdate) -> UpdateType {
    let requested = update.network_uuid;
    let changes_network = requested.is_some_and(|uuid| Some(uuid) != existing.network_uuid);

    let gains_ip = existing.owned_ip().is_none() && requested.is_some();
    if gains_ip || (changes_network && update.ip.is_none()) {
        UpdateType::Provision
    } else {
        UpdateType::Update
    }
}

/// Update the nic at `mac` with `raw` params.
pub async fn update<S: Store, C: NetworkCatalog>(
    store: &S,
    catalog: &C,
    attempts: u32,
    mac: &str,
    raw: &Params,
) -> Result<Nic, NapiError> {
    let existing = match MacAddr::from_str(mac) {
        Ok(parsed) => Some(fetch(store, catalog, parsed).await?),
        Err(_) => None,
    };

    let mut raw = raw.clone();
    raw.insert("mac".into(), Value::String(mac.to_owned()));
    let validated = params::nic_spec(store, catalog, existing.as_ref()).validate(&raw).await?;

    let Some(existing) = existing else {
        return Err(NapiError::not_found("nic"));
    };
    let mut ctx = UpdateContext::new(existing, NicUpdate::from_params(&validated)?);
    debug!(mac = %ctx.existing.mac, kind = %ctx.kind, "updating nic");

    let result = match ctx.kind {
        UpdateType::Provision => provision_stage(store, attempts, &mut ctx).await,
        UpdateType::Update => update_stage(store, &mut ctx).await,
    };

    match &result {
        Ok(nic) => info!(mac = %nic.mac, kind = %ctx.kind, ip = ?nic.ip_number, "updated nic"),
        Err(e) => error!(
            mac = %ctx.existing.mac,
            before = ?ctx.existing.view(),
            error = %e,
            "error updating nic"
        ),
    }
    result
}

async fn provision_stage<S: Store>(
    store: &S,
    attempts: u32,
    ctx: &mut UpdateContext,
) -> Result<Nic, NapiError> {
    let Some(network) = ctx.update.network.clone() else {
        return Err(NapiError::invalid_params(vec![FieldError::missing("network_uuid")]));
    };

    let request = match ctx.update.ip_obj.clone() {
        Some(ip) if !ip.provisionable() => return Err(provision::in_use(&ip)),
        Some(ip) => IpRequest::Specific(ip),
        None => IpRequest::Any,
    };

    if let Some(old) = ctx.existing.owned_ip() {
        debug!(ip = %old.address(), "freeing IP from previous network");
        ctx.batch.push(old.freed_op(&ip_bucket_name(old.network_uuid)));
    }

    let merged = ctx.existing.merged(&ctx.update);
    provision::nic_and_ip(store, attempts, ctx.batch.clone(), &merged, &network, request).await
}

async fn update_stage<S: Store>(store: &S, ctx: &mut UpdateContext) -> Result<Nic, NapiError> {
    let existing = &ctx.existing;
    let requested = ctx.update.ip_obj.clone();
    let changing = requested.as_ref().is_some_and(|ip| {
        Some(ip.number) != existing.ip_number || Some(ip.network_uuid) != existing.network_uuid
    });

    if changing {
        if let Some(ip) = &requested {
            if ip.belongs_to_uuid.is_some_and(|holder| holder != existing.belongs_to_uuid) {
                return Err(provision::in_use(ip));
            }
        }
    }

    let mut merged = existing.merged(&ctx.update);
    merged.network = ctx.update.network.clone();

    let target = requested.or_else(|| existing.owned_ip().cloned());
    let ip = target.map(|ip| ip.updated_from(&merged));
    if let Some(ip) = &ip {
        merged.ip_number = Some(ip.number);
        merged.network_uuid = Some(ip.network_uuid);
    }

    add_nic_to_batch(&mut ctx.batch, &merged)?;
    if let Some(ip) = &ip {
        ctx.batch.push(ip.batch_op(&ip_bucket_name(ip.network_uuid))?);
    }
    if changing {
        if let Some(old) = existing.owned_ip() {
            debug!(ip = %old.address(), "freeing replaced IP");
            ctx.batch.push(old.freed_op(&ip_bucket_name(old.network_uuid)));
        }
    }

    let committed = commit_batch(store, std::mem::take(&mut ctx.batch)).await?;
    merged.etag = committed.etag_of(NIC_BUCKET, &merged.key()).cloned();
    merged.ip = ip.map(|mut ip| {
        ip.etag = committed.etag_of(&ip_bucket_name(ip.network_uuid), &ip.key()).cloned();
        ip
    });
    Ok(merged)
}

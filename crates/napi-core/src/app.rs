// ── App facade ──
//
// Single entry point for embedding layers: owns the store, the network
// catalog and the core tunables, and routes each request to the matching
// repository or orchestrator.

use std::sync::Arc;

use napi_store::{FilterInput, Store};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::{FieldError, NapiError};
use crate::model::{Ip, Network, NetworkCatalog, Nic, nic_bucket};
use crate::validate::{Params, fields};
use crate::{ip, nic, provision};

/// Cheaply cloneable via `Arc<AppInner>`.
pub struct App<S, C> {
    inner: Arc<AppInner<S, C>>,
}

struct AppInner<S, C> {
    store: S,
    catalog: C,
    config: CoreConfig,
}

impl<S, C> Clone for App<S, C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S: Store, C: NetworkCatalog> App<S, C> {
    pub fn new(store: S, catalog: C, config: CoreConfig) -> Self {
        Self {
            inner: Arc::new(AppInner { store, catalog, config }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn catalog(&self) -> &C {
        &self.inner.catalog
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    // ── Setup ────────────────────────────────────────────────────────

    /// Create or migrate the nic bucket.
    pub async fn init_buckets(&self) -> Result<(), NapiError> {
        let mut spec = nic_bucket();
        spec.version = self.inner.config.nic_bucket_version;
        napi_store::init_bucket(self.store(), &spec).await?;
        info!(bucket = %spec.name, version = spec.version, "nic bucket ready");
        Ok(())
    }

    /// Create or migrate the IP bucket of `network`.
    pub async fn init_network(&self, network: &Network) -> Result<(), NapiError> {
        ip::init_bucket(self.store(), network, self.inner.config.ip_bucket_version).await
    }

    /// The network with `uuid`, or `NotFound`.
    pub async fn network(&self, uuid: Uuid) -> Result<Network, NapiError> {
        self.catalog()
            .network(uuid)
            .await?
            .ok_or_else(|| NapiError::not_found("network"))
    }

    // ── Nics ─────────────────────────────────────────────────────────

    pub async fn create_nic(&self, params: &Params) -> Result<Nic, NapiError> {
        let attempts = self.inner.config.provision_attempts;
        nic::create(self.store(), self.catalog(), attempts, params).await
    }

    pub async fn update_nic(&self, mac: &str, params: &Params) -> Result<Nic, NapiError> {
        let attempts = self.inner.config.provision_attempts;
        nic::update(self.store(), self.catalog(), attempts, mac, params).await
    }

    pub async fn delete_nic(&self, mac: &str) -> Result<(), NapiError> {
        nic::delete(self.store(), self.catalog(), mac).await
    }

    pub async fn get_nic(&self, mac: &str) -> Result<Nic, NapiError> {
        nic::get(self.store(), self.catalog(), mac).await
    }

    pub async fn list_nics(&self, filter: FilterInput<'_>) -> Result<Vec<Nic>, NapiError> {
        nic::list(self.store(), filter).await
    }

    // ── IPs ──────────────────────────────────────────────────────────

    pub async fn list_ips(
        &self,
        network_uuid: Uuid,
        filter: FilterInput<'_>,
    ) -> Result<Vec<Ip>, NapiError> {
        let network = self.network(network_uuid).await?;
        ip::list(self.store(), &network, filter).await
    }

    /// The IP at `address`. Unrecorded addresses inside the subnet come back
    /// free.
    pub async fn get_ip(&self, network_uuid: Uuid, address: &str) -> Result<Ip, NapiError> {
        let network = self.network(network_uuid).await?;
        let number = ip_in(&network, address)?;
        ip::get(self.store(), &network, number, true).await
    }

    pub async fn create_ip(&self, network_uuid: Uuid, params: &Params) -> Result<Ip, NapiError> {
        let network = self.network(network_uuid).await?;
        ip::create(self.store(), &network, params).await
    }

    pub async fn create_ips(&self, network_uuid: Uuid, ips: &[Ip]) -> Result<Vec<Ip>, NapiError> {
        let network = self.network(network_uuid).await?;
        ip::batch_create(self.store(), &network, ips).await
    }

    pub async fn update_ip(
        &self,
        network_uuid: Uuid,
        address: &str,
        params: &Params,
    ) -> Result<Ip, NapiError> {
        let network = self.network(network_uuid).await?;
        let number = ip_in(&network, address)?;
        ip::update(self.store(), &network, number, params).await
    }

    pub async fn delete_ip(&self, network_uuid: Uuid, address: &str) -> Result<(), NapiError> {
        let network = self.network(network_uuid).await?;
        let number = ip_in(&network, address)?;
        ip::delete(self.store(), &network, number).await
    }

    /// The IP the next provision on the network would pick.
    pub async fn next_free_ip(&self, network_uuid: Uuid) -> Result<Ip, NapiError> {
        let network = self.network(network_uuid).await?;
        provision::next_ip_on_network(self.store(), &network).await
    }
}

/// Parse `address` and require it inside `network`'s subnet.
fn ip_in(network: &Network, address: &str) -> Result<u32, NapiError> {
    let number = fields::address_to_number(address).ok_or_else(|| {
        NapiError::invalid_params(vec![FieldError::invalid("ip", fields::INVALID_IP_MSG)])
    })?;
    if !network.contains(number) {
        debug!(network = %network.uuid, address, "address outside subnet");
        return Err(NapiError::not_found("IP"));
    }
    Ok(number)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::StaticCatalog;
    use napi_store::MemoryStore;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    async fn app() -> (App<MemoryStore, StaticCatalog>, Network) {
        let subnet = Ipv4Addr::new(10, 0, 0, 0);
        let network = Network::new(Uuid::new_v4(), "admin", subnet, 24, "admin", 0);
        let catalog = StaticCatalog::new();
        catalog.insert_network(network.clone());
        let app = App::new(MemoryStore::new(), catalog, CoreConfig::default());
        app.init_buckets().await.unwrap();
        app.init_network(&network).await.unwrap();
        (app, network)
    }

    #[tokio::test]
    async fn clones_share_state() {
        let (app, network) = app().await;
        let other = app.clone();
        let before = other.store().writes();
        app.create_ips(network.uuid, &[Ip::unassigned(network.uuid, 167_772_170)]).await.unwrap();
        assert_eq!(other.store().writes(), before + 1);
    }

    #[tokio::test]
    async fn unknown_network_is_not_found() {
        let (app, _) = app().await;
        let err = app.get_ip(Uuid::new_v4(), "10.0.0.1").await.unwrap_err();
        assert_eq!(err.to_string(), "network not found");
    }

    #[tokio::test]
    async fn get_ip_checks_address() {
        let (app, network) = app().await;

        let free = app.get_ip(network.uuid, "10.0.0.7").await.unwrap();
        assert!(free.free());
        assert_eq!(free.etag, None);

        let err = app.get_ip(network.uuid, "192.168.0.1").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
        let err = app.get_ip(network.uuid, "ten").await.unwrap_err();
        assert_eq!(err.field_errors()[0].message, fields::INVALID_IP_MSG);
    }
}

// Shared fixtures for napi-core integration tests.

#![allow(clippy::unwrap_used, dead_code)]

use std::net::Ipv4Addr;

use napi_core::{App, CoreConfig, Network, Params, StaticCatalog};
use napi_store::MemoryStore;
use serde_json::Value;
use uuid::Uuid;

/// Some other zone, holding IPs the nic under test wants.
pub const OTHER: Uuid = Uuid::from_u128(0x5a4b_3c2d_1e0f_4a9b_8c7d_6e5f_4a3b_2c1d);

pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("test params must be an object"),
    }
}

pub fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

pub fn network(gateway: Option<Ipv4Addr>) -> Network {
    let mut network = Network::new(Uuid::new_v4(), "admin", addr(0), 24, "admin", 0);
    network.gateway = gateway;
    network
}

/// An app over `store` knowing `networks`, with every bucket initialized.
pub async fn app_with<S: napi_store::Store>(
    store: S,
    networks: &[Network],
) -> App<S, StaticCatalog> {
    let catalog = StaticCatalog::new();
    for network in networks {
        catalog.insert_network(network.clone());
    }
    let app = App::new(store, catalog, CoreConfig::default());
    app.init_buckets().await.unwrap();
    for network in networks {
        app.init_network(network).await.unwrap();
    }
    app
}

pub async fn app(networks: &[Network]) -> App<MemoryStore, StaticCatalog> {
    app_with(MemoryStore::new(), networks).await
}

// Integration tests for IP selection, concurrent-allocation retries and
// the IP repository, run against `MemoryStore` and a racing wrapper.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use uuid::Uuid;

use common::{OTHER, addr, app, app_with, network, params};
use napi_core::{ErrorCode, NapiError, Nic};
use napi_store::{
    BatchOp, BucketConfig, Committed, Error, Etag, ExpectedEtag, Filter, FilterInput, FindOptions,
    MemoryStore, ObjectRecord, RecordStream, Store,
};

// ── Racing store ────────────────────────────────────────────────────

/// Lets another writer take the first IP a batch tries to claim, just
/// before that batch reaches the backend. Only the next `races` batches
/// are raced.
#[derive(Default)]
struct RacingStore {
    inner: MemoryStore,
    races: AtomicU32,
    batches: AtomicU32,
    stolen: Mutex<Vec<u32>>,
}

impl RacingStore {
    fn racing(races: u32) -> Self {
        Self { races: AtomicU32::new(races), ..Self::default() }
    }

    fn stolen(&self) -> Vec<u32> {
        self.stolen.lock().unwrap().clone()
    }

    fn batches(&self) -> u32 {
        self.batches.load(Ordering::SeqCst)
    }
}

impl Store for RacingStore {
    async fn get_bucket(&self, name: &str) -> Result<BucketConfig, Error> {
        self.inner.get_bucket(name).await
    }

    async fn create_bucket(&self, name: &str, config: &BucketConfig) -> Result<(), Error> {
        self.inner.create_bucket(name, config).await
    }

    async fn update_bucket(&self, name: &str, config: &BucketConfig) -> Result<(), Error> {
        self.inner.update_bucket(name, config).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectRecord, Error> {
        self.inner.get_object(bucket, key).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        value: &Value,
        expected: ExpectedEtag,
    ) -> Result<Etag, Error> {
        self.inner.put_object(bucket, key, value, expected).await
    }

    async fn del_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        self.inner.del_object(bucket, key).await
    }

    fn find_objects(&self, bucket: &str, filter: &Filter, opts: &FindOptions) -> RecordStream {
        self.inner.find_objects(bucket, filter, opts)
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<Committed, Error> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let racing = self
            .races
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if racing {
            if let Some(op) = ops.iter().find(|op| op.bucket.starts_with("napi_ips_")) {
                let number: u32 = op.key.parse().unwrap();
                let theirs = json!({
                    "ip": number,
                    "belongs_to_type": "zone",
                    "belongs_to_uuid": OTHER,
                    "owner_uuid": OTHER,
                });
                self.inner
                    .put_object(&op.bucket, &op.key, &theirs, ExpectedEtag::Unchecked)
                    .await?;
                self.stolen.lock().unwrap().push(number);
            }
        }
        self.inner.batch(ops).await
    }
}

fn nic_params(mac: &str, network_uuid: Uuid) -> napi_core::Params {
    params(json!({
        "mac": mac,
        "belongs_to_type": "zone",
        "belongs_to_uuid": Uuid::new_v4(),
        "owner_uuid": Uuid::new_v4(),
        "network_uuid": network_uuid,
    }))
}

fn ip_of(nic: &Nic) -> std::net::Ipv4Addr {
    std::net::Ipv4Addr::from(nic.ip_number.unwrap())
}

// ── Selection ───────────────────────────────────────────────────────

#[tokio::test]
async fn provisioning_walks_up_from_first_host_skipping_gateway() {
    let net = network(Some(addr(1)));
    let app = app(&[net.clone()]).await;

    let mut got = Vec::new();
    for n in 1..=3 {
        let nic = app
            .create_nic(&nic_params(&format!("90:b8:d0:00:00:0{n}"), net.uuid))
            .await
            .unwrap();
        got.push(ip_of(&nic));
    }
    assert_eq!(got, vec![addr(2), addr(3), addr(4)]);
}

#[tokio::test]
async fn provisioning_fills_freed_addresses_first() {
    let net = network(None);
    let app = app(&[net.clone()]).await;
    for n in 1..=3 {
        app.create_nic(&nic_params(&format!("90:b8:d0:00:00:0{n}"), net.uuid))
            .await
            .unwrap();
    }
    app.delete_nic("90:b8:d0:00:00:02").await.unwrap();

    let nic = app.create_nic(&nic_params("90:b8:d0:00:00:09", net.uuid)).await.unwrap();
    assert_eq!(ip_of(&nic), addr(2));
}

#[tokio::test]
async fn full_range_is_subnet_full() {
    let net = network(None).with_provision_range(addr(10), addr(11));
    let app = app(&[net.clone()]).await;
    for n in 1..=2 {
        app.create_nic(&nic_params(&format!("90:b8:d0:00:00:0{n}"), net.uuid))
            .await
            .unwrap();
    }

    let err = app.create_nic(&nic_params("90:b8:d0:00:00:09", net.uuid)).await.unwrap_err();
    assert!(matches!(err, NapiError::SubnetFull { network_uuid } if network_uuid == net.uuid));
    assert_eq!(err.status_code(), 507);
}

// ── Races ───────────────────────────────────────────────────────────

#[tokio::test]
async fn lost_race_retries_with_a_different_address() {
    let net = network(None);
    let app = app_with(RacingStore::racing(1), &[net.clone()]).await;

    let nic = app.create_nic(&nic_params("90:b8:d0:00:00:01", net.uuid)).await.unwrap();

    assert_eq!(app.store().stolen(), vec![u32::from(addr(1))]);
    assert_eq!(ip_of(&nic), addr(2));
    assert_eq!(app.store().batches(), 2);

    let theirs = app.get_ip(net.uuid, "10.0.0.1").await.unwrap();
    assert_eq!(theirs.belongs_to_uuid, Some(OTHER));
}

#[tokio::test]
async fn lost_race_for_a_specific_address_is_in_use() {
    let net = network(None);
    let app = app_with(RacingStore::racing(1), &[net.clone()]).await;

    let mut raw = nic_params("90:b8:d0:00:00:01", net.uuid);
    raw.insert("ip".into(), json!("10.0.0.9"));
    let err = app.create_nic(&raw).await.unwrap_err();

    assert!(err.is_stop());
    let e = &err.field_errors()[0];
    assert_eq!((e.field.as_str(), e.code), ("ip", ErrorCode::UsedBy));
    assert!(app.get_nic("90:b8:d0:00:00:01").await.is_err());
}

#[tokio::test]
async fn losing_every_race_gives_up_after_the_attempt_limit() {
    let net = network(None);
    let app = app_with(RacingStore::racing(u32::MAX), &[net.clone()]).await;

    let err = app.create_nic(&nic_params("90:b8:d0:00:00:01", net.uuid)).await.unwrap_err();

    let last = u32::from(addr(3)).to_string();
    assert!(matches!(&err, NapiError::Conflict { key, .. } if *key == last));
    assert_eq!(err.status_code(), 409);
    assert_eq!(app.store().batches(), 3);
    assert_eq!(
        app.store().stolen(),
        vec![u32::from(addr(1)), u32::from(addr(2)), u32::from(addr(3))]
    );

    let missing = app.get_nic("90:b8:d0:00:00:01").await.unwrap_err();
    assert_eq!(missing.status_code(), 404);
    let ips = app.list_ips(net.uuid, FilterInput::Text("")).await.unwrap();
    assert_eq!(ips.len(), 3);
    assert!(ips.iter().all(|ip| ip.belongs_to_uuid == Some(OTHER)));
}

// ── IP repository ───────────────────────────────────────────────────

#[tokio::test]
async fn ip_create_update_get_round_trip() {
    let net = network(None);
    let app = app(&[net.clone()]).await;
    let owner = Uuid::new_v4();
    let zone = Uuid::new_v4();

    let created = app
        .create_ip(net.uuid, &params(json!({ "ip": "10.0.0.20", "owner_uuid": owner })))
        .await
        .unwrap();
    let updated = app
        .update_ip(
            net.uuid,
            "10.0.0.20",
            &params(json!({
                "belongs_to_uuid": zone,
                "belongs_to_type": "zone",
                "reserved": true,
            })),
        )
        .await
        .unwrap();
    assert_ne!(updated.etag, created.etag);

    let fetched = app.get_ip(net.uuid, "10.0.0.20").await.unwrap();
    assert_eq!(fetched, updated);
    assert_eq!(fetched.owner_uuid, Some(owner));
    assert_eq!(fetched.belongs_to_uuid, Some(zone));
    assert!(fetched.reserved);
}

#[tokio::test]
async fn ip_update_requires_the_missing_half_of_belongs_to() {
    let net = network(None);
    let app = app(&[net.clone()]).await;
    app.create_ip(net.uuid, &params(json!({ "ip": "10.0.0.20", "reserved": true })))
        .await
        .unwrap();

    let err = app
        .update_ip(net.uuid, "10.0.0.20", &params(json!({ "belongs_to_uuid": Uuid::new_v4() })))
        .await
        .unwrap_err();
    let missing: Vec<_> = err.field_errors().iter().map(|e| e.field.as_str()).collect();
    assert_eq!(missing, vec!["belongs_to_type", "owner_uuid"]);
}

#[tokio::test]
async fn duplicate_ip_create_is_rejected_but_placeholders_are_replaced() {
    let net = network(None);
    let app = app(&[net.clone()]).await;
    let body = params(json!({ "ip": "10.0.0.30", "reserved": true }));

    app.create_ip(net.uuid, &body).await.unwrap();
    let err = app.create_ip(net.uuid, &body).await.unwrap_err();
    assert_eq!(err.field_errors()[0].code, ErrorCode::Duplicate);

    app.delete_ip(net.uuid, "10.0.0.30").await.unwrap();
    let again = app.create_ip(net.uuid, &body).await.unwrap();
    assert!(again.reserved);
}

#[tokio::test]
async fn listing_skips_placeholder_rows() {
    let net = network(None);
    let app = app(&[net.clone()]).await;
    app.create_ip(net.uuid, &params(json!({ "ip": "10.0.0.10", "reserved": true })))
        .await
        .unwrap();
    app.create_ip(net.uuid, &params(json!({ "ip": "10.0.0.11", "reserved": true })))
        .await
        .unwrap();
    app.delete_ip(net.uuid, "10.0.0.11").await.unwrap();

    let listed = app.list_ips(net.uuid, FilterInput::Text("")).await.unwrap();
    assert_eq!(listed.iter().map(|ip| ip.address()).collect::<Vec<_>>(), vec![addr(10)]);

    let reserved = app
        .list_ips(net.uuid, FilterInput::Params(&params(json!({ "reserved": true }))))
        .await
        .unwrap();
    assert_eq!(reserved.len(), 1);
}

#[tokio::test]
async fn blank_filter_param_lists_every_ip() {
    let net = network(None);
    let app = app(&[net.clone()]).await;
    for last in [10, 12] {
        app.create_ip(net.uuid, &params(json!({ "ip": addr(last).to_string(), "reserved": true })))
            .await
            .unwrap();
    }

    let raw = params(json!({ "filter": "" }));
    let listed = app.list_ips(net.uuid, FilterInput::Params(&raw)).await.unwrap();
    assert_eq!(listed.iter().map(|ip| ip.address()).collect::<Vec<_>>(), vec![addr(10), addr(12)]);
}

#[tokio::test]
async fn owner_must_match_restricted_network() {
    let allowed = Uuid::new_v4();
    let net = network(None).with_owners([allowed]);
    let app = app(&[net.clone()]).await;

    let err = app
        .create_ip(net.uuid, &params(json!({ "ip": "10.0.0.5", "owner_uuid": Uuid::new_v4() })))
        .await
        .unwrap_err();
    assert_eq!(err.field_errors()[0].field, "owner_uuid");

    app.create_ip(
        net.uuid,
        &params(json!({ "ip": "10.0.0.5", "owner_uuid": Uuid::new_v4(), "check_owner": false })),
    )
    .await
    .unwrap();
    tokio_test::assert_ok!(
        app.create_ip(net.uuid, &params(json!({ "ip": "10.0.0.6", "owner_uuid": allowed })))
            .await
    );
}

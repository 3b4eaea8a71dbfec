// ── In-process store backend ──
//
// `MemoryStore` keeps buckets in a `DashMap` and funnels every mutation
// through one async write gate, so the check-then-apply step of a batch
// is never interleaved with another writer. Applying a batch holds the
// commit lock for writing and every read holds it for reading, so readers
// see a batch either whole or not at all.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::Error;
use crate::filter::{self, Filter};
use crate::store::{
    BatchOp, BucketConfig, Committed, Etag, ExpectedEtag, FindOptions, ObjectRecord, Operation,
    RecordStream, SortOrder, Store,
};

#[derive(Debug, Clone)]
struct Bucket {
    config: BucketConfig,
    objects: BTreeMap<String, (Value, Etag)>,
}

/// A versioned key-value store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: DashMap<String, Bucket>,
    gate: Mutex<()>,
    commit: RwLock<()>,
    next_etag: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls that reached the backend (bucket changes,
    /// puts, deletes and committed batches).
    pub fn writes(&self) -> u64 {
        self.writes.load(AtomicOrdering::SeqCst)
    }

    fn fresh_etag(&self) -> Etag {
        let n = self.next_etag.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        Etag::new(format!("{n:08X}"))
    }

    fn read_view(&self) -> RwLockReadGuard<'_, ()> {
        self.commit.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_view(&self) -> RwLockWriteGuard<'_, ()> {
        self.commit.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
    }

    fn check(&self, bucket: &str, key: &str, expected: &ExpectedEtag) -> Result<(), Error> {
        let entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound { bucket: bucket.to_owned() })?;
        let actual = entry.objects.get(key).map(|(_, etag)| etag.clone());

        let ok = match expected {
            ExpectedEtag::Unchecked => true,
            ExpectedEtag::Absent => actual.is_none(),
            ExpectedEtag::Is(etag) => actual.as_ref() == Some(etag),
        };
        if ok {
            return Ok(());
        }

        Err(Error::VersionConflict {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            expected: match expected {
                ExpectedEtag::Is(etag) => Some(etag.clone()),
                ExpectedEtag::Unchecked | ExpectedEtag::Absent => None,
            },
            actual,
        })
    }

    /// Reject a put whose unique-indexed field collides with another key.
    fn check_unique(&self, bucket: &str, key: &str, value: &Value) -> Result<(), Error> {
        let Some(entry) = self.buckets.get(bucket) else {
            return Err(Error::BucketNotFound { bucket: bucket.to_owned() });
        };

        for (field, spec) in entry.config.index.iter().filter(|(_, spec)| spec.unique) {
            let Some(wanted) = value.get(field).and_then(filter::scalar_text) else {
                continue;
            };
            let clash = entry.objects.iter().any(|(other, (stored, _))| {
                other != key
                    && stored.get(field).and_then(filter::scalar_text).as_deref()
                        == Some(wanted.as_str())
            });
            if clash {
                return Err(Error::Backend {
                    message: format!(
                        "unique index {field} ({:?}) violated by {bucket}/{key}",
                        spec.kind
                    ),
                });
            }
        }
        Ok(())
    }

    fn read_object(&self, bucket: &str, key: &str) -> Result<ObjectRecord, Error> {
        let _view = self.read_view();
        let entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound { bucket: bucket.to_owned() })?;
        entry
            .objects
            .get(key)
            .map(|(value, etag)| ObjectRecord {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                value: value.clone(),
                etag: etag.clone(),
            })
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            })
    }

    /// Apply already-checked ops as one unit.
    fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<Committed, Error> {
        let _view = self.write_view();
        let mut committed = Committed::default();
        for op in ops {
            let etag = match op.operation {
                Operation::Put(value) => Some(self.apply_put(&op.bucket, &op.key, value)?),
                Operation::Delete => {
                    self.apply_delete(&op.bucket, &op.key)?;
                    None
                }
            };
            committed.entries.push((op.bucket, op.key, etag));
        }
        Ok(committed)
    }

    fn apply_put(&self, bucket: &str, key: &str, value: Value) -> Result<Etag, Error> {
        let etag = self.fresh_etag();
        let mut entry = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::BucketNotFound { bucket: bucket.to_owned() })?;
        entry.objects.insert(key.to_owned(), (value, etag.clone()));
        Ok(etag)
    }

    fn apply_delete(&self, bucket: &str, key: &str) -> Result<(), Error> {
        let mut entry = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::BucketNotFound { bucket: bucket.to_owned() })?;
        entry.objects.remove(key);
        Ok(())
    }

    fn snapshot(
        &self,
        bucket: &str,
        filter: &Filter,
        opts: &FindOptions,
    ) -> Result<Vec<ObjectRecord>, Error> {
        let view = self.read_view();
        let entry = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound { bucket: bucket.to_owned() })?;

        let mut records: Vec<ObjectRecord> = entry
            .objects
            .iter()
            .filter(|(_, (value, _))| filter.matches(value))
            .map(|(key, (value, etag))| ObjectRecord {
                bucket: bucket.to_owned(),
                key: key.clone(),
                value: value.clone(),
                etag: etag.clone(),
            })
            .collect();
        drop(entry);
        drop(view);

        if let Some(sort) = &opts.sort {
            records.sort_by(|a, b| {
                let ord = sort_cmp(a.value.get(&sort.attribute), b.value.get(&sort.attribute));
                match sort.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = opts.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

/// Order two field values; records missing the field sort last.
fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(filter::scalar_text), b.and_then(filter::scalar_text)) {
        (Some(a), Some(b)) => filter::compare(&a, &b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Store for MemoryStore {
    async fn get_bucket(&self, name: &str) -> Result<BucketConfig, Error> {
        self.buckets
            .get(name)
            .map(|b| b.config.clone())
            .ok_or_else(|| Error::BucketNotFound { bucket: name.to_owned() })
    }

    async fn create_bucket(&self, name: &str, config: &BucketConfig) -> Result<(), Error> {
        let _gate = self.gate.lock().await;
        if self.buckets.contains_key(name) {
            return Err(Error::Backend { message: format!("bucket {name} already exists") });
        }
        self.buckets.insert(
            name.to_owned(),
            Bucket { config: config.clone(), objects: BTreeMap::new() },
        );
        self.count_write();
        debug!(bucket = name, version = config.version, "created bucket");
        Ok(())
    }

    async fn update_bucket(&self, name: &str, config: &BucketConfig) -> Result<(), Error> {
        let _gate = self.gate.lock().await;
        let mut entry = self
            .buckets
            .get_mut(name)
            .ok_or_else(|| Error::BucketNotFound { bucket: name.to_owned() })?;
        entry.config = config.clone();
        drop(entry);
        self.count_write();
        debug!(bucket = name, version = config.version, "updated bucket");
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectRecord, Error> {
        self.read_object(bucket, key)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        value: &Value,
        expected: ExpectedEtag,
    ) -> Result<Etag, Error> {
        let _gate = self.gate.lock().await;
        self.check(bucket, key, &expected)?;
        self.check_unique(bucket, key, value)?;
        let etag = self.apply_put(bucket, key, value.clone())?;
        self.count_write();
        trace!(bucket, key, etag = %etag, "put object");
        Ok(etag)
    }

    async fn del_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        let _gate = self.gate.lock().await;
        let exists = self
            .buckets
            .get(bucket)
            .ok_or_else(|| Error::BucketNotFound { bucket: bucket.to_owned() })?
            .objects
            .contains_key(key);
        if !exists {
            return Err(Error::ObjectNotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }
        self.apply_delete(bucket, key)?;
        self.count_write();
        trace!(bucket, key, "deleted object");
        Ok(())
    }

    fn find_objects(&self, bucket: &str, filter: &Filter, opts: &FindOptions) -> RecordStream {
        let snapshot = self.snapshot(bucket, filter, opts);
        Box::pin(async_stream::stream! {
            match snapshot {
                Ok(records) => {
                    for record in records {
                        yield Ok(record);
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<Committed, Error> {
        let _gate = self.gate.lock().await;

        for op in &ops {
            self.check(&op.bucket, &op.key, &op.expected)?;
            if let Operation::Put(value) = &op.operation {
                self.check_unique(&op.bucket, &op.key, value)?;
            }
        }

        let committed = self.apply_batch(ops)?;
        self.count_write();
        debug!(ops = committed.entries.len(), "committed batch");
        Ok(committed)
    }
}

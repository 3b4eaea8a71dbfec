// ── Backing store contract ──
//
// The wire protocol of the store is not modeled here. Anything that can
// do bucket CRUD, etag-checked puts, filtered streaming queries and
// all-or-nothing batches can sit behind `Store`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::filter::Filter;

// ── Etags ───────────────────────────────────────────────────────────

/// Opaque per-record version token handed out by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Etag(String);

impl Etag {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Precondition a write places on the record's current etag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExpectedEtag {
    /// Write regardless of the current state.
    #[default]
    Unchecked,
    /// The record must not exist yet.
    Absent,
    /// The record must currently carry exactly this etag.
    Is(Etag),
}

impl From<Option<Etag>> for ExpectedEtag {
    /// `None` means "never persisted", i.e. the record must be absent.
    fn from(etag: Option<Etag>) -> Self {
        etag.map_or(Self::Absent, Self::Is)
    }
}

// ── Records ─────────────────────────────────────────────────────────

/// One stored object as returned by reads and queries.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub bucket: String,
    pub key: String,
    pub value: Value,
    pub etag: Etag,
}

// ── Buckets ─────────────────────────────────────────────────────────

/// Value type of an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    String,
    Number,
    Boolean,
}

/// One entry of a bucket's `index` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    #[serde(rename = "type")]
    pub kind: IndexKind,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn string() -> Self {
        Self { kind: IndexKind::String, unique: false }
    }

    pub fn number() -> Self {
        Self { kind: IndexKind::Number, unique: false }
    }

    pub fn boolean() -> Self {
        Self { kind: IndexKind::Boolean, unique: false }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Schema as stored by the backend: indexes plus a schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub index: BTreeMap<String, IndexSpec>,
    pub version: u32,
}

// ── Queries ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub attribute: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self { attribute: attribute.into(), order: SortOrder::Asc }
    }
}

/// Options for [`Store::find_objects`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
}

/// Lazy result of a query. Finite, ends after the last record or after
/// the first error, and cannot be restarted.
pub type RecordStream = BoxStream<'static, Result<ObjectRecord, Error>>;

// ── Batches ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Put(Value),
    Delete,
}

/// One element of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOp {
    pub bucket: String,
    pub key: String,
    pub operation: Operation,
    pub expected: ExpectedEtag,
}

impl BatchOp {
    pub fn put(
        bucket: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        expected: ExpectedEtag,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            operation: Operation::Put(value),
            expected,
        }
    }

    pub fn delete(
        bucket: impl Into<String>,
        key: impl Into<String>,
        expected: ExpectedEtag,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            operation: Operation::Delete,
            expected,
        }
    }

    /// Whether this op targets `bucket`/`key`.
    pub fn targets(&self, bucket: &str, key: &str) -> bool {
        self.bucket == bucket && self.key == key
    }
}

/// Outcome of a committed batch: the new etag of every op, in op order.
/// Deletes carry `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Committed {
    pub entries: Vec<(String, String, Option<Etag>)>,
}

impl Committed {
    pub fn etag_of(&self, bucket: &str, key: &str) -> Option<&Etag> {
        self.entries
            .iter()
            .find(|(b, k, _)| b == bucket && k == key)
            .and_then(|(_, _, etag)| etag.as_ref())
    }
}

// ── The trait ───────────────────────────────────────────────────────

/// A remote, versioned key-value store.
///
/// Every method is a single round-trip; the core never holds locks across
/// calls and relies solely on etags and [`Store::batch`] atomicity.
pub trait Store: Send + Sync {
    fn get_bucket(&self, name: &str) -> impl Future<Output = Result<BucketConfig, Error>> + Send;

    fn create_bucket(
        &self,
        name: &str,
        config: &BucketConfig,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn update_bucket(
        &self,
        name: &str,
        config: &BucketConfig,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<ObjectRecord, Error>> + Send;

    /// Store `value` under `key`, returning the new etag.
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        value: &Value,
        expected: ExpectedEtag,
    ) -> impl Future<Output = Result<Etag, Error>> + Send;

    fn del_object(&self, bucket: &str, key: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn find_objects(&self, bucket: &str, filter: &Filter, opts: &FindOptions) -> RecordStream;

    /// Apply every op or none of them.
    fn batch(&self, ops: Vec<BatchOp>) -> impl Future<Output = Result<Committed, Error>> + Send;
}

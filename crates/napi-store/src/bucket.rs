use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::Error;
use crate::store::{BucketConfig, IndexSpec, Store};

/// Static description of one bucket: its name, the human-readable noun used
/// in not-found errors, and its indexed schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSpec {
    pub name: String,
    pub desc: String,
    pub index: BTreeMap<String, IndexSpec>,
    pub version: u32,
    /// Version to stamp on a freshly created bucket, when newer records
    /// still need migrating up to `version`.
    pub migration_version: Option<u32>,
}

impl BucketSpec {
    pub fn new(name: impl Into<String>, desc: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
            index: BTreeMap::new(),
            version,
            migration_version: None,
        }
    }

    /// Add an indexed field.
    pub fn with_index(mut self, field: impl Into<String>, spec: IndexSpec) -> Self {
        self.index.insert(field.into(), spec);
        self
    }

    pub fn config(&self, version: u32) -> BucketConfig {
        BucketConfig { index: self.index.clone(), version }
    }
}

/// Create the bucket if missing, or move its schema forward.
///
/// A stored version at or above `spec.version` is left alone, so calling this
/// repeatedly performs no writes after the first.
pub async fn init_bucket<S: Store>(store: &S, spec: &BucketSpec) -> Result<(), Error> {
    match store.get_bucket(&spec.name).await {
        Ok(current) if current.version >= spec.version => {
            info!(
                bucket = %spec.name,
                stored = current.version,
                requested = spec.version,
                "bucket schema up to date"
            );
            Ok(())
        }
        Ok(current) => {
            info!(
                bucket = %spec.name,
                from = current.version,
                to = spec.version,
                "updating bucket schema"
            );
            store.update_bucket(&spec.name, &spec.config(spec.version)).await
        }
        Err(Error::BucketNotFound { .. }) => {
            let version = spec.migration_version.unwrap_or(spec.version);
            debug!(bucket = %spec.name, version, "creating bucket");
            store.create_bucket(&spec.name, &spec.config(version)).await?;
            info!(bucket = %spec.name, version, "bucket created");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

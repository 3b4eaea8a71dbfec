// ── Gateway helpers ──
//
// Thin request helpers over a `Store`, parameterized by a `BucketSpec` so
// not-found conditions carry the bucket's noun ("nic", "IP").

use futures_util::TryStreamExt;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::bucket::BucketSpec;
use crate::error::Error;
use crate::filter::Filter;
use crate::store::{ExpectedEtag, FindOptions, ObjectRecord, Store};

/// How [`update_obj`] changes a record.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateObj {
    /// Read, set these fields, write back with the observed etag.
    Merge(Map<String, Value>),
    /// Read, drop these fields, write back with the observed etag.
    Remove(Vec<String>),
    /// Write this value outright under the given precondition.
    Replace(Value, ExpectedEtag),
}

fn not_found(spec: &BucketSpec, err: Error) -> Error {
    match err {
        Error::ObjectNotFound { .. } => Error::ResourceNotFound { resource: spec.desc.clone() },
        other => other,
    }
}

pub async fn get_obj<S: Store>(
    store: &S,
    spec: &BucketSpec,
    key: &str,
) -> Result<ObjectRecord, Error> {
    store
        .get_object(&spec.name, key)
        .await
        .map_err(|e| not_found(spec, e))
}

pub async fn del_obj<S: Store>(store: &S, spec: &BucketSpec, key: &str) -> Result<(), Error> {
    store
        .del_object(&spec.name, key)
        .await
        .map_err(|e| not_found(spec, e))?;
    info!(bucket = %spec.name, key, "deleted object");
    Ok(())
}

/// Apply `update` to the record under `key` and return the stored result.
pub async fn update_obj<S: Store>(
    store: &S,
    spec: &BucketSpec,
    key: &str,
    update: UpdateObj,
) -> Result<ObjectRecord, Error> {
    let (value, expected) = match update {
        UpdateObj::Replace(value, expected) => (value, expected),
        UpdateObj::Merge(fields) => {
            let current = get_obj(store, spec, key).await?;
            let mut value = current.value;
            if let Value::Object(map) = &mut value {
                map.extend(fields);
            }
            (value, ExpectedEtag::Is(current.etag))
        }
        UpdateObj::Remove(fields) => {
            let current = get_obj(store, spec, key).await?;
            let mut value = current.value;
            if let Value::Object(map) = &mut value {
                for field in &fields {
                    map.remove(field);
                }
            }
            (value, ExpectedEtag::Is(current.etag))
        }
    };

    match store.put_object(&spec.name, key, &value, expected).await {
        Ok(etag) => {
            info!(bucket = %spec.name, key, etag = %etag, "updated object");
            Ok(ObjectRecord {
                bucket: spec.name.clone(),
                key: key.to_owned(),
                value,
                etag,
            })
        }
        Err(e) => {
            error!(bucket = %spec.name, key, error = %e, "failed to update object");
            Err(e)
        }
    }
}

/// Run a query and collect every record. The first stream error aborts.
pub async fn list_objs<S: Store>(
    store: &S,
    spec: &BucketSpec,
    filter: &Filter,
    opts: &FindOptions,
) -> Result<Vec<ObjectRecord>, Error> {
    debug!(bucket = %spec.name, filter = %filter, "listing objects");
    store.find_objects(&spec.name, filter, opts).try_collect().await
}

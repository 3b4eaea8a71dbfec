use thiserror::Error;

use crate::Etag;

/// Top-level error type for the `napi-store` crate.
///
/// Covers every failure mode of the backing store and the gateway helpers
/// layered on top of it. `napi-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Store-native conditions ─────────────────────────────────────
    /// The named bucket has never been created.
    #[error("bucket {bucket} does not exist")]
    BucketNotFound { bucket: String },

    /// No object is stored under `key`.
    #[error("object {key} not found in bucket {bucket}")]
    ObjectNotFound { bucket: String, key: String },

    /// The etag presented with a write did not match the stored one.
    #[error("etag conflict for {bucket}/{key}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        bucket: String,
        key: String,
        expected: Option<Etag>,
        actual: Option<Etag>,
    },

    // ── Gateway conditions ──────────────────────────────────────────
    /// A gateway lookup or delete hit a missing record. `resource` is the
    /// human-readable bucket description ("nic", "IP", ...).
    #[error("{resource} not found")]
    ResourceNotFound { resource: String },

    /// A filter string could not be parsed.
    #[error("invalid filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// A record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Backend ─────────────────────────────────────────────────────
    /// Transport or store-internal failure.
    #[error("store backend error: {message}")]
    Backend { message: String },
}

impl Error {
    /// Returns `true` for both the raw and the gateway-mapped not-found forms.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotFound { .. } | Self::ResourceNotFound { .. }
        )
    }

    /// Returns `true` if this error is an etag mismatch.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// The `(bucket, key)` whose etag did not match, if this is a conflict.
    pub fn conflict_key(&self) -> Option<(&str, &str)> {
        match self {
            Self::VersionConflict { bucket, key, .. } => Some((bucket, key)),
            _ => None,
        }
    }
}

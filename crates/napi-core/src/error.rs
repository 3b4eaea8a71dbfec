// ── Core error types ──
//
// Closed taxonomy of domain errors. Every failure a caller can see is one
// of these variants; `status_code()` and `body()` are the single place the
// taxonomy is translated into a transport status and payload.
// The `From<napi_store::Error>` impl maps store-layer conditions onto the
// domain variants.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

// ── Field errors ────────────────────────────────────────────────────

pub const MSG_DUPLICATE: &str = "Already exists";
pub const MSG_INVALID_PARAM: &str = "Invalid parameters";
pub const MSG_MISSING_PARAM: &str = "Missing parameter";
pub const MSG_MISSING_PARAMS: &str = "Missing parameters";
pub const MSG_INTERNAL: &str = "Internal error";

/// Per-field error code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
pub enum ErrorCode {
    MissingParameter,
    InvalidParameter,
    Duplicate,
    UsedBy,
}

/// One entry of an error payload's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: ErrorCode,
    pub message: String,
    /// Code-specific details (`type`/`id` for `UsedBy`, `invalid` lists).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FieldError {
    fn new(field: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
            extra: Map::new(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, ErrorCode::MissingParameter, MSG_MISSING_PARAM)
    }

    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, ErrorCode::InvalidParameter, message)
    }

    pub fn duplicate(field: impl Into<String>) -> Self {
        Self::new(field, ErrorCode::Duplicate, MSG_DUPLICATE)
    }

    /// `field` is held by the entity `kind`/`id`.
    pub fn used_by(field: impl Into<String>, kind: &str, id: &str) -> Self {
        Self::new(field, ErrorCode::UsedBy, format!("In use by {kind} \"{id}\""))
            .with_extra("type", kind)
            .with_extra("id", id)
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_owned(), value.into());
        self
    }
}

/// Which flavour of parameter error a list of field errors amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ParamsKind {
    #[strum(to_string = "Missing parameters")]
    Missing,
    #[strum(to_string = "Invalid parameters")]
    Invalid,
}

// ── The taxonomy ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NapiError {
    /// One or more request fields were missing or invalid. `stop` marks a
    /// terminal condition that retrying the same request cannot fix.
    #[error("{kind}")]
    InvalidParams {
        kind: ParamsKind,
        errors: Vec<FieldError>,
        stop: bool,
    },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("No more free IPs available on network {network_uuid}")]
    SubnetFull { network_uuid: Uuid },

    /// Another writer changed `bucket`/`key` first.
    #[error("concurrent update of {bucket}/{key}")]
    Conflict { bucket: String, key: String },

    #[error("{message}")]
    Internal {
        message: String,
        causes: Vec<NapiError>,
    },

    /// Store failure with no domain meaning.
    #[error(transparent)]
    Store(napi_store::Error),
}

/// Serialized error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl NapiError {
    /// Build a parameter error, choosing `Invalid` if any entry is more than
    /// a missing field.
    pub fn invalid_params(errors: Vec<FieldError>) -> Self {
        let kind = if errors.iter().any(|e| e.code != ErrorCode::MissingParameter) {
            ParamsKind::Invalid
        } else {
            ParamsKind::Missing
        };
        Self::InvalidParams { kind, errors, stop: false }
    }

    /// A terminal single-field error: `field` is held by someone else.
    pub fn used_by_stop(field: &str, kind: &str, id: &str) -> Self {
        Self::InvalidParams {
            kind: ParamsKind::Invalid,
            errors: vec![FieldError::used_by(field, kind, id)],
            stop: true,
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidParams { .. } => 422,
            Self::NotFound { .. } => 404,
            Self::SubnetFull { .. } => 507,
            Self::Conflict { .. } => 409,
            Self::Internal { .. } | Self::Store(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams { .. } => "InvalidParameters",
            Self::NotFound { .. } => "ResourceNotFound",
            Self::SubnetFull { .. } => "SubnetFull",
            Self::Conflict { .. } => "Conflict",
            Self::Internal { .. } | Self::Store(_) => "InternalError",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let errors = match self {
            Self::InvalidParams { errors, .. } => errors.clone(),
            _ => Vec::new(),
        };
        ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
            errors,
        }
    }

    /// Field errors carried by this error, if any.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::InvalidParams { errors, .. } => errors,
            _ => &[],
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Self::InvalidParams { stop: true, .. })
    }

    /// Whether the same request may succeed if simply repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Store(e) => e.is_version_conflict(),
            _ => false,
        }
    }
}

// ── Conversion from store-layer errors ──────────────────────────────

impl From<napi_store::Error> for NapiError {
    fn from(err: napi_store::Error) -> Self {
        match err {
            napi_store::Error::ResourceNotFound { resource } => Self::NotFound { resource },
            napi_store::Error::ObjectNotFound { bucket, .. } => Self::NotFound { resource: bucket },
            napi_store::Error::VersionConflict { bucket, key, .. } => {
                Self::Conflict { bucket, key }
            }
            other => Self::Store(other),
        }
    }
}

// ── Validation rejections ───────────────────────────────────────────

/// What a validator or cross-field check can produce instead of a value.
#[derive(Debug)]
pub enum Rejection {
    /// A problem with the request; aggregated into `InvalidParams`.
    Field(FieldError),
    /// Anything else; short-circuits aggregation.
    Internal(NapiError),
}

impl From<FieldError> for Rejection {
    fn from(err: FieldError) -> Self {
        Self::Field(err)
    }
}

impl From<NapiError> for Rejection {
    fn from(err: NapiError) -> Self {
        Self::Internal(err)
    }
}

impl From<Rejection> for NapiError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Field(e) => Self::invalid_params(vec![e]),
            Rejection::Internal(e) => e,
        }
    }
}

impl From<napi_store::Error> for Rejection {
    fn from(err: napi_store::Error) -> Self {
        Self::Internal(err.into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn used_by_payload_carries_type_and_id() {
        let err = FieldError::used_by("ip", "zone", "7b5d0d0a-5a43-4b5e-a1b4-6a4f1e0c8d31");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "field": "ip",
                "code": "UsedBy",
                "message": "In use by zone \"7b5d0d0a-5a43-4b5e-a1b4-6a4f1e0c8d31\"",
                "type": "zone",
                "id": "7b5d0d0a-5a43-4b5e-a1b4-6a4f1e0c8d31",
            })
        );
    }

    #[test]
    fn params_kind_depends_on_codes() {
        let missing = NapiError::invalid_params(vec![FieldError::missing("mac")]);
        assert_eq!(missing.to_string(), "Missing parameters");

        let invalid = NapiError::invalid_params(vec![
            FieldError::missing("mac"),
            FieldError::invalid("vlan_id", "bad"),
        ]);
        assert_eq!(invalid.to_string(), "Invalid parameters");
        assert_eq!(invalid.status_code(), 422);
    }

    #[test]
    fn status_codes_per_variant() {
        assert_eq!(NapiError::not_found("nic").status_code(), 404);
        assert_eq!(NapiError::SubnetFull { network_uuid: Uuid::nil() }.status_code(), 507);
        assert_eq!(
            NapiError::Conflict { bucket: "b".into(), key: "k".into() }.status_code(),
            409
        );
        assert_eq!(
            NapiError::Internal { message: MSG_INTERNAL.into(), causes: vec![] }.status_code(),
            500
        );
    }

    #[test]
    fn store_errors_map_to_domain_variants() {
        let err: NapiError = napi_store::Error::ResourceNotFound { resource: "IP".into() }.into();
        assert!(matches!(err, NapiError::NotFound { ref resource } if resource == "IP"));

        let err: NapiError = napi_store::Error::VersionConflict {
            bucket: "napi_nics".into(),
            key: "1".into(),
            expected: None,
            actual: None,
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 409);

        let err: NapiError = napi_store::Error::Backend { message: "down".into() }.into();
        assert!(matches!(err, NapiError::Store(_)));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn stop_errors_are_not_retryable() {
        let err = NapiError::used_by_stop("ip", "zone", "x");
        assert!(err.is_stop());
        assert!(!err.is_retryable());
        assert_eq!(err.body().errors[0].code, ErrorCode::UsedBy);
    }

    #[test]
    fn held_address_reports_as_invalid_parameters() {
        let err = NapiError::used_by_stop("ip", "zone", "x");
        assert_eq!(err.status_code(), 422);
        assert_eq!(err.body().code, "InvalidParameters");
        assert_eq!(err.field_errors().len(), 1);
    }

    #[test]
    fn body_snapshot() {
        let err = NapiError::invalid_params(vec![
            FieldError::invalid(
                "vlan_id",
                "VLAN ID must be a number between 0 and 4094, and not 1",
            ),
            FieldError::missing("owner_uuid"),
        ]);
        insta::assert_json_snapshot!(err.body(), @r#"
        {
          "code": "InvalidParameters",
          "message": "Invalid parameters",
          "errors": [
            {
              "field": "vlan_id",
              "code": "InvalidParameter",
              "message": "VLAN ID must be a number between 0 and 4094, and not 1"
            },
            {
              "field": "owner_uuid",
              "code": "MissingParameter",
              "message": "Missing parameter"
            }
          ]
        }
        "#);
    }
}

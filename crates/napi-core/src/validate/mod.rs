// ── Parameter validation pipeline ──
//
// A `ParamSpec` binds request fields to validators. All bound fields that
// are present run concurrently; an optional cross-field check runs once they
// settle; rejections are then folded into a single `NapiError`.

pub mod fields;

use futures_util::future::{BoxFuture, join_all};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{FieldError, MSG_INTERNAL, NapiError, Rejection};

/// Request parameters: raw on the way in, validated on the way out.
pub type Params = Map<String, Value>;

/// Checks and normalizes one field.
///
/// Returning a JSON object splats its entries into the validated params;
/// any other value is stored under the field itself.
pub trait Validator: Send + Sync {
    fn validate<'a>(&'a self, field: &'a str, raw: &'a Value)
    -> BoxFuture<'a, Result<Value, Rejection>>;
}

impl<F> Validator for F
where
    F: Fn(&str, &Value) -> Result<Value, Rejection> + Send + Sync,
{
    fn validate<'a>(
        &'a self,
        field: &'a str,
        raw: &'a Value,
    ) -> BoxFuture<'a, Result<Value, Rejection>> {
        Box::pin(std::future::ready(self(field, raw)))
    }
}

/// Cross-field check run after every field validator has settled.
///
/// It sees the raw request and may rewrite the validated params.
pub trait CrossCheck: Send + Sync {
    fn check<'a>(&'a self, raw: &'a Params, validated: &'a mut Params)
    -> BoxFuture<'a, Vec<Rejection>>;
}

impl<F> CrossCheck for F
where
    F: Fn(&Params, &mut Params) -> Vec<Rejection> + Send + Sync,
{
    fn check<'a>(
        &'a self,
        raw: &'a Params,
        validated: &'a mut Params,
    ) -> BoxFuture<'a, Vec<Rejection>> {
        Box::pin(std::future::ready(self(raw, validated)))
    }
}

type Binding<'v> = (String, Box<dyn Validator + 'v>);

/// Field→validator bindings for one request shape.
#[derive(Default)]
pub struct ParamSpec<'v> {
    required: Vec<Binding<'v>>,
    optional: Vec<Binding<'v>>,
    after: Option<Box<dyn CrossCheck + 'v>>,
}

impl<'v> ParamSpec<'v> {
    pub fn new() -> Self {
        Self { required: Vec::new(), optional: Vec::new(), after: None }
    }

    pub fn required(mut self, field: &str, validator: impl Validator + 'v) -> Self {
        self.required.push((field.to_owned(), Box::new(validator)));
        self
    }

    pub fn optional(mut self, field: &str, validator: impl Validator + 'v) -> Self {
        self.optional.push((field.to_owned(), Box::new(validator)));
        self
    }

    pub fn after(mut self, check: impl CrossCheck + 'v) -> Self {
        self.after = Some(Box::new(check));
        self
    }

    /// Move an optional binding into the required set. No-op if `field` is
    /// not bound as optional.
    pub fn promote(mut self, field: &str) -> Self {
        if let Some(at) = self.optional.iter().position(|(f, _)| f == field) {
            let binding = self.optional.remove(at);
            self.required.push(binding);
        }
        self
    }

    /// Run every binding against `params`. Nothing is returned unless every
    /// field passed.
    pub async fn validate(&self, params: &Params) -> Result<Params, NapiError> {
        let mut rejections = Vec::new();
        let mut pending = Vec::new();

        for (field, validator) in &self.required {
            match params.get(field) {
                Some(raw) => pending.push((field.as_str(), validator, raw)),
                None => rejections.push(Rejection::Field(FieldError::missing(field.as_str()))),
            }
        }
        for (field, validator) in &self.optional {
            if let Some(raw) = params.get(field) {
                pending.push((field.as_str(), validator, raw));
            }
        }

        debug!(fields = pending.len(), "validating params");
        let results = join_all(pending.into_iter().map(|(field, validator, raw)| async move {
            (field, validator.validate(field, raw).await)
        }))
        .await;

        let mut validated = Params::new();
        for (field, result) in results {
            match result {
                Ok(Value::Object(splat)) => validated.extend(splat),
                Ok(value) => {
                    validated.insert(field.to_owned(), value);
                }
                Err(rejection) => rejections.push(rejection),
            }
        }

        if let Some(after) = &self.after {
            rejections.extend(after.check(params, &mut validated).await);
        }

        aggregate(rejections)?;
        Ok(validated)
    }
}

/// Fold rejections into one error. Internal failures win over field errors.
fn aggregate(rejections: Vec<Rejection>) -> Result<(), NapiError> {
    if rejections.is_empty() {
        return Ok(());
    }

    let mut fields = Vec::new();
    let mut internal = Vec::new();
    for rejection in rejections {
        match rejection {
            Rejection::Field(e) => fields.push(e),
            Rejection::Internal(e) => internal.push(e),
        }
    }

    if internal.len() == 1 {
        if let Some(only) = internal.pop() {
            return Err(only);
        }
    }
    if !internal.is_empty() {
        return Err(NapiError::Internal { message: MSG_INTERNAL.to_owned(), causes: internal });
    }

    fields.sort_by(|a, b| a.field.cmp(&b.field));
    Err(NapiError::invalid_params(fields))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::{ErrorCode, ParamsKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test params must be an object"),
        }
    }

    #[tokio::test]
    async fn missing_required_and_invalid_optional_is_invalid() {
        let spec = ParamSpec::new()
            .required("mac", fields::mac)
            .optional("vlan_id", fields::vlan);

        let err = spec.validate(&params(json!({ "vlan_id": 1 }))).await.unwrap_err();
        let NapiError::InvalidParams { kind, errors, stop } = err else {
            panic!("expected InvalidParams");
        };
        assert_eq!(kind, ParamsKind::Invalid);
        assert!(!stop);
        let got: Vec<_> = errors.iter().map(|e| (e.field.as_str(), e.code)).collect();
        assert_eq!(
            got,
            vec![("mac", ErrorCode::MissingParameter), ("vlan_id", ErrorCode::InvalidParameter)]
        );
    }

    #[tokio::test]
    async fn only_missing_fields_is_missing() {
        let spec = ParamSpec::new()
            .required("owner_uuid", fields::uuid)
            .required("belongs_to_uuid", fields::uuid);
        let err = spec.validate(&Params::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing parameters");
        let order: Vec<_> = err.field_errors().iter().map(|e| e.field.clone()).collect();
        assert_eq!(order, vec!["belongs_to_uuid", "owner_uuid"]);
    }

    #[tokio::test]
    async fn object_results_splat_and_scalars_do_not() {
        let spec = ParamSpec::new()
            .required("subnet", fields::subnet)
            .optional("vlan_id", fields::vlan);

        let out = spec
            .validate(&params(json!({ "subnet": "10.0.0.0/24", "vlan_id": "42" })))
            .await
            .unwrap();

        assert_eq!(
            Value::Object(out),
            json!({
                "subnet": "10.0.0.0/24",
                "subnet_start_ip": 167_772_160,
                "subnet_bits": 24,
                "vlan_id": 42,
            })
        );
    }

    #[tokio::test]
    async fn after_hook_sees_validated_and_can_reject() {
        let spec = ParamSpec::new()
            .optional("belongs_to_uuid", fields::uuid)
            .optional("belongs_to_type", fields::string)
            .after(|_raw: &Params, validated: &mut Params| -> Vec<Rejection> {
                if validated.contains_key("belongs_to_uuid")
                    && !validated.contains_key("belongs_to_type")
                {
                    return vec![FieldError::missing("belongs_to_type").into()];
                }
                validated.insert("checked".into(), json!(true));
                Vec::new()
            });

        let err = spec
            .validate(&params(json!({ "belongs_to_uuid": "0b0c8f1e-7bd0-4c6e-9b36-1d2f4c9a5e71" })))
            .await
            .unwrap_err();
        assert_eq!(err.field_errors()[0].field, "belongs_to_type");

        let ok = spec.validate(&Params::new()).await.unwrap();
        assert_eq!(ok.get("checked"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn internal_rejections_short_circuit() {
        let boom = |_: &str, _: &Value| -> Result<Value, Rejection> {
            Err(NapiError::not_found("network").into())
        };
        let spec = ParamSpec::new()
            .required("network_uuid", boom)
            .required("mac", fields::mac);
        let err = spec
            .validate(&params(json!({ "network_uuid": "x" })))
            .await
            .unwrap_err();
        assert!(matches!(err, NapiError::NotFound { .. }));

        let spec = ParamSpec::new().required("a", boom).required("b", boom);
        let err = spec.validate(&params(json!({ "a": 1, "b": 2 }))).await.unwrap_err();
        let NapiError::Internal { message, causes } = err else {
            panic!("expected Internal");
        };
        assert_eq!(message, "Internal error");
        assert_eq!(causes.len(), 2);
    }

    #[tokio::test]
    async fn promote_makes_an_optional_field_required() {
        let spec = ParamSpec::new().optional("owner_uuid", fields::uuid).promote("owner_uuid");
        let err = spec.validate(&Params::new()).await.unwrap_err();
        assert_eq!(err.field_errors()[0].code, ErrorCode::MissingParameter);
    }
}

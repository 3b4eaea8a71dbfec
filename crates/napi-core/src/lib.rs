//! IP and nic allocation core.
//!
//! - **[`App`]**: facade owning a [`napi_store::Store`], a
//!   [`NetworkCatalog`] and the [`CoreConfig`]; every request enters here.
//! - **[`validate`]**: parameter validation pipeline. Field validators run
//!   concurrently, then a cross-field hook, then rejections fold into one
//!   [`NapiError`].
//! - **[`ip`] / [`nic`]**: repositories over the per-network IP buckets and
//!   the nic bucket, plus the nic create/update/delete lifecycle.
//! - **[`provision`]**: picks free IPs and commits nic + IP rows in one
//!   atomic batch, retrying when another writer takes the IP first.

pub mod app;
pub mod config;
pub mod error;
pub mod ip;
pub mod model;
pub mod nic;
pub mod provision;
pub mod validate;

// ── Primary re-exports ──────────────────────────────────────────────
pub use app::App;
pub use config::CoreConfig;
pub use error::{ErrorBody, ErrorCode, FieldError, NapiError, ParamsKind, Rejection};
pub use model::{
    Ip, IpView, MacAddr, Network, NetworkCatalog, Nic, NicState, NicUpdate, NicView, SpoofFlags,
    StaticCatalog,
};
pub use provision::{Batch, IpRequest};
pub use validate::{CrossCheck, ParamSpec, Params, Validator};

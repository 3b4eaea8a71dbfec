// ── Domain model ──
//
// Entities owned by the core (IPs, nics) and the narrow view of networks
// the core consumes.

pub mod ip;
pub mod mac;
pub mod network;
pub mod nic;

pub use ip::{Ip, IpRecord, IpView, is_placeholder};
pub use mac::{InvalidMac, MacAddr};
pub use network::{IP_BUCKET_VERSION, Network, NetworkCatalog, StaticCatalog, ip_bucket_name};
pub use nic::{
    NIC_BUCKET, NIC_BUCKET_VERSION, Nic, NicState, NicUpdate, NicView, SpoofFlags, nic_bucket,
};

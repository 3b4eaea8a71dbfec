use serde::{Deserialize, Serialize};

use crate::model::{IP_BUCKET_VERSION, NIC_BUCKET_VERSION};

/// Tunables of the core, built by the embedding layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Schema version requested for the nic bucket.
    pub nic_bucket_version: u32,
    /// Schema version requested for every per-network IP bucket.
    pub ip_bucket_version: u32,
    /// How many times an IP write that lost a race is retried before the
    /// request fails with a conflict.
    pub provision_attempts: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            nic_bucket_version: NIC_BUCKET_VERSION,
            ip_bucket_version: IP_BUCKET_VERSION,
            provision_attempts: 3,
        }
    }
}

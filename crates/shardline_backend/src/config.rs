//! Backend configuration.

use shardline_access::{AbiVersion, ActorAddress};
use std::collections::BTreeSet;
use std::time::Duration;

/// Configuration for a shard leader.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Name of the shard served by this backend.
    pub shard_name: String,
    /// Address frontends use to reach this backend.
    pub local_address: ActorAddress,
    /// ABI versions this backend can speak.
    pub supported_versions: BTreeSet<AbiVersion>,
    /// Maximum number of unacknowledged requests per target.
    pub max_messages: u32,
    /// How long a buffered out-of-order request may wait for the gap to fill.
    pub buffer_timeout: Duration,
    /// Number of replies cached per target for idempotent retries.
    pub replay_cache_capacity: usize,
}

impl BackendConfig {
    /// Creates a configuration for the named shard.
    pub fn new(shard_name: impl Into<String>) -> Self {
        let shard_name = shard_name.into();
        Self {
            local_address: ActorAddress::new(format!("shard-{shard_name}")),
            shard_name,
            supported_versions: AbiVersion::supported(),
            max_messages: 1000,
            buffer_timeout: Duration::from_secs(30),
            replay_cache_capacity: 128,
        }
    }

    /// Sets the address advertised to frontends.
    pub fn with_local_address(mut self, address: ActorAddress) -> Self {
        self.local_address = address;
        self
    }

    /// Restricts the versions this backend accepts.
    pub fn with_supported_versions(
        mut self,
        versions: impl IntoIterator<Item = AbiVersion>,
    ) -> Self {
        self.supported_versions = versions.into_iter().filter(|v| !v.is_test_sentinel()).collect();
        self
    }

    /// Sets the flow-control window. A window of zero is treated as one.
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = max.max(1);
        self
    }

    /// Sets the out-of-order buffering timeout.
    pub fn with_buffer_timeout(mut self, timeout: Duration) -> Self {
        self.buffer_timeout = timeout;
        self
    }

    /// Sets the per-target replay cache capacity.
    pub fn with_replay_cache_capacity(mut self, capacity: usize) -> Self {
        self.replay_cache_capacity = capacity.max(1);
        self
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

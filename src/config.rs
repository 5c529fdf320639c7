// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::path::PathBuf;
use std::time::Duration;

use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Retry behavior for talking to the metadata service.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct MetaRetryConfig {
    pub reconnect_interval: Duration,
    pub max_retry_attempts: usize,
}

impl Default for MetaRetryConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(1),
            max_retry_attempts: 5,
        }
    }
}

/// The configuration of the routing core.
///
/// Batching is bounded two ways because wire overhead scales with entry count
/// while backend memory pressure scales with bytes; either bound can be the
/// tighter one for a given workload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub ca_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Upper bound on entries per dispatched batch.
    pub batch_max_count: usize,
    /// Upper bound on the byte size (keys plus values) per dispatched batch.
    pub batch_max_bytes: usize,
    /// Number of batches dispatched concurrently.
    pub worker_pool_size: usize,
    /// Whether an unreachable store may be reached through a follower proxy.
    pub enable_forward: bool,
    /// Time budget for a single batch, including all of its retries.
    pub per_batch_deadline: Duration,
    /// Per-request timeout used instead of the normal one while forwarding.
    pub forward_deadline: Duration,
    pub meta_retry: MetaRetryConfig,
    /// Region cache TTL base (see `region_cache_ttl_jitter`).
    pub region_cache_ttl: Duration,
    /// Adds jitter to region cache TTL to avoid thundering herds.
    ///
    /// The real TTL is in range `[region_cache_ttl, region_cache_ttl + region_cache_ttl_jitter)`.
    pub region_cache_ttl_jitter: Duration,
}

const DEFAULT_BATCH_MAX_COUNT: usize = 16 * 1024;
const DEFAULT_BATCH_MAX_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_WORKER_POOL_SIZE: usize = 16;
const DEFAULT_PER_BATCH_DEADLINE: Duration = Duration::from_secs(20);
const DEFAULT_FORWARD_DEADLINE: Duration = Duration::from_secs(3);
const DEFAULT_REGION_CACHE_TTL: Duration = Duration::from_secs(600);
const DEFAULT_REGION_CACHE_TTL_JITTER: Duration = Duration::from_secs(60);

impl Default for Config {
    fn default() -> Self {
        Config {
            ca_path: None,
            cert_path: None,
            key_path: None,
            batch_max_count: DEFAULT_BATCH_MAX_COUNT,
            batch_max_bytes: DEFAULT_BATCH_MAX_BYTES,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            enable_forward: false,
            per_batch_deadline: DEFAULT_PER_BATCH_DEADLINE,
            forward_deadline: DEFAULT_FORWARD_DEADLINE,
            meta_retry: MetaRetryConfig::default(),
            region_cache_ttl: DEFAULT_REGION_CACHE_TTL,
            region_cache_ttl_jitter: DEFAULT_REGION_CACHE_TTL_JITTER,
        }
    }
}

impl Config {
    /// Set the certificate authority, certificate, and key locations for
    /// clients.
    ///
    /// By default the client connects without Transport Layer Security. Use
    /// this when the cluster requires mutual TLS.
    #[must_use]
    pub fn with_security(
        mut self,
        ca_path: impl Into<PathBuf>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.ca_path = Some(ca_path.into());
        self.cert_path = Some(cert_path.into());
        self.key_path = Some(key_path.into());
        self
    }

    /// Bound the entries a single batch may carry.
    #[must_use]
    pub fn with_batch_max_count(mut self, batch_max_count: usize) -> Self {
        self.batch_max_count = batch_max_count;
        self
    }

    /// Bound the byte size a single batch may carry.
    #[must_use]
    pub fn with_batch_max_bytes(mut self, batch_max_bytes: usize) -> Self {
        self.batch_max_bytes = batch_max_bytes;
        self
    }

    /// Set how many batches are dispatched concurrently.
    #[must_use]
    pub fn with_worker_pool_size(mut self, worker_pool_size: usize) -> Self {
        self.worker_pool_size = worker_pool_size;
        self
    }

    /// Allow requests to an unreachable store to be relayed through a
    /// reachable follower.
    #[must_use]
    pub fn with_forwarding(mut self, enable_forward: bool) -> Self {
        self.enable_forward = enable_forward;
        self
    }

    /// Set the time budget for one batch including its retries.
    #[must_use]
    pub fn with_per_batch_deadline(mut self, per_batch_deadline: Duration) -> Self {
        self.per_batch_deadline = per_batch_deadline;
        self
    }

    /// Set the request timeout used while proxy-forwarding.
    #[must_use]
    pub fn with_forward_deadline(mut self, forward_deadline: Duration) -> Self {
        self.forward_deadline = forward_deadline;
        self
    }
}

// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

//! Region routing and store failover for RangeKV, a distributed key-value
//! store sharded by key range.
//!
//! This crate is the client-side core that turns a set of user keys into
//! answered requests against a sharded cluster:
//!
//! 1. The [`RegionRouter`] discovers which region owns each key, caching
//!    mappings from the metadata service and invalidating them as routing
//!    errors prove them stale.
//! 2. [`make_batches`] splits each per-region key group into dispatch units
//!    bounded by an entry count and a byte budget.
//! 3. The [`Dispatcher`] fans batches out concurrently. Each batch task owns
//!    a [`ReplicaSelector`] that reacts to leader changes and unreachable
//!    stores by rotating through followers or relaying through a healthy
//!    peer, and the read results come back re-sorted into key order no
//!    matter which batch finished first.
//!
//! ```text
//! caller keys ──► RegionRouter::group_by_region ──► make_batches
//!                                                        │
//!                         sorted KvPairs ◄── Dispatcher ◄┘
//!                                             (one ReplicaSelector per batch)
//! ```
//!
//! Errors that only the caller can resolve are never absorbed:
//! [`Error::EpochNotMatch`] and [`Error::RegionNotFound`] mean the cached
//! grouping went stale, so the caller re-groups and dispatches again.
//!
//! The transport, the protobuf service definitions, and the metadata service
//! itself live outside this crate; they are consumed through the
//! [`store::KvConnect`], [`store::KvClient`], and [`meta::MetaClient`]
//! traits. Since the crate exposes an async API, you need an async runtime
//! (Tokio-only).

pub mod backoff;
pub mod batch;
pub mod dispatch;
pub mod meta;
pub mod replica;
pub mod router;
pub mod store;

mod common;
mod config;
mod kv;
mod proto;
mod region;
mod region_cache;
mod util;

#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(feature = "test-util", allow(dead_code))]
mod mock;

/// Test utilities (feature-gated).
#[cfg(feature = "test-util")]
pub mod test_util {
    pub use super::mock::MockKvClient;
    pub use super::mock::MockKvConnect;
    pub use super::mock::MockMetaClient;
}

#[doc(inline)]
pub use common::security::SecurityManager;
#[doc(inline)]
pub use common::Error;
#[doc(inline)]
pub use common::Result;
#[doc(inline)]
pub use config::Config;
#[doc(inline)]
pub use config::MetaRetryConfig;

#[doc(inline)]
pub use crate::backoff::Backoff;
#[doc(inline)]
pub use crate::batch::append_batches;
#[doc(inline)]
pub use crate::batch::make_batches;
#[doc(inline)]
pub use crate::batch::make_write_batches;
#[doc(inline)]
pub use crate::batch::Batch;
#[doc(inline)]
pub use crate::dispatch::Dispatcher;
#[doc(inline)]
pub use crate::kv::Key;
#[doc(inline)]
pub use crate::kv::KvPair;
#[doc(inline)]
pub use crate::kv::Value;
#[doc(inline)]
pub use crate::region::RegionId;
#[doc(inline)]
pub use crate::region::RegionVerId;
#[doc(inline)]
pub use crate::region::RegionWithLeader;
#[doc(inline)]
pub use crate::region::StoreId;
#[doc(inline)]
pub use crate::replica::ReplicaSelector;
#[doc(inline)]
pub use crate::replica::RpcTarget;
#[doc(inline)]
pub use crate::replica::SelectorState;
#[doc(inline)]
pub use crate::router::RegionRouter;
#[doc(inline)]
pub use crate::util::Deadline;
#[doc(inline)]
pub use crate::util::Interrupt;

#[doc(hidden)]
pub mod kvpb {
    pub use crate::proto::kvpb::*;
}
#[doc(hidden)]
pub mod cluster {
    pub use crate::proto::cluster::*;
}
#[doc(hidden)]
pub mod routing {
    pub use crate::proto::routing::*;
}

// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

mod client;
mod errors;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::RwLock;

pub use self::client::GrpcConnect;
pub use self::client::KvClient;
pub use self::client::KvClientPool;
pub use self::client::KvConnect;
pub use self::client::KvRpcClient;
pub use self::client::Request;
pub use self::client::FORWARD_METADATA_KEY;
pub use self::errors::HasRegionError;
use crate::proto::cluster;
use crate::region::StoreId;

/// The client's live view of one store.
///
/// The store meta (id, address) comes from the metadata service. The flags
/// are maintained by the failover machinery: `reachable` drops on transport
/// failures to the store, `valid` drops once the metadata service reports the
/// store gone. A remembered `proxy` is a follower store that successfully
/// relayed traffic to this store, so later requests skip the proxy search.
#[derive(Debug)]
pub struct StoreInfo {
    meta: cluster::Store,
    reachable: AtomicBool,
    valid: AtomicBool,
    proxy: RwLock<Option<cluster::Store>>,
}

impl StoreInfo {
    pub fn new(meta: cluster::Store) -> StoreInfo {
        let tombstone = meta.state == cluster::StoreState::Tombstone as i32;
        StoreInfo {
            meta,
            reachable: AtomicBool::new(true),
            valid: AtomicBool::new(!tombstone),
            proxy: RwLock::new(None),
        }
    }

    pub fn id(&self) -> StoreId {
        self.meta.id
    }

    pub fn address(&self) -> &str {
        &self.meta.address
    }

    pub fn meta(&self) -> &cluster::Store {
        &self.meta
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    pub fn mark_unreachable(&self) {
        self.reachable.store(false, Ordering::Release);
    }

    pub fn mark_reachable(&self) {
        self.reachable.store(true, Ordering::Release);
    }

    /// Whether the metadata service still knows this store.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn mark_invalid(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn proxy(&self) -> Option<cluster::Store> {
        self.proxy
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    pub fn set_proxy(&self, proxy: cluster::Store) {
        *self
            .proxy
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(proxy);
    }

    pub fn clear_proxy(&self) {
        *self
            .proxy
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = None;
    }

    /// Whether this store is currently relaying traffic for another store.
    pub fn is_proxy(&self) -> bool {
        self.proxy
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .is_some()
    }
}

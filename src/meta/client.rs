// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use async_trait::async_trait;

use crate::proto::cluster;
use crate::region::RegionWithLeader;
use crate::region::StoreId;
use crate::Result;

/// Authoritative region and store lookups.
///
/// Implementations talk to the metadata service; the region cache sits in
/// front of this trait and only reads through on a miss.
#[async_trait]
pub trait MetaClient: Send + Sync + 'static {
    /// The region owning `key`, together with its current leader.
    async fn locate(self: std::sync::Arc<Self>, key: Vec<u8>) -> Result<RegionWithLeader>;

    /// The store with the given id. Returns stores in any state; callers
    /// check for tombstones.
    async fn store_by_id(self: std::sync::Arc<Self>, id: StoreId) -> Result<cluster::Store>;

    /// Every store known to the metadata service.
    async fn all_stores(self: std::sync::Arc<Self>) -> Result<Vec<cluster::Store>>;
}
